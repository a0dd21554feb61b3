/// Runtime probe of host isolation features
///
/// The sandbox runner applies whichever hardening subset the host supports
/// and records what was skipped. Availability is discovered here at runtime
/// rather than baked into compile-time branches, so a binary built on one
/// kernel behaves sensibly on another.
use serde::{Deserialize, Serialize};

/// Isolation features available on the current host.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsolationCapabilities {
    /// Process/mount/network namespace isolation (`unshare`).
    pub namespaces: bool,
    /// Kernel syscall-filter support for the minimal execution filter.
    pub seccomp: bool,
    /// POSIX resource limits (`setrlimit`).
    pub resource_limits: bool,
    /// Permission to switch to a target uid/gid before exec.
    pub credential_switch: bool,
}

impl IsolationCapabilities {
    /// Names of the unconditionally-applied hardening steps this host
    /// cannot provide. Credential switching is excluded: it only matters
    /// when a run requests a uid/gid, and the runner reports that skip
    /// per request.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.namespaces {
            missing.push("namespaces");
        }
        if !self.seccomp {
            missing.push("seccomp");
        }
        if !self.resource_limits {
            missing.push("resource_limits");
        }
        missing
    }

    /// True when every best-effort hardening step is available.
    pub fn fully_hardened(&self) -> bool {
        self.namespaces && self.seccomp && self.resource_limits
    }
}

/// Query which isolation features the current host provides. Never fails;
/// a feature that cannot be probed is reported as unavailable.
pub fn probe() -> IsolationCapabilities {
    IsolationCapabilities {
        namespaces: namespaces_available(),
        seccomp: seccomp_available(),
        resource_limits: cfg!(unix),
        credential_switch: credential_switch_available(),
    }
}

fn namespaces_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_dir("/proc/self/ns").is_ok()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn seccomp_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/sys/kernel/seccomp").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn credential_switch_available() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}
