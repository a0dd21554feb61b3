/// Sandbox runner: resource-limited subprocess execution with a wall-clock
/// deadline
///
/// Launches a target executable with best-effort hardening applied in the
/// child before exec: address-space and CPU-time limits, namespace
/// isolation, and a no-new-privileges execution filter step. Hardening
/// features the host lacks are audited and skipped, never fatal. The
/// parent polls for termination and enforces the wall-clock limit
/// independently of the CPU-time limit, force-killing on expiry.
///
/// Result taxonomy: a run ends in exactly one of normal exit, signal
/// termination, or timeout; failure to spawn at all is reported separately
/// as [`RuntimeError::Launch`].
use crate::observability::audit;
use crate::sandbox::capability::{self, IsolationCapabilities};
use crate::types::{Result, RuntimeError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::process::{CommandExt, ExitStatusExt};

/// Interval between child termination checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One-shot description of a sandboxed execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// Executable to launch.
    pub path: PathBuf,
    /// Arguments after argv[0].
    pub argv: Vec<String>,
    /// Replacement environment; `None` inherits the parent environment.
    pub env: Option<Vec<(String, String)>>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Wall-clock deadline; also rounded up to whole seconds for the
    /// child's CPU-time limit.
    pub time_limit: Option<Duration>,
    /// Address-space limit in bytes.
    pub memory_limit: Option<u64>,
    /// Target uid to switch to before exec.
    pub uid: Option<u32>,
    /// Target gid to switch to before exec (applied before the uid switch).
    pub gid: Option<u32>,
}

impl SandboxRequest {
    /// Request running `path` with no arguments and no limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            argv: Vec::new(),
            env: None,
            working_dir: None,
            time_limit: None,
            memory_limit: None,
            uid: None,
            gid: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the child environment entirely.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set the child working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the wall-clock (and derived CPU-time) limit.
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Set the address-space limit in bytes.
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Run as the given uid/gid.
    pub fn credentials(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// How a sandboxed execution ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SandboxStatus {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// Force-killed after exceeding the wall-clock limit.
    TimedOut,
}

impl SandboxStatus {
    /// True for a clean zero exit.
    pub fn success(&self) -> bool {
        matches!(self, SandboxStatus::Exited(0))
    }
}

/// Outcome of a sandboxed execution that did launch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Terminal status of the child.
    pub status: SandboxStatus,
    /// Observed wall-clock duration.
    pub wall_time: Duration,
    /// Correlation id tying this run's audit records together.
    pub run_id: String,
}

/// Execute a request to completion.
pub fn run(request: &SandboxRequest) -> Result<SandboxResult> {
    if request.path.as_os_str().is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "sandbox run: empty executable path".to_string(),
        ));
    }

    let run_id = Uuid::new_v4().to_string();
    let caps = capability::probe();
    for step in skipped_steps(&caps, request) {
        warn!("sandbox hardening step unavailable, skipping: {}", step);
        audit::record(&format!(
            "sandbox_hardening_skipped: run_id={} step={}",
            run_id, step
        ));
    }

    let mut command = Command::new(&request.path);
    command.args(&request.argv);
    if let Some(vars) = &request.env {
        command.env_clear();
        command.envs(vars.iter().map(|(k, v)| (k, v)));
    }
    if let Some(dir) = &request.working_dir {
        command.current_dir(dir);
    }

    #[cfg(unix)]
    apply_hardening(&mut command, request, &caps);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        RuntimeError::Launch(format!("cannot spawn {}: {}", request.path.display(), e))
    })?;
    info!(
        "sandbox spawned pid={} path={} run_id={}",
        child.id(),
        request.path.display(),
        run_id
    );

    let deadline = request.time_limit.map(|limit| start + limit);
    let status = poll_until_exit(&mut child, deadline, &run_id, request)?;
    let wall_time = start.elapsed();

    audit::record(&format!(
        "sandbox_result: run_id={} status={}",
        run_id,
        serde_json::to_string(&status).unwrap_or_else(|_| "unknown".to_string())
    ));

    Ok(SandboxResult {
        status,
        wall_time,
        run_id,
    })
}

/// Hardening steps this run will skip: everything the probe marked
/// unavailable, plus the credential switch when a uid/gid was requested
/// on a host that cannot grant it.
fn skipped_steps(caps: &IsolationCapabilities, request: &SandboxRequest) -> Vec<&'static str> {
    let mut steps = caps.missing();
    if !caps.credential_switch && (request.uid.is_some() || request.gid.is_some()) {
        steps.push("credential_switch");
    }
    steps
}

fn poll_until_exit(
    child: &mut Child,
    deadline: Option<Instant>,
    run_id: &str,
    request: &SandboxRequest,
) -> Result<SandboxStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            #[cfg(unix)]
            if let Some(signal) = status.signal() {
                return Ok(SandboxStatus::Signaled(signal));
            }
            return Ok(SandboxStatus::Exited(status.code().unwrap_or(-1)));
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                warn!(
                    "sandbox wall-clock limit exceeded, killing pid={} run_id={}",
                    child.id(),
                    run_id
                );
                audit::record(&format!(
                    "sandbox_timeout: run_id={} path={} limit_ms={}",
                    run_id,
                    request.path.display(),
                    request.time_limit.map(|t| t.as_millis()).unwrap_or(0)
                ));
                child.kill()?;
                child.wait()?;
                return Ok(SandboxStatus::TimedOut);
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Install the pre-exec hardening chain. Only steps the capability probe
/// reported available are attempted; the probe's findings were already
/// audited by the caller.
#[cfg(unix)]
fn apply_hardening(command: &mut Command, request: &SandboxRequest, caps: &IsolationCapabilities) {
    let memory_limit = request.memory_limit.filter(|b| *b > 0);
    let cpu_seconds = request
        .time_limit
        .filter(|t| !t.is_zero())
        .map(|t| (t.as_millis() as u64).div_ceil(1000));
    // A requested uid/gid the host cannot grant was already audited as a
    // skipped step; attempting the switch anyway would abort the spawn.
    let uid = request.uid.filter(|_| caps.credential_switch);
    let gid = request.gid.filter(|_| caps.credential_switch);
    let use_namespaces = caps.namespaces;
    let use_filter = caps.seccomp;
    let use_rlimits = caps.resource_limits;

    // Everything in this closure runs in the forked child between fork and
    // exec: async-signal-safe libc calls only, no allocation.
    unsafe {
        command.pre_exec(move || {
            if let Some(gid) = gid {
                if libc::setgid(gid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if let Some(uid) = uid {
                if libc::setuid(uid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }

            if use_rlimits {
                if let Some(bytes) = memory_limit {
                    let limit = libc::rlimit {
                        rlim_cur: bytes as libc::rlim_t,
                        rlim_max: bytes as libc::rlim_t,
                    };
                    if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                if let Some(secs) = cpu_seconds {
                    let limit = libc::rlimit {
                        rlim_cur: secs as libc::rlim_t,
                        rlim_max: secs as libc::rlim_t,
                    };
                    if libc::setrlimit(libc::RLIMIT_CPU, &limit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
            }

            #[cfg(target_os = "linux")]
            {
                // Best-effort: a failure here means the kernel refused a
                // feature the probe saw; the exec still proceeds.
                if use_namespaces {
                    let flags = libc::CLONE_NEWPID | libc::CLONE_NEWNS | libc::CLONE_NEWNET;
                    let _ = libc::unshare(flags);
                }
                if use_filter {
                    let _ = libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0);
                }
            }
            #[cfg(not(target_os = "linux"))]
            {
                let _ = (use_namespaces, use_filter);
            }

            Ok(())
        });
    }
}
