/// Syscall registry: name-to-handler dispatch with authorization and audit
///
/// The table the language front end uses to expose host operations to user
/// programs. Each entry carries permission flags, an optional required
/// authorization token, and a free-form description. Invocation copies the
/// entry out under the registry lock and calls the handler with the lock
/// released, so a slow handler never blocks registration, removal, or
/// unrelated invocations.
///
/// Registration policy: re-registering a name **overwrites** the previous
/// entry. This keeps the path open for re-registration on restart; rejecting
/// duplicates was the alternative and the overwrite choice is deliberate
/// (see DESIGN.md).
use crate::observability::audit;
use crate::types::{Result, RuntimeError};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};

/// Handler invoked for a registered syscall. Receives the caller's argument
/// string (JSON by convention) and returns caller-owned output.
pub type SyscallHandler =
    Arc<dyn Fn(Option<&str>) -> Result<Option<String>> + Send + Sync + 'static>;

/// Per-entry permission flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyscallFlags {
    /// Write pre- and post-invocation audit records.
    pub audit: bool,
    /// Entry is reserved for trusted callers. The runtime records the flag
    /// and reports it through [`SyscallRegistry::lookup`]; enforcement is
    /// the embedding front end's dispatch decision.
    pub trusted_only: bool,
}

/// A syscall definition under construction, builder style.
pub struct SyscallDef {
    name: String,
    handler: SyscallHandler,
    flags: SyscallFlags,
    auth_token: Option<String>,
    description: Option<String>,
}

impl SyscallDef {
    /// Define a syscall `name` backed by `handler`. Context the handler
    /// needs is captured by the closure.
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            handler: Arc::new(handler),
            flags: SyscallFlags::default(),
            auth_token: None,
            description: None,
        }
    }

    /// Record pre- and post-invocation audit lines for this entry.
    pub fn audited(mut self) -> Self {
        self.flags.audit = true;
        self
    }

    /// Mark the entry as reserved for trusted callers.
    pub fn trusted_only(mut self) -> Self {
        self.flags.trusted_only = true;
        self
    }

    /// Require this token on every invocation.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Human-readable description, surfaced by [`SyscallRegistry::lookup`].
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Introspection data for a registered entry, minus the handler.
#[derive(Clone, Debug)]
pub struct SyscallInfo {
    /// Permission flags.
    pub flags: SyscallFlags,
    /// Whether invocation requires an authorization token.
    pub auth_required: bool,
    /// Description supplied at registration, if any.
    pub description: Option<String>,
}

struct SyscallEntry {
    handler: SyscallHandler,
    flags: SyscallFlags,
    auth_token: Option<String>,
    description: Option<String>,
}

/// Mutable, lockable table of named syscall entries.
pub struct SyscallRegistry {
    entries: Mutex<HashMap<String, SyscallEntry>>,
}

impl SyscallRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or overwrite) an entry.
    pub fn register(&self, def: SyscallDef) -> Result<()> {
        if def.name.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "syscall register: empty name".to_string(),
            ));
        }
        let SyscallDef {
            name,
            handler,
            flags,
            auth_token,
            description,
        } = def;
        audit::record(&format!(
            "syscall_registered: {} audit={} trusted_only={} desc={}",
            name,
            flags.audit,
            flags.trusted_only,
            description.as_deref().unwrap_or("")
        ));
        let mut entries = self.lock();
        entries.insert(
            name,
            SyscallEntry {
                handler,
                flags,
                auth_token,
                description,
            },
        );
        Ok(())
    }

    /// Remove an entry by name.
    pub fn unregister(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "syscall unregister: empty name".to_string(),
            ));
        }
        let removed = {
            let mut entries = self.lock();
            entries.remove(name).is_some()
        };
        if removed {
            audit::record(&format!("syscall_unregistered: {}", name));
            Ok(())
        } else {
            Err(RuntimeError::NotFound(format!(
                "syscall '{}' is not registered",
                name
            )))
        }
    }

    /// Flags and description of a registered entry, if present.
    pub fn lookup(&self, name: &str) -> Option<SyscallInfo> {
        let entries = self.lock();
        entries.get(name).map(|e| SyscallInfo {
            flags: e.flags,
            auth_required: e.auth_token.is_some(),
            description: e.description.clone(),
        })
    }

    /// Invoke a registered syscall.
    ///
    /// The handler runs with the registry lock released. If the entry
    /// requires an authorization token, a missing or mismatched token is
    /// rejected before the handler is reached.
    pub fn invoke(
        &self,
        name: &str,
        args: Option<&str>,
        auth_token: Option<&str>,
    ) -> Result<Option<String>> {
        if name.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "syscall invoke: empty name".to_string(),
            ));
        }
        // Copy everything the call needs, then drop the lock before any
        // user code runs.
        let (handler, flags, required_token) = {
            let entries = self.lock();
            let entry = entries.get(name).ok_or_else(|| {
                RuntimeError::NotFound(format!("syscall '{}' is not registered", name))
            })?;
            (
                Arc::clone(&entry.handler),
                entry.flags,
                entry.auth_token.clone(),
            )
        };

        if let Some(required) = required_token {
            if auth_token != Some(required.as_str()) {
                audit::record(&format!("syscall_invoke_failed_auth: {}", name));
                return Err(RuntimeError::Unauthorized(format!(
                    "syscall '{}' requires a valid authorization token",
                    name
                )));
            }
        }

        if flags.audit {
            audit::record(&format!(
                "syscall_invoke: {} args={}",
                name,
                args.unwrap_or("null")
            ));
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(args))).unwrap_or_else(|_| {
            Err(RuntimeError::External(format!(
                "syscall handler '{}' panicked",
                name
            )))
        });

        if flags.audit {
            match &outcome {
                Ok(out) => audit::record(&format!(
                    "syscall_invoke_result: {} rc=ok out={}",
                    name,
                    out.as_deref().unwrap_or("null")
                )),
                Err(e) => audit::record(&format!(
                    "syscall_invoke_result: {} rc=err error={}",
                    name, e
                )),
            }
        }

        outcome
    }

    /// Names of all registered entries.
    pub fn names(&self) -> Vec<String> {
        let entries = self.lock();
        entries.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SyscallEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SyscallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: OnceLock<SyscallRegistry> = OnceLock::new();

/// The process-wide syscall registry, created lazily on first use. Lives
/// for the process lifetime; there is no teardown beyond process exit.
pub fn global() -> &'static SyscallRegistry {
    REGISTRY.get_or_init(SyscallRegistry::new)
}

/// Register a syscall with the process-wide registry.
pub fn register(def: SyscallDef) -> Result<()> {
    global().register(def)
}

/// Remove a syscall from the process-wide registry.
pub fn unregister(name: &str) -> Result<()> {
    global().unregister(name)
}

/// Invoke a syscall in the process-wide registry.
pub fn invoke(name: &str, args: Option<&str>, auth_token: Option<&str>) -> Result<Option<String>> {
    global().invoke(name, args, auth_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn echo(args: Option<&str>) -> Result<Option<String>> {
        Ok(args.map(str::to_string))
    }

    #[test]
    fn test_register_and_invoke() {
        let registry = SyscallRegistry::new();
        registry.register(SyscallDef::new("echo", echo)).unwrap();
        let out = registry.invoke("echo", Some("{\"n\":1}"), None).unwrap();
        assert_eq!(out.as_deref(), Some("{\"n\":1}"));
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let registry = SyscallRegistry::new();
        assert!(matches!(
            registry.invoke("nope", None, None),
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            registry.unregister("nope"),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[test]
    fn test_auth_token_enforced_before_handler_runs() {
        let registry = SyscallRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            registry
                .register(
                    SyscallDef::new("guarded", move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    })
                    .auth_token("s3cret"),
                )
                .unwrap();
        }

        assert!(matches!(
            registry.invoke("guarded", None, None),
            Err(RuntimeError::Unauthorized(_))
        ));
        assert!(matches!(
            registry.invoke("guarded", None, Some("wrong")),
            Err(RuntimeError::Unauthorized(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        registry.invoke("guarded", None, Some("s3cret")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = SyscallRegistry::new();
        registry
            .register(SyscallDef::new("v", |_| Ok(Some("one".to_string()))))
            .unwrap();
        registry
            .register(SyscallDef::new("v", |_| Ok(Some("two".to_string()))))
            .unwrap();
        assert_eq!(
            registry.invoke("v", None, None).unwrap().as_deref(),
            Some("two")
        );
    }

    #[test]
    fn test_lookup_exposes_flags_and_description() {
        let registry = SyscallRegistry::new();
        registry
            .register(
                SyscallDef::new("ping", |_| Ok(Some("pong".to_string())))
                    .audited()
                    .trusted_only()
                    .description("liveness probe"),
            )
            .unwrap();
        let info = registry.lookup("ping").unwrap();
        assert!(info.flags.audit);
        assert!(info.flags.trusted_only);
        assert!(!info.auth_required);
        assert_eq!(info.description.as_deref(), Some("liveness probe"));
        assert!(registry.lookup("pong").is_none());
    }

    #[test]
    fn test_audited_invoke_writes_pre_and_post_records() {
        // Uses the process-wide audit file; scenario from the runtime
        // contract: an audited "ping" produces two records and a result.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        audit::open(&path).unwrap();

        let registry = SyscallRegistry::new();
        registry
            .register(SyscallDef::new("ping", |_| Ok(Some("pong".to_string()))).audited())
            .unwrap();
        let out = registry.invoke("ping", None, None).unwrap();
        assert_eq!(out.as_deref(), Some("pong"));

        audit::close();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("syscall_invoke: ping args=null"));
        assert!(contents.contains("syscall_invoke_result: ping rc=ok out=pong"));
    }

    #[test]
    fn test_panicking_handler_reports_external_failure() {
        let registry = SyscallRegistry::new();
        registry
            .register(SyscallDef::new("boom", |_| panic!("handler bug")))
            .unwrap();
        assert!(matches!(
            registry.invoke("boom", None, None),
            Err(RuntimeError::External(_))
        ));
    }

    #[test]
    fn test_slow_handler_does_not_block_registration() {
        let registry = Arc::new(SyscallRegistry::new());
        registry
            .register(SyscallDef::new("slow", |_| {
                std::thread::sleep(Duration::from_millis(150));
                Ok(None)
            }))
            .unwrap();

        let invoker = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.invoke("slow", None, None))
        };
        std::thread::sleep(Duration::from_millis(30));
        // Must complete while "slow" is still running.
        registry.register(SyscallDef::new("fast", echo)).unwrap();
        assert!(registry.lookup("fast").is_some());
        invoker.join().unwrap().unwrap();
    }
}
