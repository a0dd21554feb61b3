/// Append-only audit trail for runtime events
///
/// Records timestamped, human-readable event lines for security-relevant
/// operations: syscall registration and invocation, sandbox kills, skipped
/// hardening steps, native module loads. The audit file is optional; while
/// no file is open, records are forwarded to the standard `log` facade so
/// events are never silently dropped.
use crate::types::Result;
use chrono::Local;
use log::{error, info};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Audit log backed by an append-only file.
///
/// The file handle is guarded by its own dedicated lock; audit writes never
/// contend with any other runtime lock.
pub struct AuditLog {
    sink: Mutex<Option<AuditSink>>,
}

struct AuditSink {
    file: File,
    path: PathBuf,
}

impl AuditLog {
    const fn new() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    /// Open (or create) the audit file at `path` in append mode.
    ///
    /// An already-open file is closed first, so a restart can re-point the
    /// trail without leaking the previous handle.
    pub fn open(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        *sink = Some(AuditSink {
            file,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Close the audit file. Subsequent records fall back to the `log` facade.
    pub fn close(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        *sink = None;
    }

    /// Path of the currently open audit file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.as_ref().map(|s| s.path.clone())
    }

    /// Append one timestamped event line and flush it.
    pub fn record(&self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        match sink.as_mut() {
            Some(s) => {
                if let Err(e) = writeln!(s.file, "[{}] {}", stamp, message) {
                    error!("failed to write audit record: {}", e);
                    return;
                }
                if let Err(e) = s.file.flush() {
                    error!("failed to flush audit log: {}", e);
                }
            }
            None => info!("audit: {}", message),
        }
    }
}

/// Global audit log instance
static AUDIT: OnceLock<AuditLog> = OnceLock::new();

fn global() -> &'static AuditLog {
    AUDIT.get_or_init(AuditLog::new)
}

/// Open the process-wide audit file.
pub fn open(path: &Path) -> Result<()> {
    global().open(path)
}

/// Close the process-wide audit file.
pub fn close() {
    global().close();
}

/// Path of the process-wide audit file, if one is open.
pub fn path() -> Option<PathBuf> {
    global().path()
}

/// Record an event line in the process-wide audit trail.
pub fn record(message: &str) {
    global().record(message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new();
        log.open(&path).unwrap();
        log.record("syscall_registered: ping");
        log.record("syscall_invoke: ping args=null");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("syscall_registered: ping"));
        assert!(lines[1].contains("syscall_invoke: ping"));
    }

    #[test]
    fn test_record_without_file_does_not_panic() {
        let log = AuditLog::new();
        log.record("no sink yet");
        assert!(log.path().is_none());
    }

    #[test]
    fn test_reopen_replaces_sink() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.log");
        let second = dir.path().join("b.log");
        let log = AuditLog::new();
        log.open(&first).unwrap();
        log.record("one");
        log.open(&second).unwrap();
        log.record("two");

        assert_eq!(log.path(), Some(second.clone()));
        assert!(std::fs::read_to_string(&first).unwrap().contains("one"));
        assert!(std::fs::read_to_string(&second).unwrap().contains("two"));
    }

    #[test]
    fn test_close_falls_back_to_log_facade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new();
        log.open(&path).unwrap();
        log.close();
        log.record("after close");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("after close"));
    }
}
