/// Process-wide capsule lifecycle listener registry
///
/// Listeners receive `capsule_start` / `capsule_stop` notifications
/// synchronously. The callback list is snapshotted under the registry lock
/// before any listener runs, so listener execution never holds the lock and
/// listeners registered mid-broadcast are not retroactively notified.
use crate::observability::audit;
use crate::types::{Result, RuntimeError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};

/// Lifecycle event kinds emitted by capsules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapsuleEventKind {
    /// The worker thread is about to run the entry procedure.
    Start,
    /// The entry returned and the inbox has been drained.
    Stop,
}

impl CapsuleEventKind {
    /// Wire name of the event, as written to the audit trail.
    pub fn as_str(self) -> &'static str {
        match self {
            CapsuleEventKind::Start => "capsule_start",
            CapsuleEventKind::Stop => "capsule_stop",
        }
    }
}

/// A lifecycle notification delivered to listeners.
#[derive(Clone, Debug)]
pub struct CapsuleEvent {
    /// Name of the capsule the event concerns.
    pub capsule: String,
    /// What happened.
    pub kind: CapsuleEventKind,
}

type Listener = Arc<dyn Fn(&CapsuleEvent) + Send + Sync>;

/// Handle returned by [`register`]; passes to [`unregister`] to remove the
/// listener again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

struct RegistryInner {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

/// Listener registry. Lives for the process lifetime once first used.
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ListenerRegistry {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                listeners: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a listener; returns the id needed to unregister it.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CapsuleEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Fails with `NotFound` for an unknown id.
    pub fn unregister(&self, id: ListenerId) -> Result<()> {
        let mut inner = self.lock();
        match inner.listeners.iter().position(|(lid, _)| *lid == id) {
            Some(index) => {
                inner.listeners.remove(index);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!(
                "listener {:?} is not registered",
                id
            ))),
        }
    }

    /// Deliver an event to every currently registered listener.
    pub fn emit(&self, event: &CapsuleEvent) {
        let snapshot: Vec<Listener> = {
            let inner = self.lock();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                audit::record(&format!(
                    "listener panic during {} for capsule {}",
                    event.kind.as_str(),
                    event.capsule
                ));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

static REGISTRY: OnceLock<ListenerRegistry> = OnceLock::new();

/// The process-wide listener registry, created lazily on first use.
pub fn global() -> &'static ListenerRegistry {
    REGISTRY.get_or_init(ListenerRegistry::new)
}

/// Register a lifecycle listener with the process-wide registry.
pub fn register<F>(listener: F) -> ListenerId
where
    F: Fn(&CapsuleEvent) + Send + Sync + 'static,
{
    global().register(listener)
}

/// Remove a previously registered lifecycle listener.
pub fn unregister(id: ListenerId) -> Result<()> {
    global().unregister(id)
}
