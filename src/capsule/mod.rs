/// Capsule: a named unit of concurrent execution
///
/// A capsule owns exactly one [`Quarantine`], one inbox [`Channel`], and a
/// worker thread. Lifecycle: created → running → stopped. Starting spawns
/// the worker, which broadcasts `capsule_start`, runs the user entry
/// procedure, drains any backlog left in the inbox (to release blocked
/// senders, not to process it), broadcasts `capsule_stop`, and clears the
/// running flag.
///
/// Shutdown ordering is mandatory: the inbox is closed before the worker
/// is joined, and only after the join does the capsule's quarantine go
/// away. A worker can therefore never observe freed memory.
pub mod listener;

use crate::channel::{Channel, Recv, SendError};
use crate::memory::Quarantine;
use crate::observability::audit;
use crate::types::{Result, RuntimeError};
use listener::{CapsuleEvent, CapsuleEventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Inbox capacity used when the builder does not override it.
pub const DEFAULT_INBOX_CAPACITY: usize = 32;

/// Entry procedure run on the capsule's worker thread.
pub type Entry<M> = Box<dyn FnOnce(&CapsuleContext<M>) + Send + 'static>;

struct Shared<M> {
    name: String,
    quarantine: Quarantine,
    inbox: Channel<M>,
    running: AtomicBool,
}

/// The capsule-side view handed to the entry procedure: the capsule's
/// name, private quarantine, and the receive half of its inbox.
pub struct CapsuleContext<M> {
    shared: Arc<Shared<M>>,
}

impl<M> CapsuleContext<M> {
    /// Name of the running capsule.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The capsule's private memory arena.
    pub fn quarantine(&self) -> &Quarantine {
        &self.shared.quarantine
    }

    /// Blocking receive from the inbox.
    pub fn recv(&self) -> Result<Recv<M>> {
        self.shared.inbox.recv()
    }

    /// Non-blocking receive from the inbox.
    pub fn try_recv(&self) -> Result<Recv<M>> {
        self.shared.inbox.try_recv()
    }

    /// Timed receive from the inbox.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Recv<M>> {
        self.shared.inbox.recv_timeout(timeout)
    }
}

/// Named concurrent execution unit.
pub struct Capsule<M: Send + 'static> {
    shared: Arc<Shared<M>>,
    entry: Mutex<Option<Entry<M>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for a [`Capsule`] with a non-default inbox capacity.
pub struct CapsuleBuilder {
    name: String,
    inbox_capacity: usize,
}

impl CapsuleBuilder {
    /// Override the inbox capacity (default 32).
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Finish construction with the given entry procedure.
    pub fn build<M, F>(self, entry: F) -> Result<Capsule<M>>
    where
        M: Send + 'static,
        F: FnOnce(&CapsuleContext<M>) + Send + 'static,
    {
        if self.name.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "capsule: name must not be empty".to_string(),
            ));
        }
        Ok(Capsule {
            shared: Arc::new(Shared {
                name: self.name,
                quarantine: Quarantine::with_capacity(16)?,
                inbox: Channel::new(self.inbox_capacity)?,
                running: AtomicBool::new(false),
            }),
            entry: Mutex::new(Some(Box::new(entry))),
            worker: Mutex::new(None),
        })
    }
}

impl<M: Send + 'static> Capsule<M> {
    /// Create a capsule with the default inbox capacity.
    pub fn new<F>(name: &str, entry: F) -> Result<Self>
    where
        F: FnOnce(&CapsuleContext<M>) + Send + 'static,
    {
        Self::builder(name).build(entry)
    }

    /// Start building a capsule named `name`.
    pub fn builder(name: &str) -> CapsuleBuilder {
        CapsuleBuilder {
            name: name.to_string(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }

    /// Name of the capsule.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// True while the worker thread is between start and stop.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker thread. Fails if the capsule is already running or
    /// has already run once; a capsule is single-shot.
    pub fn start(&self) -> Result<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RuntimeError::InvalidArgument(format!(
                "capsule '{}' is already running",
                self.shared.name
            )));
        }
        let entry = {
            let mut slot = self.entry.lock().unwrap_or_else(|e| e.into_inner());
            match slot.take() {
                Some(entry) => entry,
                None => {
                    self.shared.running.store(false, Ordering::SeqCst);
                    return Err(RuntimeError::InvalidArgument(format!(
                        "capsule '{}' has already run",
                        self.shared.name
                    )));
                }
            }
        };

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("capsule-{}", self.shared.name))
            .spawn(move || worker_main(shared, entry));
        match spawned {
            Ok(handle) => {
                let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(RuntimeError::Launch(format!(
                    "capsule '{}' worker spawn failed: {}",
                    self.shared.name, e
                )))
            }
        }
    }

    /// Blocking send into the inbox.
    pub fn send(&self, msg: M) -> std::result::Result<(), SendError<M>> {
        self.shared.inbox.send(msg)
    }

    /// Non-blocking send into the inbox.
    pub fn try_send(&self, msg: M) -> std::result::Result<(), SendError<M>> {
        self.shared.inbox.try_send(msg)
    }

    /// Wait for the worker thread to finish. A capsule that never started
    /// joins immediately.
    pub fn join(&self) -> Result<()> {
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                RuntimeError::External(format!(
                    "capsule '{}' worker terminated abnormally",
                    self.shared.name
                ))
            })?;
        }
        Ok(())
    }

    /// Close the inbox (releasing any blocked sender) and join the worker.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.inbox.close();
        self.join()
    }
}

impl<M: Send + 'static> Drop for Capsule<M> {
    fn drop(&mut self) {
        // Inbox must close before the join so a sender parked on a full
        // queue cannot keep the worker alive forever; the quarantine drops
        // with the shared state after the worker is gone.
        self.shared.inbox.close();
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn worker_main<M: Send + 'static>(shared: Arc<Shared<M>>, entry: Entry<M>) {
    let event = |kind: CapsuleEventKind| CapsuleEvent {
        capsule: shared.name.clone(),
        kind,
    };
    listener::global().emit(&event(CapsuleEventKind::Start));

    let ctx = CapsuleContext {
        shared: Arc::clone(&shared),
    };
    if catch_unwind(AssertUnwindSafe(|| entry(&ctx))).is_err() {
        audit::record(&format!("capsule panic: {}", shared.name));
    }

    // Drain whatever is still queued. The backlog is discarded; draining
    // exists to release senders blocked on a full inbox.
    while let Ok(Recv::Item(_)) = shared.inbox.try_recv() {}

    listener::global().emit(&event(CapsuleEventKind::Stop));
    shared.running.store(false, Ordering::SeqCst);
}
