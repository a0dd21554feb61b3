/// Bounded MPMC channel used standalone and as a capsule's mailbox
///
/// A fixed-capacity FIFO queue with blocking, non-blocking, and timed
/// send/receive. One internal mutex guards the buffer; two condition
/// variables (not-empty / not-full) park waiters. Items are delivered in
/// the exact order the buffer accepted them, across any number of
/// producers and consumers.
///
/// `close()` is the cooperative cancellation point: it wakes every waiter
/// so blocked senders fail with `Closed` while receivers drain whatever is
/// buffered before observing [`Recv::Done`].
use crate::types::{Result, RuntimeError};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of a receive operation.
///
/// Callers must distinguish "closed with an item still buffered" (which
/// yields `Item`) from "closed and drained" (`Done`).
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    /// An item was dequeued.
    Item(T),
    /// The channel is closed and the buffer is empty; no further item
    /// will ever arrive.
    Done,
}

impl<T> Recv<T> {
    /// Unwrap the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            Recv::Item(item) => Some(item),
            Recv::Done => None,
        }
    }
}

/// A rejected send, returning ownership of the item to the caller.
pub struct SendError<T> {
    /// The item that was not enqueued.
    pub item: T,
    /// Why the send was rejected: `Closed`, `WouldBlock`, or `Timeout`.
    pub reason: RuntimeError,
}

impl<T> SendError<T> {
    /// Discard the item and keep the reason.
    pub fn into_reason(self) -> RuntimeError {
        self.reason
    }
}

impl<T> std::fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> From<SendError<T>> for RuntimeError {
    fn from(err: SendError<T>) -> Self {
        err.reason
    }
}

struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
}

/// Bounded concurrent FIFO queue.
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> Channel<T> {
    /// Create a channel holding at most `capacity` items. Zero capacity
    /// is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RuntimeError::InvalidArgument(
                "channel: capacity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    /// Enqueue an item, waiting for space as long as it takes.
    pub fn send(&self, item: T) -> std::result::Result<(), SendError<T>> {
        self.send_inner(item, true, None)
    }

    /// Enqueue an item without blocking; a full channel yields `WouldBlock`.
    pub fn try_send(&self, item: T) -> std::result::Result<(), SendError<T>> {
        self.send_inner(item, false, None)
    }

    /// Enqueue an item, waiting for space at most `timeout`.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> std::result::Result<(), SendError<T>> {
        self.send_inner(item, true, Some(timeout))
    }

    /// Dequeue the oldest item, waiting as long as it takes. Returns
    /// [`Recv::Done`] once the channel is closed and drained.
    pub fn recv(&self) -> Result<Recv<T>> {
        self.recv_inner(true, None)
    }

    /// Dequeue without blocking; an open, empty channel yields `WouldBlock`.
    pub fn try_recv(&self) -> Result<Recv<T>> {
        self.recv_inner(false, None)
    }

    /// Dequeue, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Recv<T>> {
        self.recv_inner(true, Some(timeout))
    }

    /// Close the channel. Idempotent. Subsequent sends fail; receives
    /// drain the remaining buffer before reporting [`Recv::Done`]. All
    /// parked waiters are woken so they can re-evaluate.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drop(inner);
    }

    /// True once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    /// True when no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn send_inner(
        &self,
        item: T,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> std::result::Result<(), SendError<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock();
        if inner.closed {
            return Err(SendError {
                item,
                reason: RuntimeError::Closed("channel closed".to_string()),
            });
        }
        while inner.buf.len() == self.capacity {
            if !blocking {
                return Err(SendError {
                    item,
                    reason: RuntimeError::WouldBlock,
                });
            }
            inner = match self.wait_not_full(inner, deadline) {
                Ok(guard) => guard,
                Err(reason) => return Err(SendError { item, reason }),
            };
            // A channel may close while a sender waits.
            if inner.closed {
                return Err(SendError {
                    item,
                    reason: RuntimeError::Closed("channel closed during wait".to_string()),
                });
            }
        }
        inner.buf.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    fn recv_inner(&self, blocking: bool, timeout: Option<Duration>) -> Result<Recv<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.buf.pop_front() {
                self.not_full.notify_one();
                return Ok(Recv::Item(item));
            }
            if inner.closed {
                return Ok(Recv::Done);
            }
            if !blocking {
                return Err(RuntimeError::WouldBlock);
            }
            inner = self.wait_not_empty(inner, deadline)?;
        }
    }

    fn wait_not_full<'a>(
        &self,
        inner: MutexGuard<'a, Inner<T>>,
        deadline: Option<Instant>,
    ) -> std::result::Result<MutexGuard<'a, Inner<T>>, RuntimeError> {
        match deadline {
            None => Ok(self
                .not_full
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner())),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(RuntimeError::Timeout);
                }
                let (guard, result) = self
                    .not_full
                    .wait_timeout(inner, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                if result.timed_out() && guard.buf.len() == self.capacity && !guard.closed {
                    return Err(RuntimeError::Timeout);
                }
                Ok(guard)
            }
        }
    }

    fn wait_not_empty<'a>(
        &self,
        inner: MutexGuard<'a, Inner<T>>,
        deadline: Option<Instant>,
    ) -> std::result::Result<MutexGuard<'a, Inner<T>>, RuntimeError> {
        match deadline {
            None => Ok(self
                .not_empty
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner())),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(RuntimeError::Timeout);
                }
                let (guard, result) = self
                    .not_empty
                    .wait_timeout(inner, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                if result.timed_out() && guard.buf.is_empty() && !guard.closed {
                    return Err(RuntimeError::Timeout);
                }
                Ok(guard)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
