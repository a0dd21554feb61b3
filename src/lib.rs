//! trion-runtime: the native execution substrate for the Trion language
//! Tracked memory, bounded messaging, capsule execution, and supervised
//! access to the host: syscalls, sandboxed subprocesses, and native code.
//!
//! # Architecture
//!
//! This crate is organized by runtime concern:
//!
//! ## Memory ([`memory`])
//! - [`memory::quarantine`]: Tracked allocation arenas with handle-based
//!   access, sealing, and bulk teardown
//!
//! ## Messaging ([`channel`])
//! - [`channel`]: Bounded MPMC channel with blocking, non-blocking, and
//!   timed operations and drain-then-done close semantics
//!
//! ## Execution ([`capsule`])
//! - [`capsule`]: Named execution units on dedicated OS threads, each with
//!   a private quarantine and a bounded inbox
//! - [`capsule::listener`]: Process-wide capsule lifecycle notifications
//!
//! ## Host Access ([`syscall`], [`sandbox`], [`nasm`])
//! - [`syscall`]: Named operation registry with per-entry authorization
//!   and audit flags
//! - [`sandbox`]: OS-process execution with best-effort isolation, wall
//!   clock limits, and structured results
//! - [`nasm`]: Assemble-link-load bridge for inline native code, plus
//!   marked-block extraction from source text
//!
//! ## Encoding ([`dodecagram`])
//! - [`dodecagram`]: Base-12 text codec for byte strings and integers
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Process-wide append-only audit log
//!
//! # Design Principles
//!
//! 1. **Explicit results** - Every fallible operation returns
//!    [`types::Result`]; nothing is reported through shared error state
//! 2. **Best-effort hardening** - Isolation features are probed at runtime
//!    and skips are recorded, never silently ignored
//! 3. **Blocking by default, bounded by choice** - Channels and inboxes
//!    have fixed capacity; callers pick blocking, timed, or non-blocking
//! 4. **Audit what crosses the boundary** - Syscall dispatch, sandbox
//!    runs, and native module loads leave a trace

// Shared error taxonomy
pub mod types;

// Memory
pub mod memory;

// Messaging
pub mod channel;

// Execution
pub mod capsule;

// Host access
pub mod nasm;
pub mod sandbox;
pub mod syscall;

// Encoding
pub mod dodecagram;

// Observability
pub mod observability;

// Re-export commonly used types for convenience
pub use types::{Result, RuntimeError};

pub use capsule::{Capsule, CapsuleBuilder, CapsuleContext};
pub use channel::{Channel, Recv, SendError};
pub use memory::{AllocId, Quarantine};
pub use observability::audit;
