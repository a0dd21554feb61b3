/// Core types and the error taxonomy for the Trion runtime
use thiserror::Error;

/// Custom error types for the runtime core.
///
/// Each failing operation reports a distinct variant carrying a
/// human-readable message; nothing is reported through a side channel.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("quarantine is sealed")]
    Sealed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation would block")]
    WouldBlock,

    #[error("operation timed out")]
    Timeout,

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("closed: {0}")]
    Closed(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("external failure: {0}")]
    External(String),

    #[error("toolchain failure: {0}")]
    Toolchain(String),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
