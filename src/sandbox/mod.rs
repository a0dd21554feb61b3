// Sandboxed subprocess execution
pub mod capability;
pub mod runner;

pub use capability::{probe, IsolationCapabilities};
pub use runner::{run, SandboxRequest, SandboxResult, SandboxStatus};
