// Tracked memory management
pub mod quarantine;

pub use quarantine::{AllocId, Quarantine};
