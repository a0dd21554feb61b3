// Name-addressed syscall dispatch
pub mod registry;

pub use registry::{
    global, invoke, register, unregister, SyscallDef, SyscallFlags, SyscallInfo, SyscallRegistry,
};
