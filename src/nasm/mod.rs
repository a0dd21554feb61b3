// Native code bridging
pub mod blocks;
pub mod bridge;

pub use blocks::{extract_blocks, MetaValue, NasmBlock};
pub use bridge::{compile_and_load, NasmBridge, NativeEntry, NativeLoader, NativeModule};
