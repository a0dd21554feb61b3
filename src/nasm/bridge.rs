/// Native code bridge: assemble, link, and dynamically load at runtime
///
/// Turns assembly source text into a callable entry point. The source is
/// written to a private scratch directory and pushed through an external
/// toolchain: a C compiler driver assembling directly (clang preferred,
/// gcc second), falling back to `nasm` plus a linker when the driver cannot
/// cope. The combined output of every toolchain invocation is captured, and
/// any failure surfaces that captured text verbatim so callers see the real
/// assembler/linker error.
///
/// Loaded modules are assumed to persist: there is no unload primitive, and
/// [`compile_and_load`] parks the module in a process-wide table so the
/// resolved pointer stays valid for the remaining process lifetime.
use crate::observability::audit;
use crate::types::{Result, RuntimeError};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

/// A compiled and loaded native module.
pub struct NativeModule {
    // Holds the scratch directory open so the artifact outlives the build.
    _scratch: TempDir,
    artifact: PathBuf,
    library: libloading::Library,
    diagnostics: String,
}

impl NativeModule {
    /// Path of the loadable artifact inside the scratch directory.
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Captured toolchain output from the build, including the commands
    /// that were attempted.
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }
}

/// A resolved entry point in a loaded native module.
///
/// The pointer is valid as long as the module it came from is alive;
/// modules parked via [`compile_and_load`] live until process exit.
#[derive(Clone, Copy, Debug)]
pub struct NativeEntry {
    ptr: *const (),
}

unsafe impl Send for NativeEntry {}
unsafe impl Sync for NativeEntry {}

impl NativeEntry {
    /// Raw address of the symbol.
    pub fn as_ptr(&self) -> *const () {
        self.ptr
    }

    /// Reinterpret the address as a function pointer type.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the symbol's actual
    /// signature and calling convention, and the owning module must still
    /// be loaded.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const ()>());
        std::mem::transmute_copy(&self.ptr)
    }
}

/// Narrow collaborator interface for compiling and resolving native code,
/// so the real toolchain can be replaced by a test double.
pub trait NativeLoader {
    /// Whatever the loader considers a compiled module.
    type Module;

    /// Compile `source` into a loaded module, or fail with the captured
    /// toolchain diagnostics.
    fn compile(&self, source: &str) -> Result<Self::Module>;

    /// Resolve `symbol` in a compiled module to a callable entry point.
    fn resolve(&self, module: &Self::Module, symbol: &str) -> Result<NativeEntry>;

    /// Compile `source` and resolve `symbol` in one step.
    fn compile_and_load(&self, source: &str, symbol: &str) -> Result<(Self::Module, NativeEntry)> {
        let module = self.compile(source)?;
        let entry = self.resolve(&module, symbol)?;
        Ok((module, entry))
    }
}

/// The external-toolchain implementation of [`NativeLoader`].
#[derive(Default)]
pub struct NasmBridge;

impl NasmBridge {
    /// Create a bridge using the host toolchain.
    pub fn new() -> Self {
        Self
    }
}

impl NativeLoader for NasmBridge {
    type Module = NativeModule;

    fn compile(&self, source: &str) -> Result<NativeModule> {
        if source.trim().is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "nasm compile: empty source".to_string(),
            ));
        }

        let scratch = tempfile::Builder::new()
            .prefix("trion-nasm-")
            .tempdir()?;
        let asm_path = scratch.path().join("module.asm");
        let obj_path = scratch.path().join("module.o");
        let so_path = scratch.path().join("module.so");
        std::fs::write(&asm_path, source)?;

        let mut log = String::new();
        let built = build_with_cc(&asm_path, &obj_path, &so_path, &mut log)
            || build_with_nasm(&asm_path, &obj_path, &so_path, &mut log);
        if !built {
            return Err(RuntimeError::Toolchain(log));
        }

        let library = unsafe { libloading::Library::new(&so_path) }.map_err(|e| {
            RuntimeError::Toolchain(format!("{}\ndynamic load failed: {}", log, e))
        })?;

        audit::record(&format!(
            "native_module_loaded: artifact={}",
            so_path.display()
        ));
        Ok(NativeModule {
            _scratch: scratch,
            artifact: so_path,
            library,
            diagnostics: log,
        })
    }

    fn resolve(&self, module: &NativeModule, symbol: &str) -> Result<NativeEntry> {
        if symbol.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "nasm resolve: empty symbol name".to_string(),
            ));
        }
        let sym = unsafe {
            module
                .library
                .get::<unsafe extern "C" fn()>(symbol.as_bytes())
        }
        .map_err(|e| {
            RuntimeError::Toolchain(format!(
                "symbol resolution failed for '{}' in {}: {}",
                symbol,
                module.artifact.display(),
                e
            ))
        })?;
        Ok(NativeEntry {
            ptr: *sym as *const (),
        })
    }
}

/// Primary toolchain: let a C compiler driver assemble and link directly.
fn build_with_cc(asm: &Path, obj: &Path, so: &Path, log: &mut String) -> bool {
    for cc in ["clang", "gcc"] {
        let assembled = run_tool(
            Command::new(cc)
                .args(["-c", "-x", "assembler"])
                .arg(asm)
                .arg("-o")
                .arg(obj),
            log,
        );
        if !assembled {
            continue;
        }
        if run_tool(
            Command::new(cc)
                .args(["-shared", "-fPIC", "-o"])
                .arg(so)
                .arg(obj),
            log,
        ) {
            return true;
        }
    }
    false
}

/// Secondary toolchain: `nasm` for assembly, then a C driver for the link.
fn build_with_nasm(asm: &Path, obj: &Path, so: &Path, log: &mut String) -> bool {
    let assembled = run_tool(
        Command::new("nasm")
            .args(["-f", "elf64"])
            .arg(asm)
            .arg("-o")
            .arg(obj),
        log,
    );
    if !assembled {
        return false;
    }
    for linker in ["clang", "gcc"] {
        if run_tool(
            Command::new(linker)
                .args(["-shared", "-fPIC", "-o"])
                .arg(so)
                .arg(obj),
            log,
        ) {
            return true;
        }
    }
    false
}

/// Run one toolchain command, appending its combined output to `log`.
fn run_tool(command: &mut Command, log: &mut String) -> bool {
    log.push_str(&format!("$ {:?}\n", command));
    match command.output() {
        Ok(output) => {
            log.push_str(&String::from_utf8_lossy(&output.stdout));
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                log.push_str(&format!("exit status: {}\n", output.status));
            }
            output.status.success()
        }
        Err(e) => {
            log.push_str(&format!("failed to invoke: {}\n", e));
            debug!("toolchain invocation failed: {:?}: {}", command, e);
            false
        }
    }
}

/// Modules kept alive for the remaining process lifetime.
static LOADED_MODULES: OnceLock<Mutex<Vec<NativeModule>>> = OnceLock::new();

/// Compile `source` with the host toolchain, resolve `symbol`, and park
/// the module in the process-wide table so the entry point stays valid
/// until process exit.
pub fn compile_and_load(source: &str, symbol: &str) -> Result<NativeEntry> {
    let bridge = NasmBridge::new();
    let (module, entry) = bridge.compile_and_load(source, symbol)?;
    info!(
        "native module loaded: artifact={} symbol={}",
        module.artifact().display(),
        symbol
    );
    let table = LOADED_MODULES.get_or_init(|| Mutex::new(Vec::new()));
    table
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(module);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_rejected() {
        let bridge = NasmBridge::new();
        assert!(matches!(
            bridge.compile("   \n"),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unassemblable_source_surfaces_diagnostics() {
        let bridge = NasmBridge::new();
        match bridge.compile("this is not assembly at all\n") {
            Err(RuntimeError::Toolchain(diag)) => {
                // The captured log always names the commands attempted,
                // even on hosts with no toolchain installed.
                assert!(diag.contains("$ "));
            }
            Err(other) => panic!("expected toolchain failure, got {:?}", other),
            Ok(_) => panic!("nonsense source must not assemble"),
        }
    }

    #[test]
    fn test_run_tool_captures_missing_binary() {
        let mut log = String::new();
        let ok = run_tool(&mut Command::new("definitely-not-a-real-tool-xyz"), &mut log);
        assert!(!ok);
        assert!(log.contains("failed to invoke"));
    }

    #[test]
    fn test_run_tool_captures_output_and_status() {
        let mut log = String::new();
        let ok = run_tool(Command::new("sh").args(["-c", "echo oops >&2; exit 3"]), &mut log);
        assert!(!ok);
        assert!(log.contains("oops"));
        assert!(log.contains("exit status"));
    }

    // A loader double: modules are just the source text, and every symbol
    // resolves to a known function.
    struct FakeLoader;

    extern "C" fn forty_two() -> u64 {
        42
    }

    impl NativeLoader for FakeLoader {
        type Module = String;

        fn compile(&self, source: &str) -> Result<String> {
            if source.contains("bad") {
                return Err(RuntimeError::Toolchain("fake: bad source".to_string()));
            }
            Ok(source.to_string())
        }

        fn resolve(&self, module: &String, symbol: &str) -> Result<NativeEntry> {
            if !module.contains(symbol) {
                return Err(RuntimeError::Toolchain(format!(
                    "fake: no symbol '{}'",
                    symbol
                )));
            }
            Ok(NativeEntry {
                ptr: forty_two as *const (),
            })
        }
    }

    #[test]
    fn test_compile_and_load_wiring_via_double() {
        let loader = FakeLoader;
        let (module, entry) = loader.compile_and_load("answer:", "answer").unwrap();
        assert_eq!(module, "answer:");
        let f: extern "C" fn() -> u64 = unsafe { entry.cast() };
        assert_eq!(f(), 42);

        assert!(matches!(
            loader.compile_and_load("bad input", "answer"),
            Err(RuntimeError::Toolchain(_))
        ));
        assert!(matches!(
            loader.compile_and_load("nothing here", "answer"),
            Err(RuntimeError::Toolchain(_))
        ));
    }
}
