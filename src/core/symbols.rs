//! Purpose: Open the runtime/backend module pair and bind the pinned entry points.
//! Exports: `Modules`, `EntryPoints`, signature aliases, `open_modules`, `bind_entries`.
//! Role: The only place an exported address is reinterpreted as a typed function.
//! Invariants: All five entry points resolve before any of them is invoked.
//! Invariants: Opened modules are leaked; they stay mapped until process exit.

use std::ffi::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::core::error::{Error, ErrorKind};
use crate::core::params::LlamaModelParams;

/// Default module references, mapped to platform filenames at open time.
pub const RUNTIME_MODULE: &str = "llama";
pub const BACKEND_MODULE: &str = "ggml";

/// Opaque model object behind `llama_model*`.
#[repr(C)]
pub struct LlamaModel {
    _private: [u8; 0],
}

/// Callback the runtime invokes for every diagnostic line.
pub type LogCallback =
    unsafe extern "C" fn(level: c_int, text: *const c_char, user_data: *mut c_void);

pub type LogSetFn = unsafe extern "C" fn(callback: Option<LogCallback>, user_data: *mut c_void);
pub type BackendInitFn = unsafe extern "C" fn();
pub type DefaultParamsFn = unsafe extern "C" fn() -> LlamaModelParams;
pub type LoadModelFn =
    unsafe extern "C" fn(path: *const c_char, params: LlamaModelParams) -> *mut LlamaModel;
pub type BackendLoadAllFn = unsafe extern "C" fn();

/// The two opened modules plus the references they were opened from.
pub struct Modules {
    pub runtime: &'static Library,
    pub backend: &'static Library,
    pub runtime_ref: String,
    pub backend_ref: String,
}

/// The full pinned entry-point set, bound and ready to invoke.
#[derive(Clone, Copy)]
pub struct EntryPoints {
    pub log_set: LogSetFn,
    pub backend_init: BackendInitFn,
    pub default_params: DefaultParamsFn,
    pub load_model: LoadModelFn,
    pub backend_load_all: BackendLoadAllFn,
}

pub fn open_modules(runtime_ref: &str, backend_ref: &str) -> Result<Modules, Error> {
    let runtime = leak(open_module(runtime_ref)?);
    let backend = leak(open_module(backend_ref)?);
    Ok(Modules {
        runtime,
        backend,
        runtime_ref: runtime_ref.to_string(),
        backend_ref: backend_ref.to_string(),
    })
}

pub fn bind_entries(modules: &Modules) -> Result<EntryPoints, Error> {
    let runtime_ref = modules.runtime_ref.as_str();
    let backend_ref = modules.backend_ref.as_str();
    Ok(EntryPoints {
        log_set: bind(modules.runtime, runtime_ref, "llama_log_set")?,
        backend_init: bind(modules.runtime, runtime_ref, "llama_backend_init")?,
        default_params: bind(modules.runtime, runtime_ref, "llama_model_default_params")?,
        load_model: bind(modules.runtime, runtime_ref, "llama_model_load_from_file")?,
        backend_load_all: bind(modules.backend, backend_ref, "ggml_backend_load_all")?,
    })
}

/// The registered log sink and any model handle hold addresses inside these
/// mappings, so the modules must never be unloaded.
fn leak(library: Library) -> &'static Library {
    Box::leak(Box::new(library))
}

pub fn open_module(reference: &str) -> Result<Library, Error> {
    let location = resolve_module_location(reference);
    tracing::debug!("opening module '{}' as '{}'", reference, location.display());
    // Opening may run the module's initialization code.
    unsafe { Library::new(&location) }.map_err(|err| {
        Error::new(ErrorKind::ModuleOpen)
            .with_message(format!("failed to open module '{}'", location.display()))
            .with_module(reference)
            .with_source(err)
    })
}

/// Refs with a path separator or a shared-library extension anywhere in the
/// name (`libllama.so`, `llama.dll`, versioned sonames like `libllama.so.6`)
/// are used verbatim. Bare names get the platform filename convention and are
/// tried in the working directory before the loader's standard search path.
fn resolve_module_location(reference: &str) -> PathBuf {
    if is_verbatim_ref(reference) {
        return PathBuf::from(reference);
    }
    let filename = PathBuf::from(libloading::library_filename(reference));
    let in_cwd = Path::new(".").join(&filename);
    if in_cwd.exists() { in_cwd } else { filename }
}

fn is_verbatim_ref(reference: &str) -> bool {
    reference.chars().any(std::path::is_separator)
        || reference
            .split('.')
            .skip(1)
            .any(|part| matches!(part, "so" | "dll" | "dylib"))
}

/// Reinterprets an exported address as a function pointer of the requested
/// signature. The signature is trusted, not checked; that trust is why the
/// harness pins one library build.
fn bind<T: Copy>(library: &Library, module: &str, name: &str) -> Result<T, Error> {
    let mut raw = Vec::with_capacity(name.len() + 1);
    raw.extend_from_slice(name.as_bytes());
    raw.push(0);
    let symbol = unsafe { library.get::<T>(&raw) }.map_err(|err| {
        Error::new(ErrorKind::SymbolMissing)
            .with_message(format!("entry point '{name}' is not exported"))
            .with_module(module)
            .with_symbol(name)
            .with_source(err)
    })?;
    Ok(*symbol)
}
