//! Purpose: Drive the five pinned entry points behind a swappable backend.
//! Exports: `RuntimeBackend`, `OsRuntime`, `LoadProbe`, `ModelHandle`.
//! Role: The only module that invokes foreign code; everything above it tests in-process.
//! Invariants: Entry points are bound before any invocation.
//! Invariants: The registered sink and opened modules stay valid until process exit.

use std::ffi::{CStr, CString, c_char, c_int, c_void};

use tracing::Level;

use crate::core::error::{Error, ErrorKind};
use crate::core::fault::{FaultReport, call_with_access_violation_guard};
use crate::core::params::LlamaModelParams;
use crate::core::symbols::{self, EntryPoints, LlamaModel, Modules};

/// Non-null model object returned by a successful load. Never released; the
/// process exits while the handle is still valid.
#[derive(Clone, Copy, Debug)]
pub struct ModelHandle {
    raw: *mut LlamaModel,
}

impl ModelHandle {
    pub fn as_ptr(&self) -> *mut LlamaModel {
        self.raw
    }

    #[cfg(test)]
    pub(crate) fn dangling_for_tests() -> Self {
        Self {
            raw: std::ptr::NonNull::<LlamaModel>::dangling().as_ptr(),
        }
    }
}

/// Outcome of the guarded load call.
#[derive(Debug)]
pub enum LoadProbe {
    Loaded(ModelHandle),
    Null,
    Fault(FaultReport),
}

/// Seam between the pipeline and the foreign modules. The real implementation
/// is `OsRuntime`; tests script an in-memory double.
pub trait RuntimeBackend {
    type Modules;
    type Entries;

    fn open_modules(&self, runtime_ref: &str, backend_ref: &str) -> Result<Self::Modules, Error>;
    fn bind_entries(&self, modules: &Self::Modules) -> Result<Self::Entries, Error>;
    fn install_log_sink(&self, entries: &Self::Entries);
    fn load_all_backends(&self, entries: &Self::Entries);
    fn init_runtime(&self, entries: &Self::Entries);
    fn default_params(&self, entries: &Self::Entries) -> LlamaModelParams;
    fn load_model(
        &self,
        entries: &Self::Entries,
        model_path: &str,
        params: LlamaModelParams,
    ) -> Result<LoadProbe, Error>;
}

/// Backend wired to the real dynamic loader and entry points.
pub struct OsRuntime;

impl RuntimeBackend for OsRuntime {
    type Modules = Modules;
    type Entries = EntryPoints;

    fn open_modules(&self, runtime_ref: &str, backend_ref: &str) -> Result<Modules, Error> {
        symbols::open_modules(runtime_ref, backend_ref)
    }

    fn bind_entries(&self, modules: &Modules) -> Result<EntryPoints, Error> {
        symbols::bind_entries(modules)
    }

    fn install_log_sink(&self, entries: &EntryPoints) {
        unsafe { (entries.log_set)(Some(forward_to_tracing), std::ptr::null_mut()) };
    }

    fn load_all_backends(&self, entries: &EntryPoints) {
        unsafe { (entries.backend_load_all)() };
    }

    fn init_runtime(&self, entries: &EntryPoints) {
        unsafe { (entries.backend_init)() };
    }

    fn default_params(&self, entries: &EntryPoints) -> LlamaModelParams {
        unsafe { (entries.default_params)() }
    }

    fn load_model(
        &self,
        entries: &EntryPoints,
        model_path: &str,
        params: LlamaModelParams,
    ) -> Result<LoadProbe, Error> {
        let c_path = CString::new(model_path).map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("model path must not contain NUL bytes")
        })?;
        let load = entries.load_model;
        let probe = call_with_access_violation_guard(|| unsafe { load(c_path.as_ptr(), params) });
        Ok(match probe {
            Ok(raw) if raw.is_null() => LoadProbe::Null,
            Ok(raw) => LoadProbe::Loaded(ModelHandle { raw }),
            Err(report) => LoadProbe::Fault(report),
        })
    }
}

/// Severity values the pinned build passes to its logging callback.
const LOG_LEVEL_ERROR: c_int = 2;
const LOG_LEVEL_WARN: c_int = 3;
const LOG_LEVEL_INFO: c_int = 4;

fn sink_level(level: c_int) -> Level {
    match level {
        LOG_LEVEL_ERROR => Level::ERROR,
        LOG_LEVEL_WARN => Level::WARN,
        LOG_LEVEL_INFO => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn sink_message(raw: &str) -> &str {
    raw.trim_end_matches('\n')
}

/// Forwards library log lines into the tracing stream. A non-capturing
/// function item, so its address stays valid for the process lifetime. The
/// runtime may call it from any of its internal threads.
unsafe extern "C" fn forward_to_tracing(level: c_int, text: *const c_char, _user_data: *mut c_void) {
    if text.is_null() {
        return;
    }
    let raw = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    let message = sink_message(&raw);
    if message.is_empty() {
        return;
    }
    let level = sink_level(level);
    if level == Level::ERROR {
        tracing::error!(target: "llama", "{message}");
    } else if level == Level::WARN {
        tracing::warn!(target: "llama", "{message}");
    } else if level == Level::INFO {
        tracing::info!(target: "llama", "{message}");
    } else {
        tracing::debug!(target: "llama", "{message}");
    }
}
