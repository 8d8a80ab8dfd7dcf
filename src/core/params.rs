//! Purpose: Mirror the b5028 `llama_model_params` record byte-for-byte.
//! Exports: `LlamaModelParams`, `ProgressCallback`, `BackendDevice`, split-mode constants, `apply_override_policy`.
//! Role: The one place that pins the in-memory configuration ABI.
//! Invariants: Layout assertions fail the build if the mirror drifts from the pinned 80 bytes.
//! Invariants: Only 64-bit targets are supported; pointer width is part of the ABI.

use std::ffi::{c_float, c_int, c_void};
use std::mem;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("llama-smoke mirrors a 64-bit llama_model_params layout; this target is unsupported");

/// Opaque backend device handle (`ggml_backend_dev_t`).
pub type BackendDevice = *mut c_void;

/// Progress callback slot inside the params record. This tool never installs
/// one; the alias exists so the field layout matches.
pub type ProgressCallback =
    Option<unsafe extern "C" fn(progress: c_float, user_data: *mut c_void) -> bool>;

/// `LLAMA_SPLIT_MODE_*` values as of b5028. Only whatever default the library
/// hands back reaches it again; the constants document the field's domain.
pub const SPLIT_MODE_NONE: c_int = 0;
pub const SPLIT_MODE_LAYER: c_int = 1;
pub const SPLIT_MODE_ROW: c_int = 2;

/// In-memory mirror of the pinned build's `llama_model_params`, field order
/// and padding included. The trailing `padding1`/`padding2` fields are part
/// of the published record and hold the total at 80 bytes on 64-bit targets.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LlamaModelParams {
    pub devices: *mut BackendDevice,
    pub tensor_buft_overrides: *const c_void,
    pub n_gpu_layers: c_int,
    pub split_mode: c_int,
    pub main_gpu: c_int,
    pub tensor_split: *const c_float,
    pub progress_callback: ProgressCallback,
    pub progress_callback_user_data: *mut c_void,
    pub kv_overrides: *const c_void,
    pub vocab_only: bool,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub check_tensors: bool,
    pub padding1: bool,
    pub padding2: c_int,
}

const _: () = {
    assert!(
        mem::size_of::<LlamaModelParams>() == 80,
        "llama_model_params must stay 80 bytes"
    );
    assert!(mem::offset_of!(LlamaModelParams, devices) == 0);
    assert!(mem::offset_of!(LlamaModelParams, tensor_buft_overrides) == 8);
    assert!(mem::offset_of!(LlamaModelParams, n_gpu_layers) == 16);
    assert!(mem::offset_of!(LlamaModelParams, split_mode) == 20);
    assert!(mem::offset_of!(LlamaModelParams, main_gpu) == 24);
    assert!(mem::offset_of!(LlamaModelParams, tensor_split) == 32);
    assert!(mem::offset_of!(LlamaModelParams, progress_callback) == 40);
    assert!(mem::offset_of!(LlamaModelParams, progress_callback_user_data) == 48);
    assert!(mem::offset_of!(LlamaModelParams, kv_overrides) == 56);
    assert!(mem::offset_of!(LlamaModelParams, vocab_only) == 64);
    assert!(mem::offset_of!(LlamaModelParams, use_mmap) == 65);
    assert!(mem::offset_of!(LlamaModelParams, use_mlock) == 66);
    assert!(mem::offset_of!(LlamaModelParams, check_tensors) == 67);
    assert!(mem::offset_of!(LlamaModelParams, padding1) == 68);
    assert!(mem::offset_of!(LlamaModelParams, padding2) == 72);
};

/// Force-load posture applied on top of the library's defaults: offload every
/// layer the backends will take, mmap the artifact, and skip locking and
/// tensor validation. Every other field keeps its default.
pub fn apply_override_policy(params: &mut LlamaModelParams) {
    params.n_gpu_layers = c_int::MAX;
    params.use_mmap = true;
    params.use_mlock = false;
    params.check_tensors = false;
    params.vocab_only = false;
}

/// A fully spelled-out params value whose load-posture fields all contradict
/// the override policy, so tests can observe the flip.
#[cfg(test)]
pub(crate) fn test_params() -> LlamaModelParams {
    LlamaModelParams {
        devices: std::ptr::null_mut(),
        tensor_buft_overrides: std::ptr::null(),
        n_gpu_layers: 0,
        split_mode: SPLIT_MODE_LAYER,
        main_gpu: 0,
        tensor_split: std::ptr::null(),
        progress_callback: None,
        progress_callback_user_data: std::ptr::null_mut(),
        kv_overrides: std::ptr::null(),
        vocab_only: true,
        use_mmap: false,
        use_mlock: true,
        check_tensors: true,
        padding1: false,
        padding2: 0,
    }
}
