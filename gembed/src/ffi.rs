//! Raw FFI declarations for the gembed engine C API.
//!
//! These match the structs and symbols exported by the engine's C header.
//! We hand-write them for the subset we need instead of using bindgen.

use std::os::raw::{c_char, c_float, c_void};
#[cfg(feature = "native")]
use std::os::raw::c_int;

/// `StringSlice` in the C header: `{ const char *ptr; size_t len; }`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TextSlice {
    pub ptr: *const c_char,
    pub len: usize,
}

/// `EmbeddingBatch` in the C header: `{ float *data; size_t n_vectors; size_t dim; }`.
///
/// The struct itself is allocated by the caller; `data` is allocated by the
/// engine and only `free_embedding_batch` may release it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OutputBatch {
    pub data: *mut c_float,
    pub n_vectors: usize,
    pub dim: usize,
}

/// `ByteSlice` in the C header. Only ever passed as NULL from here.
#[cfg(feature = "native")]
#[repr(C)]
pub struct ByteSlice {
    pub ptr: *const u8,
    pub len: usize,
}

/// `InputData` in the C header.
#[cfg(feature = "native")]
#[repr(C)]
pub struct InputData {
    pub input_type: c_int,
    pub binary_data: *const ByteSlice,
    pub n_binary: usize,
    pub text_data: *const TextSlice,
    pub n_text: usize,
}

#[cfg(feature = "native")]
pub const INPUT_TYPE_TEXT: c_int = 0;

// C allocator. The engine frees the output struct with free(), so the slot
// has to come from the same heap.
unsafe extern "C" {
    pub fn calloc(nmemb: usize, size: usize) -> *mut c_void;
    pub fn free(ptr: *mut c_void);
}

#[cfg(feature = "native")]
#[link(name = "gembed")]
unsafe extern "C" {
    pub fn validate_embedding_method(method: *const c_char) -> c_int;
    pub fn validate_embedding_model(method_id: c_int, model: *const c_char, input_type: c_int) -> c_int;
    pub fn generate_embeddings(
        method_id: c_int,
        model_id: c_int,
        input_data: *const InputData,
        out_batch: *mut OutputBatch,
    ) -> c_int;
    pub fn free_embedding_batch(batch: *mut OutputBatch);
}
