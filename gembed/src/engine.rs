//! The engine boundary and the process-wide engine.

use std::ffi::CStr;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::alloc::Allocator;
use crate::error::EmbedError;
use crate::ffi::{OutputBatch, TextSlice};

/// The native embedding engine's call contract.
///
/// Ids returned by the validators are `>= 0` when valid and negative
/// otherwise. Implementations must be safe for concurrent use; every call
/// carries its own buffers.
pub trait Engine: Send + Sync {
    /// Resolves a method name to its id.
    fn validate_method(&self, method: &CStr) -> i32;

    /// Resolves a model name, scoped to a method id.
    fn validate_model(&self, method_id: i32, model: &CStr) -> i32;

    /// Embeds `n_inputs` texts into the caller-allocated struct at `out`.
    /// Returns 0 on success. On failure the contents of `out` are undefined.
    ///
    /// # Safety
    ///
    /// `inputs` must point to `n_inputs` valid `TextSlice`s whose buffers stay
    /// alive for the call, and `out` must point to a writable `OutputBatch`
    /// allocated by [`Engine::allocator`].
    unsafe fn generate(
        &self,
        method_id: i32,
        model_id: i32,
        inputs: *const TextSlice,
        n_inputs: usize,
        out: *mut OutputBatch,
    ) -> i32;

    /// Frees the struct slot and the data it points to.
    ///
    /// # Safety
    ///
    /// `batch` must have been filled by a successful [`Engine::generate`] and
    /// must not have been released before.
    unsafe fn release_batch(&self, batch: *mut OutputBatch);

    /// The heap `release_batch` returns the struct slot to.
    fn allocator(&self) -> &dyn Allocator;
}

static GLOBAL: OnceCell<Arc<dyn Engine>> = OnceCell::new();

/// Installs the process-wide engine. Can only be done once.
pub fn install(engine: Arc<dyn Engine>) -> Result<(), EmbedError> {
    GLOBAL.set(engine).map_err(|_| EmbedError::AlreadyInitialized)
}

/// Returns the process-wide engine.
pub fn global() -> Result<Arc<dyn Engine>, EmbedError> {
    GLOBAL.get().cloned().ok_or(EmbedError::NotInitialized)
}

#[cfg(feature = "native")]
pub use native::NativeEngine;

#[cfg(feature = "native")]
mod native {
    use std::ffi::CStr;
    use std::ptr;
    use std::sync::Arc;

    use once_cell::sync::Lazy;

    use super::Engine;
    use crate::alloc::{Allocator, Malloc};
    use crate::ffi::{self, InputData, OutputBatch, TextSlice};

    /// The linked `libgembed` engine.
    ///
    /// Models are validated for text input only; image and multimodal
    /// inputs are never sent from here.
    pub struct NativeEngine {
        heap: Malloc,
    }

    static SHARED: Lazy<Arc<NativeEngine>> = Lazy::new(|| Arc::new(NativeEngine { heap: Malloc }));

    impl NativeEngine {
        /// Returns the process-wide instance. The library stays loaded for
        /// the life of the process.
        pub fn shared() -> Arc<dyn Engine> {
            let engine: Arc<NativeEngine> = Arc::clone(&SHARED);
            engine
        }
    }

    impl Engine for NativeEngine {
        fn validate_method(&self, method: &CStr) -> i32 {
            unsafe { ffi::validate_embedding_method(method.as_ptr()) }
        }

        fn validate_model(&self, method_id: i32, model: &CStr) -> i32 {
            unsafe { ffi::validate_embedding_model(method_id, model.as_ptr(), ffi::INPUT_TYPE_TEXT) }
        }

        unsafe fn generate(
            &self,
            method_id: i32,
            model_id: i32,
            inputs: *const TextSlice,
            n_inputs: usize,
            out: *mut OutputBatch,
        ) -> i32 {
            if inputs.is_null() || out.is_null() {
                return -1;
            }
            let input_data = InputData {
                input_type: ffi::INPUT_TYPE_TEXT,
                binary_data: ptr::null(),
                n_binary: 0,
                text_data: inputs,
                n_text: n_inputs,
            };
            unsafe { ffi::generate_embeddings(method_id, model_id, &input_data, out) }
        }

        unsafe fn release_batch(&self, batch: *mut OutputBatch) {
            if !batch.is_null() {
                unsafe { ffi::free_embedding_batch(batch) };
            }
        }

        fn allocator(&self) -> &dyn Allocator {
            &self.heap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;

    // The only test in the crate that touches the process-wide engine.
    #[test]
    fn install_once() {
        let engine: Arc<dyn Engine> = Arc::new(MockEngine::new(4));
        install(engine.clone()).unwrap();

        let got = global().unwrap();
        assert!(Arc::ptr_eq(&got, &engine));

        let again = install(Arc::new(MockEngine::new(4)));
        assert!(matches!(again, Err(EmbedError::AlreadyInitialized)));
    }
}
