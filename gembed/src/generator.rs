//! One embedding request, end to end.

use std::ffi::CString;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::alloc::NativeBuf;
use crate::batch::EmbeddingBatch;
use crate::engine::Engine;
use crate::error::EmbedError;
use crate::ffi::OutputBatch;
use crate::slice::SliceArray;

/// Generates embeddings for a validated method and model.
///
/// Validation happens once in [`EmbeddingGenerator::new`]; each
/// [`generate`](EmbeddingGenerator::generate) call makes exactly one
/// native generation call and keeps no native memory of its own once it
/// returns.
pub struct EmbeddingGenerator {
    engine: Arc<dyn Engine>,
    method: String,
    model: String,
    method_id: i32,
    model_id: i32,
}

impl EmbeddingGenerator {
    /// Resolves `method` and `model` against the engine.
    ///
    /// Names that cannot be passed as C strings are rejected like unknown ones.
    pub fn new(engine: Arc<dyn Engine>, method: &str, model: &str) -> Result<Self, EmbedError> {
        let method_id = CString::new(method)
            .map(|c| engine.validate_method(&c))
            .unwrap_or(-1);
        if method_id < 0 {
            return Err(EmbedError::InvalidMethod(method.to_string()));
        }

        let model_id = CString::new(model)
            .map(|c| engine.validate_model(method_id, &c))
            .unwrap_or(-1);
        if model_id < 0 {
            return Err(EmbedError::ModelNotAllowed(model.to_string()));
        }

        Ok(Self {
            engine,
            method: method.to_string(),
            model: model.to_string(),
            method_id,
            model_id,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn method_id(&self) -> i32 {
        self.method_id
    }

    pub fn model_id(&self) -> i32 {
        self.model_id
    }

    /// Embeds `texts`. Row `i` of the returned batch belongs to `texts[i]`.
    ///
    /// The input array and the output slot are released on every error
    /// path. On success the slot moves into the returned batch.
    pub fn generate<S: AsRef<str>>(&self, texts: &[S]) -> Result<EmbeddingBatch, EmbedError> {
        if texts.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        debug!(method = %self.method, model = %self.model, inputs = texts.len(), "generating embeddings");

        let heap = self.engine.allocator();
        let inputs = SliceArray::encode(heap, texts)?;
        let slot = NativeBuf::<OutputBatch>::zeroed(heap, 1)?;

        let status = unsafe {
            self.engine.generate(
                self.method_id,
                self.model_id,
                inputs.as_ptr(),
                inputs.len(),
                slot.as_ptr(),
            )
        };
        if status != 0 {
            warn!(status, method = %self.method, model = %self.model, "embedding generation failed");
            return Err(EmbedError::Generation(status));
        }

        // From here the engine's release_batch owns the slot.
        let mut batch = unsafe { EmbeddingBatch::from_filled_slot(self.engine.clone(), slot.into_raw())? };
        drop(inputs);

        if batch.len() != texts.len() {
            warn!(vectors = batch.len(), inputs = texts.len(), "engine returned wrong row count");
            let err = EmbedError::MalformedBatch(format!(
                "{} vectors for {} inputs",
                batch.len(),
                texts.len()
            ));
            batch.close();
            return Err(err);
        }

        debug!(vectors = batch.len(), dim = batch.dimension(), "embeddings generated");
        Ok(batch)
    }

    /// Embeds a single text.
    pub fn generate_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut batch = self.generate(&[text])?;
        let row = batch.embedding(0);
        batch.close();
        row
    }
}
