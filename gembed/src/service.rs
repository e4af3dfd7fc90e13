//! The entry point the request layer calls.

use std::sync::Arc;

use crate::engine::{self, Engine};
use crate::error::EmbedError;
use crate::generator::EmbeddingGenerator;

/// Embeds batches of texts and hands back plain matrices.
///
/// No native memory outlives a call: every batch is closed before
/// `embed` returns.
#[derive(Clone)]
pub struct EmbeddingService {
    engine: Arc<dyn Engine>,
}

impl EmbeddingService {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Uses the engine installed with [`engine::install`].
    pub fn from_global() -> Result<Self, EmbedError> {
        Ok(Self::new(engine::global()?))
    }

    /// Returns one row per text, in input order.
    pub fn embed<S: AsRef<str>>(
        &self,
        method: &str,
        model: &str,
        texts: &[S],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let generator = EmbeddingGenerator::new(self.engine.clone(), method, model)?;
        let mut batch = generator.generate(texts)?;
        let rows = batch.embeddings();
        batch.close();
        rows
    }

    /// Returns the embedding of a single text.
    pub fn embed_one(&self, method: &str, model: &str, text: &str) -> Result<Vec<f32>, EmbedError> {
        EmbeddingGenerator::new(self.engine.clone(), method, model)?.generate_one(text)
    }
}
