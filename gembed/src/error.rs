use thiserror::Error;

/// Errors returned by the embedding pipeline.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("gembed: invalid embedding method {0:?} (use 'fastembed' or 'remote')")]
    InvalidMethod(String),

    #[error("gembed: model not allowed: {0:?}")]
    ModelNotAllowed(String),

    #[error("gembed: input texts cannot be empty")]
    EmptyInput,

    #[error("gembed: native allocation of {size} bytes failed")]
    OutOfMemory { size: usize },

    #[error("gembed: embedding generation failed with code {0}")]
    Generation(i32),

    #[error("gembed: malformed embedding batch: {0}")]
    MalformedBatch(String),

    #[error("gembed: embedding batch has been closed")]
    Closed,

    #[error("gembed: index {index} out of range for {len} embeddings")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("gembed: engine not initialized")]
    NotInitialized,

    #[error("gembed: engine already initialized")]
    AlreadyInitialized,
}

impl EmbedError {
    /// Returns true for errors caused by the request itself, detected
    /// before any native memory was touched.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            EmbedError::InvalidMethod(_) | EmbedError::ModelNotAllowed(_) | EmbedError::EmptyInput
        )
    }

    /// Returns true for contract violations by the calling code.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            EmbedError::Closed
                | EmbedError::IndexOutOfRange { .. }
                | EmbedError::NotInitialized
                | EmbedError::AlreadyInitialized
        )
    }
}
