//! Reading the engine's output struct, and the caller-facing batch handle.

use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::EmbedError;
use crate::ffi::OutputBatch;

/// Decoded fields of a filled `OutputBatch`: a row-major
/// `n_vectors x dim` matrix of f32 at `data`.
///
/// Reads borrow the engine's memory, so they are only sound while the
/// batch has not been released. [`EmbeddingBatch`] enforces that.
#[derive(Debug, Clone, Copy)]
pub struct BatchView {
    data: *const f32,
    n_vectors: usize,
    dim: usize,
}

impl BatchView {
    /// Validates the fields of a filled output struct.
    pub fn from_raw(raw: OutputBatch) -> Result<Self, EmbedError> {
        let total = raw
            .n_vectors
            .checked_mul(raw.dim)
            .and_then(|n| n.checked_mul(size_of::<f32>()))
            .ok_or_else(|| {
                EmbedError::MalformedBatch(format!("{} x {} overflows", raw.n_vectors, raw.dim))
            })?;
        if raw.data.is_null() && total > 0 {
            return Err(EmbedError::MalformedBatch(format!(
                "null data for {} x {}",
                raw.n_vectors, raw.dim
            )));
        }
        Ok(Self {
            data: raw.data,
            n_vectors: raw.n_vectors,
            dim: raw.dim,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.n_vectors
    }

    pub fn is_empty(&self) -> bool {
        self.n_vectors == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Copies the whole matrix out, one `Vec` per row.
    ///
    /// # Safety
    ///
    /// The data pointer must still be live.
    pub unsafe fn read_all(&self) -> Vec<Vec<f32>> {
        if self.dim == 0 || self.n_vectors == 0 {
            return vec![Vec::new(); self.n_vectors];
        }
        let flat = unsafe { std::slice::from_raw_parts(self.data, self.n_vectors * self.dim) };
        flat.chunks_exact(self.dim).map(<[f32]>::to_vec).collect()
    }

    /// Copies row `index` out.
    ///
    /// # Safety
    ///
    /// The data pointer must still be live.
    pub unsafe fn read_row(&self, index: usize) -> Result<Vec<f32>, EmbedError> {
        if index >= self.n_vectors {
            return Err(EmbedError::IndexOutOfRange {
                index,
                len: self.n_vectors,
            });
        }
        if self.dim == 0 {
            return Ok(Vec::new());
        }
        let row = unsafe { std::slice::from_raw_parts(self.data.add(index * self.dim), self.dim) };
        Ok(row.to_vec())
    }
}

/// Embeddings returned by the engine, owned until [`EmbeddingBatch::close`].
///
/// Holds the caller-allocated struct slot and the engine-allocated data
/// pointer. Both go back to the engine through a single `release_batch`
/// call; dropping an open batch closes it.
pub struct EmbeddingBatch {
    engine: Arc<dyn Engine>,
    // None once closed.
    slot: Option<NonNull<OutputBatch>>,
    view: BatchView,
}

// The engine is Send + Sync and the slot is exclusively ours.
unsafe impl Send for EmbeddingBatch {}

impl EmbeddingBatch {
    /// Takes over a slot filled by a successful `generate`. If the contents
    /// are malformed the slot is released before the error is returned.
    ///
    /// # Safety
    ///
    /// `slot` must have been filled by a successful `engine.generate` and
    /// not released.
    pub(crate) unsafe fn from_filled_slot(
        engine: Arc<dyn Engine>,
        slot: NonNull<OutputBatch>,
    ) -> Result<Self, EmbedError> {
        let raw = unsafe { slot.as_ptr().read() };
        match BatchView::from_raw(raw) {
            Ok(view) => Ok(Self {
                engine,
                slot: Some(slot),
                view,
            }),
            Err(e) => {
                warn!(error = %e, "releasing malformed batch");
                unsafe { engine.release_batch(slot.as_ptr()) };
                Err(e)
            }
        }
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.view.dim()
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_none()
    }

    /// Returns all embeddings, row `i` for input `i`.
    pub fn embeddings(&self) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.ensure_open()?;
        Ok(unsafe { self.view.read_all() })
    }

    /// Returns the embedding at `index`.
    pub fn embedding(&self, index: usize) -> Result<Vec<f32>, EmbedError> {
        self.ensure_open()?;
        unsafe { self.view.read_row(index) }
    }

    /// Returns the batch to the engine. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(slot) = self.slot.take() {
            debug!(vectors = self.view.len(), dim = self.view.dim(), "releasing embedding batch");
            unsafe { self.engine.release_batch(slot.as_ptr()) };
        }
    }

    fn ensure_open(&self) -> Result<(), EmbedError> {
        if self.slot.is_none() {
            return Err(EmbedError::Closed);
        }
        Ok(())
    }
}

impl Drop for EmbeddingBatch {
    fn drop(&mut self) {
        if self.slot.is_some() {
            warn!("embedding batch dropped without close");
            self.close();
        }
    }
}
