//! Batch text embeddings over the gembed native engine.
//!
//! Texts are copied into a native `TextSlice` array, handed to the engine in
//! one `generate` call, and read back from the engine's `EmbeddingBatch`
//! struct. Every native allocation is wrapped in a guard that frees it
//! exactly once, whichever way the request exits.
//!
//! # Usage
//!
//! ```no_run
//! use gembed::EmbeddingService;
//!
//! # #[cfg(feature = "native")]
//! # fn main() -> Result<(), gembed::EmbedError> {
//! let service = EmbeddingService::new(gembed::NativeEngine::shared());
//! let rows = service.embed("fastembed", "example-model", &["Hello world", "Another text"])?;
//! assert_eq!(rows.len(), 2);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```
//!
//! # Linking
//!
//! With the `native` feature the crate links `libgembed`. Point the linker
//! at it with `RUSTFLAGS="-L <dir>"`. Without the feature, bring your own
//! [`Engine`].

mod alloc;
mod batch;
mod engine;
mod error;
mod ffi;
mod generator;
mod service;
mod slice;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use alloc::{Allocator, Malloc, NativeBuf, ZeroValid};
pub use batch::{BatchView, EmbeddingBatch};
pub use engine::{Engine, global, install};
#[cfg(feature = "native")]
pub use engine::NativeEngine;
pub use error::EmbedError;
pub use ffi::{OutputBatch, TextSlice};
pub use generator::EmbeddingGenerator;
pub use service::EmbeddingService;
pub use slice::SliceArray;
