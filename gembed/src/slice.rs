//! Encoding texts into the engine's `TextSlice` array.

use std::os::raw::c_char;

use crate::alloc::{Allocator, NativeBuf};
use crate::error::EmbedError;
use crate::ffi::TextSlice;

/// A native array of `TextSlice` plus the UTF-8 buffers it points into.
///
/// Element `i` describes input text `i`. The array and its buffers are
/// freed together when this value is dropped, including when `encode`
/// bails out halfway.
pub struct SliceArray<'a> {
    array: NativeBuf<'a, TextSlice>,
    buffers: Vec<NativeBuf<'a, u8>>,
}

impl<'a> SliceArray<'a> {
    /// Copies `texts` into native memory from `alloc`, preserving order.
    pub fn encode<S: AsRef<str>>(alloc: &'a dyn Allocator, texts: &[S]) -> Result<Self, EmbedError> {
        let mut array = NativeBuf::<TextSlice>::zeroed(alloc, texts.len())?;
        let mut buffers = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            let buf = NativeBuf::from_bytes(alloc, text.as_ref().as_bytes())?;
            array.write(
                i,
                TextSlice {
                    ptr: buf.as_ptr() as *const c_char,
                    len: buf.len(),
                },
            );
            buffers.push(buf);
        }

        Ok(Self { array, buffers })
    }

    /// Address of the first `TextSlice`.
    pub fn as_ptr(&self) -> *const TextSlice {
        self.array.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Returns the descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<TextSlice> {
        (index < self.len()).then(|| self.array.read(index))
    }

    /// Number of native allocations held, array included.
    #[cfg(test)]
    fn allocations(&self) -> usize {
        self.buffers.len() + 1
    }
}
