//! Native allocations with exactly-once release.
//!
//! Every buffer handed across the engine boundary is a [`NativeBuf`]. It
//! frees itself when dropped, so an early return through `?` unwinds every
//! allocation made so far. Ownership leaves the guard only through
//! [`NativeBuf::into_raw`], which transfers the release obligation to the
//! caller.

use std::mem::{self, align_of, size_of};
use std::ptr::{self, NonNull};

use tracing::trace;

use crate::error::EmbedError;
use crate::ffi::{self, OutputBatch, TextSlice};

/// A heap the engine agrees on.
///
/// The engine frees the output struct slot itself, so the slot must come
/// from the allocator the engine expects. See [`crate::Engine::allocator`].
///
/// # Safety
///
/// A pointer returned by `alloc_zeroed(size)` must be valid for reads and
/// writes of `size` bytes, zero-filled, aligned to at least
/// `align_of::<usize>()`, and not overlap any other live allocation.
/// [`NativeBuf`] writes through it without further checks.
///
/// ```compile_fail
/// use std::ptr::NonNull;
/// use gembed::Allocator;
///
/// struct Bump;
///
/// impl Allocator for Bump {
///     fn alloc_zeroed(&self, _size: usize) -> Option<NonNull<u8>> {
///         None
///     }
///     unsafe fn free(&self, _ptr: NonNull<u8>) {}
/// }
/// ```
pub unsafe trait Allocator: Send + Sync {
    /// Allocates `size` zeroed bytes, aligned for any pointer-sized field.
    /// A zero `size` still yields a valid, unique address.
    /// Returns `None` when memory is exhausted.
    fn alloc_zeroed(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases memory obtained from [`Allocator::alloc_zeroed`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator and must not have been freed.
    unsafe fn free(&self, ptr: NonNull<u8>);
}

/// The C heap (`calloc` / `free`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Malloc;

// calloc returns zeroed memory aligned for any fundamental type.
unsafe impl Allocator for Malloc {
    fn alloc_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        // calloc(1, 0) may legally return NULL.
        let p = unsafe { ffi::calloc(1, size.max(1)) };
        NonNull::new(p.cast())
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        unsafe { ffi::free(ptr.as_ptr().cast()) };
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Types for which the all-zero bit pattern is a valid value, so a freshly
/// zeroed buffer can be read back as `Self`.
///
/// Sealed: only the engine's wire types implement it.
///
/// ```compile_fail
/// use std::ptr::NonNull;
/// use gembed::{Malloc, NativeBuf};
///
/// // A zeroed NonNull would be invalid.
/// let buf = NativeBuf::<NonNull<u8>>::zeroed(&Malloc, 1);
/// ```
pub trait ZeroValid: sealed::Sealed + Copy {}

impl sealed::Sealed for u8 {}
impl ZeroValid for u8 {}
impl sealed::Sealed for usize {}
impl ZeroValid for usize {}
impl sealed::Sealed for TextSlice {}
impl ZeroValid for TextSlice {}
impl sealed::Sealed for OutputBatch {}
impl ZeroValid for OutputBatch {}

/// A typed, scoped native allocation of `len` values of `T`.
///
/// The type parameter keeps a slice array from being passed where an
/// output struct is expected.
pub struct NativeBuf<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    alloc: &'a dyn Allocator,
}

impl<'a, T: ZeroValid> NativeBuf<'a, T> {
    /// Allocates zeroed room for `len` values of `T`.
    pub fn zeroed(alloc: &'a dyn Allocator, len: usize) -> Result<Self, EmbedError> {
        let size = size_of::<T>()
            .checked_mul(len)
            .ok_or(EmbedError::OutOfMemory { size: usize::MAX })?;
        let raw = alloc
            .alloc_zeroed(size)
            .ok_or(EmbedError::OutOfMemory { size })?;
        if raw.as_ptr() as usize % align_of::<T>() != 0 {
            unsafe { alloc.free(raw) };
            return Err(EmbedError::OutOfMemory { size });
        }
        trace!(addr = ?raw, size, "native alloc");
        Ok(Self {
            ptr: raw.cast(),
            len,
            alloc,
        })
    }

    /// Writes `value` at element `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn write(&mut self, index: usize, value: T) {
        assert!(index < self.len, "write at {index} past {} elements", self.len);
        unsafe { self.ptr.as_ptr().add(index).write(value) };
    }

    /// Reads the value at element `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len, "read at {index} past {} elements", self.len);
        unsafe { self.ptr.as_ptr().add(index).read() }
    }
}

impl<'a> NativeBuf<'a, u8> {
    /// Allocates a buffer of exactly `bytes.len()` bytes and copies `bytes` in.
    pub fn from_bytes(alloc: &'a dyn Allocator, bytes: &[u8]) -> Result<Self, EmbedError> {
        let buf = Self::zeroed(alloc, bytes.len())?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), buf.ptr.as_ptr(), bytes.len()) };
        Ok(buf)
    }
}

impl<T> NativeBuf<'_, T> {
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Number of `T` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gives up the guard without freeing. The caller now owns the
    /// allocation and must arrange its release.
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T> Drop for NativeBuf<'_, T> {
    fn drop(&mut self) {
        trace!(addr = ?self.ptr, "native free");
        unsafe { self.alloc.free(self.ptr.cast()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingAllocator;

    /// Hands out addresses one byte past a malloc block.
    struct Misaligned;

    unsafe impl Allocator for Misaligned {
        fn alloc_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
            let base = Malloc.alloc_zeroed(size + 1)?;
            NonNull::new(unsafe { base.as_ptr().add(1) })
        }

        unsafe fn free(&self, ptr: NonNull<u8>) {
            unsafe { Malloc.free(NonNull::new_unchecked(ptr.as_ptr().sub(1))) };
        }
    }

    #[test]
    fn malloc_zero_length_is_valid() {
        let buf = NativeBuf::<u8>::zeroed(&Malloc, 0).unwrap();
        assert!(!buf.as_ptr().is_null());
        assert!(buf.is_empty());
    }

    #[test]
    fn zeroed_memory_is_zero() {
        let buf = NativeBuf::<OutputBatch>::zeroed(&Malloc, 1).unwrap();
        let out = buf.read(0);
        assert!(out.data.is_null());
        assert_eq!(out.n_vectors, 0);
        assert_eq!(out.dim, 0);
    }

    #[test]
    fn drop_frees_exactly_once() {
        let alloc = CountingAllocator::new();
        {
            let _a = NativeBuf::<u8>::from_bytes(&alloc, b"hello").unwrap();
            let _b = NativeBuf::<TextSlice>::zeroed(&alloc, 4).unwrap();
            assert_eq!(alloc.live(), 2);
        }
        assert_eq!(alloc.live(), 0);
        assert_eq!(alloc.frees(), 2);
    }

    #[test]
    fn into_raw_transfers_release() {
        let alloc = CountingAllocator::new();
        let buf = NativeBuf::<OutputBatch>::zeroed(&alloc, 1).unwrap();
        let raw = buf.into_raw();
        assert_eq!(alloc.live(), 1);
        unsafe { alloc.free(raw.cast()) };
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn from_bytes_copies() {
        let buf = NativeBuf::<u8>::from_bytes(&Malloc, "héllo".as_bytes()).unwrap();
        assert_eq!(buf.len(), 6);
        let copied = unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
        assert_eq!(copied, "héllo".as_bytes());
    }

    #[test]
    fn exhausted_allocator_reports_size() {
        let alloc = CountingAllocator::new();
        alloc.fail_at(1);
        let err = NativeBuf::<TextSlice>::zeroed(&alloc, 3).err().unwrap();
        assert!(matches!(err, EmbedError::OutOfMemory { size } if size == 3 * size_of::<TextSlice>()));
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn misaligned_allocation_is_rejected() {
        let err = NativeBuf::<usize>::zeroed(&Misaligned, 4).err().unwrap();
        assert!(matches!(err, EmbedError::OutOfMemory { .. }));
        // Byte buffers have no alignment requirement.
        let buf = NativeBuf::<u8>::from_bytes(&Misaligned, b"ok").unwrap();
        assert_eq!(buf.read(1), b'k');
    }

    #[test]
    #[should_panic(expected = "past 2 elements")]
    fn write_out_of_bounds_panics() {
        let mut buf = NativeBuf::<usize>::zeroed(&Malloc, 2).unwrap();
        buf.write(2, 7);
    }
}
