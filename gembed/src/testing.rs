//! Leak accounting and failure injection for tests.
//!
//! [`CountingAllocator`] tracks every live allocation and panics on a free
//! it does not recognise, so a double free fails the test instead of
//! corrupting the heap. [`MockEngine`] is an in-process engine that honours
//! the same ownership contract as the native library.

use std::collections::HashSet;
use std::ffi::CStr;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::alloc::{Allocator, Malloc};
use crate::engine::Engine;
use crate::ffi::{OutputBatch, TextSlice};

/// Wraps [`Malloc`], counting allocations and optionally failing one.
#[derive(Default)]
pub struct CountingAllocator {
    live: Mutex<HashSet<usize>>,
    total: AtomicUsize,
    frees: AtomicUsize,
    // 1-based index of the allocation to fail; 0 never fails.
    fail_at: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th allocation from now on (1-based) return `None`.
    pub fn fail_at(&self, n: usize) {
        let done = self.total.load(Ordering::SeqCst);
        self.fail_at.store(done + n, Ordering::SeqCst);
    }

    /// Number of allocations not yet freed.
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Number of allocation attempts, failed ones included.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

// Delegates to Malloc, which upholds the contract.
unsafe impl Allocator for CountingAllocator {
    fn alloc_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        let n = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            return None;
        }
        let ptr = Malloc.alloc_zeroed(size)?;
        self.live.lock().unwrap().insert(ptr.as_ptr() as usize);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let known = self.live.lock().unwrap().remove(&(ptr.as_ptr() as usize));
        assert!(known, "double free or foreign pointer {ptr:?}");
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { Malloc.free(ptr) };
    }
}

/// Deterministic embedding the mock produces for `text`.
pub fn expected_row(text: &str, dim: usize) -> Vec<f32> {
    let seed = text
        .bytes()
        .fold(17u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
    (0..dim)
        .map(|j| (seed.wrapping_add(j as u32 * 7919) % 1000) as f32 / 1000.0)
        .collect()
}

/// In-process engine with the native library's ownership contract.
///
/// Methods: `fastembed` (id 0) and `remote` (id 1). Models:
/// `example-model` for both, `remote-model` for `remote` only.
pub struct MockEngine {
    heap: CountingAllocator,
    dim: usize,
    status: AtomicI32,
    drop_last_row: AtomicBool,
    validations: AtomicUsize,
    generations: AtomicUsize,
    releases: AtomicUsize,
}

impl MockEngine {
    pub fn new(dim: usize) -> Self {
        Self {
            heap: CountingAllocator::new(),
            dim,
            status: AtomicI32::new(0),
            drop_last_row: AtomicBool::new(false),
            validations: AtomicUsize::new(0),
            generations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Makes `generate` return `status` without writing the output.
    pub fn fail_with(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Makes `generate` succeed with one row fewer than requested.
    pub fn return_short_batch(&self) {
        self.drop_last_row.store(true, Ordering::SeqCst);
    }

    pub fn heap(&self) -> &CountingAllocator {
        &self.heap
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    fn validate_method(&self, method: &CStr) -> i32 {
        self.validations.fetch_add(1, Ordering::SeqCst);
        match method.to_bytes() {
            b"fastembed" => 0,
            b"remote" => 1,
            _ => -1,
        }
    }

    fn validate_model(&self, method_id: i32, model: &CStr) -> i32 {
        self.validations.fetch_add(1, Ordering::SeqCst);
        match (method_id, model.to_bytes()) {
            (0 | 1, b"example-model") => 0,
            (1, b"remote-model") => 1,
            _ => -1,
        }
    }

    unsafe fn generate(
        &self,
        method_id: i32,
        model_id: i32,
        inputs: *const TextSlice,
        n_inputs: usize,
        out: *mut OutputBatch,
    ) -> i32 {
        self.generations.fetch_add(1, Ordering::SeqCst);
        if inputs.is_null() || out.is_null() || method_id < 0 || model_id < 0 {
            return -1;
        }
        let status = self.status.load(Ordering::SeqCst);
        if status != 0 {
            return status;
        }

        let slices = unsafe { std::slice::from_raw_parts(inputs, n_inputs) };
        let mut rows = n_inputs;
        if self.drop_last_row.load(Ordering::SeqCst) {
            rows = rows.saturating_sub(1);
        }

        let Some(data) = self.heap.alloc_zeroed(rows * self.dim * size_of::<f32>()) else {
            return -2;
        };
        let data = data.as_ptr().cast::<f32>();
        for (i, slice) in slices.iter().take(rows).enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(slice.ptr.cast::<u8>(), slice.len) };
            let text = String::from_utf8_lossy(bytes);
            for (j, v) in expected_row(&text, self.dim).into_iter().enumerate() {
                unsafe { data.add(i * self.dim + j).write(v) };
            }
        }

        unsafe {
            out.write(OutputBatch {
                data,
                n_vectors: rows,
                dim: self.dim,
            })
        };
        0
    }

    unsafe fn release_batch(&self, batch: *mut OutputBatch) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let Some(slot) = NonNull::new(batch) else {
            return;
        };
        let filled = unsafe { slot.as_ptr().read() };
        unsafe {
            if let Some(data) = NonNull::new(filled.data) {
                self.heap.free(data.cast());
            }
            self.heap.free(slot.cast());
        }
    }

    fn allocator(&self) -> &dyn Allocator {
        &self.heap
    }
}
