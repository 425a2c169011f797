//! Heap interface used by the heap-based testcases.
//!
//! Simulators never call the global allocator directly; they go through a
//! [`Heap`] so the harness can account for outstanding blocks and tests can
//! substitute a heap that keeps faulting accesses inside memory they own.

use serde::Serialize;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::HarnessError;

pub trait Heap: Send + Sync {
    /// Returns `None` when the block cannot be provided. Contents are
    /// unspecified.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from `allocate`/`allocate_zeroed` on this heap with the
    /// same `layout`.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

impl<H: Heap + ?Sized> Heap for Arc<H> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(layout)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate_zeroed(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).release(ptr, layout) }
    }
}

/// Layout for a byte buffer of `size` bytes.
pub fn byte_layout(size: usize) -> Result<Layout, HarnessError> {
    Layout::array::<u8>(size).map_err(|_| HarnessError::AllocationFailure { size })
}

/// The process allocator, which is what an address sanitizer intercepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl Heap for SystemHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: non-zero size checked above.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: non-zero size checked above.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub outstanding_blocks: usize,
    pub outstanding_bytes: usize,
    pub total_allocations: usize,
    pub total_releases: usize,
    pub failed_allocations: usize,
}

/// Wraps another heap and keeps running totals of what is still allocated.
pub struct AccountingHeap {
    inner: Box<dyn Heap>,
    outstanding_blocks: AtomicUsize,
    outstanding_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
    total_releases: AtomicUsize,
    failed_allocations: AtomicUsize,
}

impl AccountingHeap {
    pub fn new(inner: impl Heap + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            outstanding_blocks: AtomicUsize::new(0),
            outstanding_bytes: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            total_releases: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
        }
    }

    pub fn system() -> Self {
        Self::new(SystemHeap)
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            outstanding_blocks: self.outstanding_blocks.load(Ordering::SeqCst),
            outstanding_bytes: self.outstanding_bytes.load(Ordering::SeqCst),
            total_allocations: self.total_allocations.load(Ordering::SeqCst),
            total_releases: self.total_releases.load(Ordering::SeqCst),
            failed_allocations: self.failed_allocations.load(Ordering::SeqCst),
        }
    }

    fn on_allocate(&self, result: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        match result {
            Some(_) => {
                self.total_allocations.fetch_add(1, Ordering::SeqCst);
                self.outstanding_blocks.fetch_add(1, Ordering::SeqCst);
                self.outstanding_bytes.fetch_add(size, Ordering::SeqCst);
            }
            None => {
                self.failed_allocations.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }
}

impl Heap for AccountingHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.on_allocate(self.inner.allocate(layout), layout.size())
    }

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.on_allocate(self.inner.allocate_zeroed(layout), layout.size())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.release(ptr, layout) };
        self.total_releases.fetch_add(1, Ordering::SeqCst);
        self.outstanding_blocks.fetch_sub(1, Ordering::SeqCst);
        self.outstanding_bytes.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}
