//! Defect simulators, one per canonical bug pattern.
//!
//! Simulators are organized by category:
//! - `uninit`: reads of memory that was never written
//! - `dangling`: use-after-return and use-after-free
//! - `leak`: heap blocks that are never released
//! - `static_oob`: out-of-bounds accesses on global and stack arrays
//! - `heap_oob`: out-of-bounds accesses on heap blocks
//!
//! Each invalid access goes through [`read_at`] / [`write_at`], which use
//! volatile operations on an address laundered through `black_box`. That
//! keeps the optimizer from proving the access dead or folding it away.
//! Addresses are formed with wrapping arithmetic so that only the access
//! itself is out of bounds.

use std::cell::UnsafeCell;
use std::hint::black_box;
use std::ptr;

use crate::{CatalogBuilder, HarnessError, Heap};

pub mod dangling;
pub mod heap_oob;
pub mod leak;
pub mod static_oob;
pub mod uninit;

pub use dangling::register_dangling_cases;
pub use heap_oob::register_heap_oob_cases;
pub use leak::register_leak_cases;
pub use static_oob::register_static_oob_cases;
pub use uninit::register_uninit_cases;

/// Everything a simulator may touch besides its own locals and the static
/// region.
pub struct SimContext<'a> {
    pub heap: &'a dyn Heap,
    release_leaks: bool,
}

impl<'a> SimContext<'a> {
    pub fn new(heap: &'a dyn Heap, release_leaks: bool) -> Self {
        Self {
            heap,
            release_leaks,
        }
    }

    /// Guard for the release branches of the leak testcases.
    pub fn release_leaks(&self) -> bool {
        black_box(self.release_leaks)
    }
}

/// Fixed-size process-wide byte array used by the global out-of-bounds cases.
///
/// There is no lock: the dispatcher runs one testcase at a time.
pub(crate) struct StaticRegion<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

// SAFETY: access is serialized by the dispatcher; concurrent use outside it
// is a data race on top of the intended fault.
unsafe impl<const N: usize> Sync for StaticRegion<N> {}

impl<const N: usize> StaticRegion<N> {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }

    pub(crate) const fn len(&self) -> usize {
        N
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.bytes.get().cast()
    }
}

/// Volatile read of `base[index]`.
///
/// # Safety
/// None in general: callers use it precisely to perform invalid reads.
#[inline(never)]
pub(crate) unsafe fn read_at(base: *const u8, index: isize) -> u8 {
    let addr = black_box(base).wrapping_offset(black_box(index));
    unsafe { ptr::read_volatile(addr) }
}

/// Volatile write of `value` to `base[index]`.
///
/// # Safety
/// None in general: callers use it precisely to perform invalid writes.
#[inline(never)]
pub(crate) unsafe fn write_at(base: *mut u8, index: isize, value: u8) {
    let addr = black_box(base).wrapping_offset(black_box(index));
    unsafe { ptr::write_volatile(addr, value) }
}

pub(crate) fn allocation_failed(size: usize) -> HarnessError {
    HarnessError::AllocationFailure { size }
}

pub(crate) fn register_builtin_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    register_uninit_cases(builder)?;
    register_dangling_cases(builder)?;
    register_leak_cases(builder)?;
    register_static_oob_cases(builder)?;
    register_heap_oob_cases(builder)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    static REGION: StaticRegion<4> = StaticRegion::new();

    #[test]
    fn in_bounds_helpers_hit_the_requested_slot() {
        unsafe {
            write_at(REGION.as_mut_ptr(), 1, b'q');
            assert_eq!(read_at(REGION.as_mut_ptr(), 1), b'q');
        }
        assert_eq!(unsafe { read_at(REGION.as_mut_ptr(), 0) }, 0);
        assert_eq!(REGION.len(), 4);
    }
}
