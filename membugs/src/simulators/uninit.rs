//! Uninitialized memory reads.

use std::hint::black_box;
use std::mem::MaybeUninit;
use std::ptr;
use tracing::{debug, info};

use super::{allocation_failed, read_at, SimContext};
use crate::heap::byte_layout;
use crate::{AccessMode, BugDescriptor, Category, CatalogBuilder, Detector, Direction};
use crate::{HarnessError, Outcome, Region};

const HEAP_UMR_LEN: usize = 42;
const HEAP_UMR_PEEK: isize = 40;

/// Reads an `i32` local that was never written. The bits are whatever the
/// stack slot last held, so repeated calls may differ.
#[inline(never)]
fn uninitialized_local() -> i32 {
    let slot = MaybeUninit::<i32>::uninit();
    // SAFETY: none, this read is the defect.
    let value = unsafe { ptr::read_volatile(black_box(slot.as_ptr())) };
    black_box(value)
}

fn umr_read(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: uninitialized stack read");
    let value = uninitialized_local();
    debug!(value, "read uninitialized local");
    Ok(Outcome::Value {
        value: i64::from(value),
    })
}

fn umr_heap_read(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: uninitialized heap read");
    let layout = byte_layout(HEAP_UMR_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(HEAP_UMR_LEN))?;

    // In bounds, but the block was never written.
    let value = unsafe { read_at(block.as_ptr(), HEAP_UMR_PEEK) };
    debug!(value, "read uninitialized heap byte");

    unsafe { ctx.heap.release(block, layout) };
    Ok(Outcome::Bytes { bytes: vec![value] })
}

pub fn register_uninit_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    builder.register(BugDescriptor {
        id: "umr-read",
        category: Category::UninitializedRead,
        region: Region::Stack,
        access: Some(AccessMode::Read),
        direction: Direction::None,
        expected_detector: Detector::CompilerWarning,
        summary: "read an int local before anything was written to it",
        invoke: umr_read,
    })?;
    builder.register(BugDescriptor {
        id: "umr-heap-read",
        category: Category::UninitializedRead,
        region: Region::Heap,
        access: Some(AccessMode::Read),
        direction: Direction::None,
        expected_detector: Detector::Undetectable,
        summary: "read a byte of a fresh, never-written 42-byte heap block",
        invoke: umr_heap_read,
    })?;
    Ok(())
}
