//! Out-of-bounds accesses on heap blocks.

use std::hint::black_box;
use tracing::{debug, info};

use super::{allocation_failed, read_at, write_at, SimContext};
use crate::heap::byte_layout;
use crate::{AccessMode, BugDescriptor, Category, CatalogBuilder, Detector, Direction};
use crate::{HarnessError, Outcome, Region};

pub const HEAP_OOB_LEN: usize = 123;
pub const SLACK_LEN: usize = 42;
const SLACK_VALID: isize = 40;
// Past the requested size but usually inside the allocator's size class.
const SLACK_INVALID: isize = 50;

fn heap_oob_read(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!(size = HEAP_OOB_LEN, "testcase: heap out-of-bounds read (overflow)");
    let layout = byte_layout(HEAP_OOB_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(HEAP_OOB_LEN))?;

    let value = unsafe { read_at(block.as_ptr(), black_box(HEAP_OOB_LEN as isize)) };
    debug!(value, "read one past the end");

    unsafe { ctx.heap.release(block, layout) };
    Ok(Outcome::Bytes { bytes: vec![value] })
}

fn heap_oob_write(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!(size = HEAP_OOB_LEN, "testcase: heap out-of-bounds write (overflow)");
    let layout = byte_layout(HEAP_OOB_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(HEAP_OOB_LEN))?;

    unsafe {
        write_at(block.as_ptr(), black_box(HEAP_OOB_LEN as isize), b'x');
        ctx.heap.release(block, layout);
    }
    Ok(Outcome::Completed)
}

fn heap_oob_read_slack(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!(size = SLACK_LEN, "testcase: heap out-of-bounds read into allocator slack");
    let layout = byte_layout(SLACK_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(SLACK_LEN))?;

    let valid = unsafe { read_at(block.as_ptr(), SLACK_VALID) };
    let invalid = unsafe { read_at(block.as_ptr(), SLACK_INVALID) };
    debug!(valid, invalid, "slack read");

    unsafe { ctx.heap.release(block, layout) };
    Ok(Outcome::Bytes {
        bytes: vec![valid, invalid],
    })
}

pub fn register_heap_oob_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    builder.register(BugDescriptor {
        id: "heap-oob-read",
        category: Category::OutOfBounds,
        region: Region::Heap,
        access: Some(AccessMode::Read),
        direction: Direction::Overflow,
        expected_detector: Detector::Sanitizer,
        summary: "read one byte past the end of a 123-byte heap block",
        invoke: heap_oob_read,
    })?;
    builder.register(BugDescriptor {
        id: "heap-oob-write",
        category: Category::OutOfBounds,
        region: Region::Heap,
        access: Some(AccessMode::Write),
        direction: Direction::Overflow,
        expected_detector: Detector::Sanitizer,
        summary: "write one byte past the end of a 123-byte heap block",
        invoke: heap_oob_write,
    })?;
    builder.register(BugDescriptor {
        id: "heap-oob-read-slack",
        category: Category::OutOfBounds,
        region: Region::Heap,
        access: Some(AccessMode::Read),
        direction: Direction::Overflow,
        expected_detector: Detector::Sanitizer,
        summary: "read [40] and [50] of a 42-byte heap block; [50] lands in allocator slack",
        invoke: heap_oob_read_slack,
    })?;
    Ok(())
}
