//! Memory leaks.
//!
//! Both cases put their release behind [`SimContext::release_leaks`], a flag
//! that only exists at run time. With the default configuration the branch
//! is never taken and the block is lost for good.

use std::alloc::Layout;
use std::hint::black_box;
use std::ptr::NonNull;
use tracing::{debug, info};

use super::{allocation_failed, read_at, write_at, SimContext};
use crate::heap::byte_layout;
use crate::{BugDescriptor, Category, CatalogBuilder, Detector, Direction, Heap};
use crate::{HarnessError, Outcome, Region};

const DISCARD_LEN: usize = 1520;
const TRANSFER_LEN: usize = 8;
const TRANSFER_TEXT: &[u8; TRANSFER_LEN] = b"leaky!!\0";

fn leak_owner_discard(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: leak, owner discards block");
    let layout = byte_layout(DISCARD_LEN)?;
    let block = ctx
        .heap
        .allocate_zeroed(layout)
        .ok_or_else(|| allocation_failed(DISCARD_LEN))?;

    if ctx.release_leaks() {
        unsafe { ctx.heap.release(block, layout) };
        return Ok(Outcome::Completed);
    }
    black_box(block);
    Ok(Outcome::Leaked {
        blocks: 1,
        bytes: DISCARD_LEN,
    })
}

/// Allocates and fills a block, then hands it to the caller, who owns it
/// from here on.
#[inline(never)]
fn fill_and_hand_over(heap: &dyn Heap) -> Result<(NonNull<u8>, Layout), HarnessError> {
    let layout = byte_layout(TRANSFER_LEN)?;
    let block = heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(TRANSFER_LEN))?;
    let source = black_box(TRANSFER_TEXT.as_ptr());
    let mut i = 0;
    while black_box(i) < TRANSFER_LEN - 1 {
        unsafe { write_at(block.as_ptr(), i as isize, read_at(source, i as isize)) };
        i += 1;
    }
    unsafe { write_at(block.as_ptr(), i as isize, 0) };
    Ok((block, layout))
}

fn leak_ownership_transfer(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: leak, caller drops ownership");
    let (block, layout) = fill_and_hand_over(ctx.heap)?;

    let mut contents = [0u8; TRANSFER_LEN];
    for (idx, byte) in contents.iter_mut().enumerate() {
        *byte = unsafe { read_at(block.as_ptr(), idx as isize) };
    }
    debug!(
        contents = %String::from_utf8_lossy(&contents[..TRANSFER_LEN - 1]),
        "received block"
    );

    if ctx.release_leaks() {
        unsafe { ctx.heap.release(block, layout) };
        return Ok(Outcome::Bytes {
            bytes: contents.to_vec(),
        });
    }
    black_box(block);
    Ok(Outcome::Leaked {
        blocks: 1,
        bytes: TRANSFER_LEN,
    })
}

pub fn register_leak_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    builder.register(BugDescriptor {
        id: "leak-owner-discard",
        category: Category::MemoryLeak,
        region: Region::Heap,
        access: None,
        direction: Direction::None,
        expected_detector: Detector::Undetectable,
        summary: "allocate 1520 zeroed bytes and never release them",
        invoke: leak_owner_discard,
    })?;
    builder.register(BugDescriptor {
        id: "leak-ownership-transfer",
        category: Category::MemoryLeak,
        region: Region::Heap,
        access: None,
        direction: Direction::None,
        expected_detector: Detector::Undetectable,
        summary: "hand an 8-byte \"leaky!!\" buffer to the caller, which never releases it",
        invoke: leak_ownership_transfer,
    })?;
    Ok(())
}
