//! Dangling pointers: use-after-return and use-after-free.

use std::hint::black_box;
use std::mem::MaybeUninit;
use tracing::{debug, info};

use super::{allocation_failed, read_at, write_at, SimContext};
use crate::heap::byte_layout;
use crate::{AccessMode, BugDescriptor, Category, CatalogBuilder, Detector, Direction};
use crate::{HarnessError, Outcome, Region};

const UAR_LEN: usize = 64;
const UAR_PEEK: usize = 8;
const UAF_LEN: usize = 64;
const UAF_FILL: u8 = 0xab;

/// Writes `len - 1` bytes of `'x'` followed by a NUL.
///
/// # Safety
/// `base` must be valid for `len` bytes of writes, and `len` must be nonzero.
unsafe fn fill_name(base: *mut u8, len: usize) {
    let mut i = 0;
    while black_box(i) < len - 1 {
        unsafe { write_at(base, i as isize, b'x') };
        i += 1;
    }
    unsafe { write_at(base, i as isize, 0) };
}

/// Fills a stack buffer with `'x'` (NUL terminated) and returns its address.
/// The buffer dies with this frame.
#[inline(never)]
fn escape_local_buffer() -> *const u8 {
    let mut name = MaybeUninit::<[u8; UAR_LEN]>::uninit();
    let base: *mut u8 = black_box(name.as_mut_ptr().cast());
    unsafe { fill_name(base, UAR_LEN) };
    black_box(base.cast_const())
}

fn uar_read(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: use after return");
    let dangling = escape_local_buffer();

    // Read into a fixed array first; anything that grows the stack here may
    // overwrite the dead frame.
    let mut peek = [0u8; UAR_PEEK];
    for (idx, byte) in peek.iter_mut().enumerate() {
        *byte = unsafe { read_at(dangling, idx as isize) };
    }
    debug!(?peek, "read through dangling stack pointer");
    Ok(Outcome::Bytes {
        bytes: peek.to_vec(),
    })
}

fn uaf_read(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: use after free (read)");
    let layout = byte_layout(UAF_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(UAF_LEN))?;
    unsafe {
        std::ptr::write_bytes(block.as_ptr(), UAF_FILL, UAF_LEN);
        ctx.heap.release(block, layout);
    }

    let value = unsafe { read_at(block.as_ptr(), 0) };
    debug!(value, "read released heap byte");
    Ok(Outcome::Bytes { bytes: vec![value] })
}

fn uaf_write(ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: use after free (write)");
    let layout = byte_layout(UAF_LEN)?;
    let block = ctx
        .heap
        .allocate(layout)
        .ok_or_else(|| allocation_failed(UAF_LEN))?;
    unsafe {
        ctx.heap.release(block, layout);
        write_at(block.as_ptr(), 0, b'x');
    }
    Ok(Outcome::Completed)
}

pub fn register_dangling_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    builder.register(BugDescriptor {
        id: "uar-read",
        category: Category::UseAfterReturn,
        region: Region::Stack,
        access: Some(AccessMode::Read),
        direction: Direction::None,
        expected_detector: Detector::CompilerWarning,
        summary: "read a 64-byte stack buffer through the address its function returned",
        invoke: uar_read,
    })?;
    builder.register(BugDescriptor {
        id: "uaf-read",
        category: Category::UseAfterFree,
        region: Region::Heap,
        access: Some(AccessMode::Read),
        direction: Direction::None,
        expected_detector: Detector::Sanitizer,
        summary: "read the first byte of a 64-byte heap block after releasing it",
        invoke: uaf_read,
    })?;
    builder.register(BugDescriptor {
        id: "uaf-write",
        category: Category::UseAfterFree,
        region: Region::Heap,
        access: Some(AccessMode::Write),
        direction: Direction::None,
        expected_detector: Detector::Sanitizer,
        summary: "write the first byte of a 64-byte heap block after releasing it",
        invoke: uaf_write,
    })?;
    Ok(())
}
