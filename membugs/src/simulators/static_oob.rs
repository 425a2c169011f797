//! Out-of-bounds accesses on memory whose size is fixed at compile time:
//! an 8-byte global and a 20-byte stack local.
//!
//! Each case pairs the invalid access with a valid one on the same array.
//! Overflow cases touch `len - δ` and `len + δ`. Underflow cases touch `-δ`
//! and `δ`.
//! The stack arrays are never initialized, so their valid reads are also
//! uninitialized reads.

use std::hint::black_box;
use std::mem::MaybeUninit;
use tracing::{debug, info};

use super::{read_at, write_at, SimContext, StaticRegion};
use crate::{AccessMode, BugDescriptor, Category, CatalogBuilder, Detector, Direction};
use crate::{HarnessError, Outcome, Region, Simulator};

const GLOBAL_LEN: usize = 8;
const GLOBAL_DELTA: isize = 2;
const STACK_LEN: usize = 20;
const STACK_DELTA: isize = 5;

static GLOBAL_ARR: StaticRegion<GLOBAL_LEN> = StaticRegion::new();

// The access patterns take the array as a base pointer and length so the
// global and stack cases share them.

/// Reads `[len - δ]` (valid) then `[len + δ]`.
unsafe fn read_overflow(base: *const u8, len: isize, delta: isize) -> [u8; 2] {
    let valid = unsafe { read_at(base, len - delta) };
    let invalid = unsafe { read_at(base, len + delta) };
    [valid, invalid]
}

/// Writes `valid` to `[len - δ]` then `invalid` to `[len + δ]`.
unsafe fn write_overflow(base: *mut u8, len: isize, delta: isize, valid: u8, invalid: u8) {
    unsafe {
        write_at(base, len - delta, valid);
        write_at(base, len + delta, invalid);
    }
}

/// Reads `[-δ]` then `[δ]` (valid).
unsafe fn read_underflow(base: *const u8, delta: isize) -> [u8; 2] {
    let invalid = unsafe { read_at(base, -delta) };
    let valid = unsafe { read_at(base, delta) };
    [invalid, valid]
}

/// Writes `invalid` to `[-δ]` then `valid` to `[δ]`.
unsafe fn write_underflow(base: *mut u8, delta: isize, invalid: u8, valid: u8) {
    unsafe {
        write_at(base, -delta, invalid);
        write_at(base, delta, valid);
    }
}

fn global_base() -> (*mut u8, isize) {
    (
        black_box(GLOBAL_ARR.as_mut_ptr()),
        black_box(GLOBAL_ARR.len() as isize),
    )
}

fn global_oob_read_overflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: global out-of-bounds read (overflow)");
    let (base, len) = global_base();
    let [valid, invalid] = unsafe { read_overflow(base, len, GLOBAL_DELTA) };
    debug!(valid, invalid, "global overflow read");
    Ok(Outcome::Bytes {
        bytes: vec![valid, invalid],
    })
}

fn global_oob_write_overflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: global out-of-bounds write (overflow)");
    let (base, len) = global_base();
    unsafe { write_overflow(base, len, GLOBAL_DELTA, b'w', b'x') };
    Ok(Outcome::Completed)
}

fn global_oob_read_underflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: global out-of-bounds read (underflow)");
    let (base, _) = global_base();
    let [invalid, valid] = unsafe { read_underflow(base, GLOBAL_DELTA) };
    debug!(invalid, valid, "global underflow read");
    Ok(Outcome::Bytes {
        bytes: vec![invalid, valid],
    })
}

fn global_oob_write_underflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: global out-of-bounds write (underflow)");
    let (base, _) = global_base();
    unsafe { write_underflow(base, GLOBAL_DELTA, b'u', b'v') };
    Ok(Outcome::Completed)
}

// The stack cases keep their array in their own frame; `inline(never)` stops
// it from being merged into the dispatcher's frame.

#[inline(never)]
fn stack_oob_read_overflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: stack out-of-bounds read (overflow)");
    let mut local = MaybeUninit::<[u8; STACK_LEN]>::uninit();
    let base: *mut u8 = black_box(local.as_mut_ptr().cast());
    let len = black_box(STACK_LEN as isize);
    let [valid, invalid] = unsafe { read_overflow(base, len, STACK_DELTA) };
    debug!(valid, invalid, "stack overflow read");
    Ok(Outcome::Bytes {
        bytes: vec![valid, invalid],
    })
}

#[inline(never)]
fn stack_oob_write_overflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: stack out-of-bounds write (overflow)");
    let mut local = MaybeUninit::<[u8; STACK_LEN]>::uninit();
    let base: *mut u8 = black_box(local.as_mut_ptr().cast());
    let len = black_box(STACK_LEN as isize);
    unsafe { write_overflow(base, len, STACK_DELTA, b'y', b'z') };
    black_box(&mut local);
    Ok(Outcome::Completed)
}

#[inline(never)]
fn stack_oob_read_underflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: stack out-of-bounds read (underflow)");
    let mut local = MaybeUninit::<[u8; STACK_LEN]>::uninit();
    let base: *mut u8 = black_box(local.as_mut_ptr().cast());
    let [invalid, valid] = unsafe { read_underflow(base, STACK_DELTA) };
    debug!(invalid, valid, "stack underflow read");
    Ok(Outcome::Bytes {
        bytes: vec![invalid, valid],
    })
}

#[inline(never)]
fn stack_oob_write_underflow(_ctx: &SimContext<'_>) -> Result<Outcome, HarnessError> {
    info!("testcase: stack out-of-bounds write (underflow)");
    let mut local = MaybeUninit::<[u8; STACK_LEN]>::uninit();
    let base: *mut u8 = black_box(local.as_mut_ptr().cast());
    unsafe { write_underflow(base, STACK_DELTA, b'u', b'v') };
    black_box(&mut local);
    Ok(Outcome::Completed)
}

fn oob_case(
    id: &'static str,
    region: Region,
    access: AccessMode,
    direction: Direction,
    summary: &'static str,
    invoke: Simulator,
) -> BugDescriptor {
    BugDescriptor {
        id,
        category: Category::OutOfBounds,
        region,
        access: Some(access),
        direction,
        expected_detector: Detector::Sanitizer,
        summary,
        invoke,
    }
}

pub fn register_static_oob_cases(builder: &mut CatalogBuilder) -> Result<(), HarnessError> {
    use AccessMode::{Read, Write};
    use Direction::{Overflow, Underflow};
    use Region::{Stack, StaticGlobal};

    let cases = [
        oob_case(
            "global-oob-read-overflow",
            StaticGlobal,
            Read,
            Overflow,
            "read 8-byte global at [6] (valid) and [10] (past the end)",
            global_oob_read_overflow,
        ),
        oob_case(
            "global-oob-write-overflow",
            StaticGlobal,
            Write,
            Overflow,
            "write 8-byte global at [6] (valid) and [10] (past the end)",
            global_oob_write_overflow,
        ),
        oob_case(
            "global-oob-read-underflow",
            StaticGlobal,
            Read,
            Underflow,
            "read 8-byte global at [-2] (before the start) and [2] (valid)",
            global_oob_read_underflow,
        ),
        oob_case(
            "global-oob-write-underflow",
            StaticGlobal,
            Write,
            Underflow,
            "write 8-byte global at [-2] (before the start) and [2] (valid)",
            global_oob_write_underflow,
        ),
        oob_case(
            "stack-oob-read-overflow",
            Stack,
            Read,
            Overflow,
            "read 20-byte local at [15] (valid, uninitialized) and [25] (past the end)",
            stack_oob_read_overflow,
        ),
        oob_case(
            "stack-oob-write-overflow",
            Stack,
            Write,
            Overflow,
            "write 20-byte local at [15] (valid) and [25] (past the end)",
            stack_oob_write_overflow,
        ),
        oob_case(
            "stack-oob-read-underflow",
            Stack,
            Read,
            Underflow,
            "read 20-byte local at [-5] (before the start) and [5] (valid, uninitialized)",
            stack_oob_read_underflow,
        ),
        oob_case(
            "stack-oob-write-underflow",
            Stack,
            Write,
            Underflow,
            "write 20-byte local at [-5] (before the start) and [5] (valid)",
            stack_oob_write_underflow,
        ),
    ];

    for case in cases {
        builder.register(case)?;
    }
    Ok(())
}
