#![allow(dead_code)]

use membugs::{Heap, ReportMode, SanitizerRuntime};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Sanitizer runtime that records every mode change.
pub struct RecordingSanitizer {
    supported: bool,
    mode: Mutex<ReportMode>,
    pub enables: AtomicUsize,
    pub restores: AtomicUsize,
}

impl RecordingSanitizer {
    pub fn new(supported: bool, mode: ReportMode) -> Arc<Self> {
        Arc::new(Self {
            supported,
            mode: Mutex::new(mode),
            enables: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        })
    }

    pub fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl SanitizerRuntime for RecordingSanitizer {
    fn supports_multi_shot(&self) -> bool {
        self.supported
    }

    fn save_enable_multi_shot(&self) -> ReportMode {
        self.enables.fetch_add(1, Ordering::SeqCst);
        std::mem::replace(&mut *self.mode.lock().unwrap(), ReportMode::MultiShot)
    }

    fn restore_multi_shot(&self, prior: ReportMode) {
        self.restores.fetch_add(1, Ordering::SeqCst);
        *self.mode.lock().unwrap() = prior;
    }

    fn current_mode(&self) -> ReportMode {
        *self.mode.lock().unwrap()
    }
}

pub const GUARD: usize = 64;
pub const POISON: u8 = 0xa5;

struct Block {
    addr: usize,
    size: usize,
    padded: Layout,
    released: bool,
}

#[derive(Debug, Clone)]
pub struct BlockReport {
    pub size: usize,
    pub released: bool,
    /// `size + GUARD` bytes: the block followed by its guard zone.
    pub contents: Vec<u8>,
}

/// Heap that pads every block with a poisoned guard zone and never returns
/// memory before it is dropped, so overflows and use-after-free accesses
/// land in memory the test owns.
pub struct GuardedHeap {
    blocks: Mutex<Vec<Block>>,
}

impl GuardedHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(Vec::new()),
        })
    }

    pub fn blocks(&self) -> Vec<BlockReport> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .map(|block| {
                let len = block.size + GUARD;
                let contents =
                    unsafe { std::slice::from_raw_parts(block.addr as *const u8, len) }.to_vec();
                BlockReport {
                    size: block.size,
                    released: block.released,
                    contents,
                }
            })
            .collect()
    }

    pub fn last_block(&self) -> BlockReport {
        self.blocks().pop().expect("no block was allocated")
    }

    fn carve(&self, layout: Layout, zeroed: bool) -> Option<NonNull<u8>> {
        let padded = Layout::from_size_align(layout.size() + GUARD, layout.align()).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc(padded) })?;
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), POISON, padded.size());
            if zeroed {
                std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size());
            }
        }
        self.blocks.lock().unwrap().push(Block {
            addr: ptr.as_ptr() as usize,
            size: layout.size(),
            padded,
            released: false,
        });
        Some(ptr)
    }
}

impl Heap for GuardedHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.carve(layout, false)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.carve(layout, true)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks
            .iter_mut()
            .find(|block| block.addr == ptr.as_ptr() as usize)
            .expect("release of a block this heap never handed out");
        assert_eq!(block.size, layout.size(), "release with a different layout");
        assert!(!block.released, "double release");
        block.released = true;
    }
}

impl Drop for GuardedHeap {
    fn drop(&mut self) {
        for block in self.blocks.get_mut().unwrap().drain(..) {
            unsafe { alloc::dealloc(block.addr as *mut u8, block.padded) };
        }
    }
}

/// Heap that is always out of memory.
pub struct ExhaustedHeap;

impl Heap for ExhaustedHeap {
    fn allocate(&self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    fn allocate_zeroed(&self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn release(&self, _ptr: NonNull<u8>, _layout: Layout) {
        panic!("nothing was ever allocated");
    }
}
