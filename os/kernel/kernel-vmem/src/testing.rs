//! Fakes for the backend traits.

use crate::{FrameAlloc, PhysMapper, TlbFlush};
use kernel_memory_addresses::{PAGE_BYTES, PhysicalFrame, VirtualAddress};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Reference-counting frame source that never reuses a frame number.
pub struct TestFrames {
    next: Cell<u64>,
    limit: Cell<Option<u64>>,
    allocations: Cell<u64>,
    refs: RefCell<HashMap<u64, u32>>,
}

impl TestFrames {
    pub fn new() -> Self {
        Self {
            next: Cell::new(0x100),
            limit: Cell::new(None),
            allocations: Cell::new(0),
            refs: RefCell::new(HashMap::new()),
        }
    }

    /// Allow only `n` more allocations.
    pub fn fail_after(&self, n: u64) {
        self.limit.set(Some(n));
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.get()
    }

    /// Frames currently holding at least one reference.
    pub fn live(&self) -> usize {
        self.refs.borrow().len()
    }
}

impl FrameAlloc for TestFrames {
    fn alloc_4k(&self) -> Option<PhysicalFrame> {
        if let Some(left) = self.limit.get() {
            if left == 0 {
                return None;
            }
            self.limit.set(Some(left - 1));
        }
        let n = self.next.get();
        self.next.set(n + 1);
        self.allocations.set(self.allocations.get() + 1);
        self.refs.borrow_mut().insert(n, 1);
        Some(PhysicalFrame::new(n))
    }

    fn retain(&self, frame: PhysicalFrame) {
        *self
            .refs
            .borrow_mut()
            .get_mut(&frame.number())
            .expect("retain of a free frame") += 1;
    }

    fn release(&self, frame: PhysicalFrame) -> u32 {
        let mut refs = self.refs.borrow_mut();
        let count = refs.get_mut(&frame.number()).expect("release of a free frame");
        *count -= 1;
        let left = *count;
        if left == 0 {
            refs.remove(&frame.number());
        }
        left
    }

    fn ref_count(&self, frame: PhysicalFrame) -> u32 {
        self.refs.borrow().get(&frame.number()).copied().unwrap_or(0)
    }
}

/// Sparse RAM; untouched frames read as zero.
#[derive(Default)]
pub struct TestRam {
    frames: RefCell<HashMap<u64, Box<[u8; PAGE_BYTES]>>>,
}

impl PhysMapper for TestRam {
    fn read_frame(&self, frame: PhysicalFrame, out: &mut [u8; PAGE_BYTES]) {
        match self.frames.borrow().get(&frame.number()) {
            Some(data) => out.copy_from_slice(&data[..]),
            None => out.fill(0),
        }
    }

    fn write_frame(&self, frame: PhysicalFrame, data: &[u8; PAGE_BYTES]) {
        self.frames
            .borrow_mut()
            .insert(frame.number(), Box::new(*data));
    }
}

/// Records every flushed address.
#[derive(Default)]
pub struct CountingTlb {
    flushed: RefCell<Vec<VirtualAddress>>,
}

impl CountingTlb {
    pub fn flushed(&self) -> Vec<VirtualAddress> {
        self.flushed.borrow().clone()
    }
}

impl TlbFlush for CountingTlb {
    fn flush_page(&self, va: VirtualAddress) {
        self.flushed.borrow_mut().push(va);
    }
}
