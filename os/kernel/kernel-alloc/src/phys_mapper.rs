//! # Physical memory access
//!
//! Two [`PhysMapper`] implementations:
//!
//! - [`HhdmPhysMapper`] reaches frames through the kernel's higher-half
//!   direct map, where physical address `pa` is visible at `base + pa`.
//! - [`RamPhysMapper`] keeps frame contents in ordinary heap memory. Frames
//!   that were never written read back as zeros. Hosted builds and tests use
//!   it in place of real RAM.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use kernel_memory_addresses::{PAGE_BYTES, PhysicalFrame};
use kernel_sync::SpinLock;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
pub struct HhdmPhysMapper {
    base: u64,
}

impl HhdmPhysMapper {
    /// # Safety
    /// Every frame handed to this mapper must be mapped, readable and
    /// writable at `base + frame.start_address()`.
    #[must_use]
    pub const unsafe fn new(base: u64) -> Self {
        Self { base }
    }

    const fn ptr(&self, frame: PhysicalFrame) -> *mut u8 {
        (self.base + frame.start_address()) as *mut u8
    }
}

impl PhysMapper for HhdmPhysMapper {
    fn read_frame(&self, frame: PhysicalFrame, out: &mut [u8; PAGE_BYTES]) {
        // SAFETY: `new` requires the direct map to cover every frame.
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr(frame), out.as_mut_ptr(), PAGE_BYTES);
        }
    }

    fn write_frame(&self, frame: PhysicalFrame, data: &[u8; PAGE_BYTES]) {
        // SAFETY: as above.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(frame), PAGE_BYTES);
        }
    }

    fn zero_frame(&self, frame: PhysicalFrame) {
        // SAFETY: as above.
        unsafe {
            core::ptr::write_bytes(self.ptr(frame), 0, PAGE_BYTES);
        }
    }
}

/// Heap-backed, sparsely populated physical memory.
#[derive(Default)]
pub struct RamPhysMapper {
    frames: SpinLock<BTreeMap<u64, Box<[u8; PAGE_BYTES]>>>,
}

impl RamPhysMapper {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Number of frames that hold non-default contents.
    pub fn populated(&self) -> usize {
        self.frames.with_lock(|frames| frames.len())
    }
}

impl PhysMapper for RamPhysMapper {
    fn read_frame(&self, frame: PhysicalFrame, out: &mut [u8; PAGE_BYTES]) {
        self.frames.with_lock(|frames| match frames.get(&frame.number()) {
            Some(data) => out.copy_from_slice(&data[..]),
            None => out.fill(0),
        });
    }

    fn write_frame(&self, frame: PhysicalFrame, data: &[u8; PAGE_BYTES]) {
        self.frames.with_lock(|frames| {
            frames
                .entry(frame.number())
                .or_insert_with(|| Box::new([0; PAGE_BYTES]))
                .copy_from_slice(data);
        });
    }

    fn zero_frame(&self, frame: PhysicalFrame) {
        self.frames.with_lock(|frames| frames.remove(&frame.number()));
    }
}
