//! # Virtual Memory Management
//!
//! Per-process address spaces built from three pieces:
//!
//! - a software four-level [`PageTable`] mirroring the x86-64 layout,
//! - an ordered set of non-overlapping [`Region`]s describing what each
//!   virtual range is (heap, stack, mmap, ...) and how it may be accessed,
//! - a copy-on-write engine that shares frames between spaces and splits
//!   them on the first write.
//!
//! ## Collaborators
//!
//! The crate does not own physical memory. It talks to the rest of the
//! kernel through three small traits bundled in a [`MemoryBackend`]:
//!
//! | Trait | Provides |
//! |-------|----------|
//! | [`FrameAlloc`] | 4 KiB frames and their reference counts (the buddy allocator). |
//! | [`PhysMapper`] | Byte access to a frame's contents (HHDM in the kernel, RAM in tests). |
//! | [`TlbFlush`] | Single-address TLB invalidation on the local core. |
//!
//! ## Concurrency
//!
//! Every mutating operation takes `&mut AddressSpace`, so the borrow checker
//! guarantees a single writer per space. Frame reference counts are the only
//! state shared between spaces and live behind the allocator's own locks.
//!
//! ## Fault flow
//!
//! ```text
//!  #PF ─► handle_page_fault ─► find_region ─┬─► permission check ─► PermissionDenied
//!                                           ├─► write + COW + present ─► handle_cow_fault
//!                                           ├─► not present + LAZY ─► demand-zero page
//!                                           └─► otherwise ─► Fault
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
mod cow;
mod error;
mod fault;
mod heap;
mod mmap;
pub mod page_table;
mod region;
#[cfg(test)]
mod testing;
mod tlb;

pub use crate::address_space::{AddressSpace, MemoryBackend};
pub use crate::cow::{CopyReport, CowResolution, copy_address_space, map_cow_page};
pub use crate::error::VmmError;
pub use crate::fault::{FaultResolution, FaultStats, PageFaultError};
pub use crate::mmap::{MmapFlags, Prot};
pub use crate::page_table::{PageTable, PageTableEntry};
pub use crate::region::{Region, RegionFlags, RegionType};
pub use crate::tlb::{LocalTlb, TlbFlush};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
pub use kernel_memory_addresses::{PAGE_BYTES, PAGE_SIZE, PhysicalFrame, VirtualAddress};

/// Source of 4 KiB physical frames for user pages.
///
/// Frames are reference counted so that copy-on-write can share them. A
/// freshly allocated frame has a count of one; [`release`](Self::release)
/// returns it to the allocator when the count drops to zero.
pub trait FrameAlloc {
    /// Allocate one frame, `None` when memory is exhausted.
    fn alloc_4k(&self) -> Option<PhysicalFrame>;

    /// Add a reference to an allocated frame.
    fn retain(&self, frame: PhysicalFrame);

    /// Drop a reference; returns the remaining count (0 means freed).
    fn release(&self, frame: PhysicalFrame) -> u32;

    /// Current reference count, 0 for free or unknown frames.
    fn ref_count(&self, frame: PhysicalFrame) -> u32;
}

/// Byte-level access to physical frames.
///
/// The kernel implements this through the higher-half direct map; hosted
/// builds and tests back it with ordinary heap memory.
pub trait PhysMapper {
    /// Copy the contents of `frame` into `out`.
    fn read_frame(&self, frame: PhysicalFrame, out: &mut [u8; PAGE_BYTES]);

    /// Overwrite the contents of `frame` with `data`.
    fn write_frame(&self, frame: PhysicalFrame, data: &[u8; PAGE_BYTES]);

    /// Fill `frame` with zeros.
    fn zero_frame(&self, frame: PhysicalFrame) {
        self.write_frame(frame, &[0; PAGE_BYTES]);
    }

    /// Copy a whole frame.
    fn copy_frame(&self, src: PhysicalFrame, dst: PhysicalFrame) {
        let mut buf = [0; PAGE_BYTES];
        self.read_frame(src, &mut buf);
        self.write_frame(dst, &buf);
    }
}
