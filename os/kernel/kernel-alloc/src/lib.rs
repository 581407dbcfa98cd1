//! # Physical Page Allocation
//!
//! A zone-based binary buddy allocator and the physical-memory backends the
//! rest of the memory core reads and writes frames through.
//!
//! ```text
//!            alloc_pages(flags, order)
//!                      │
//!        zone preference from GfpFlags
//!                      │
//!   ┌──────────┬───────┴──┬──────────┐
//!   ▼          ▼          ▼          ▼
//!  DMA       Normal    HighMem    Movable     one SpinLock per zone
//!   │
//!   ├─ watermark check (min / low / high by urgency)
//!   ├─ exact-order free list, else split a larger block
//!   └─ free_pages: merge with pfn ^ (1 << order) while the buddy is free
//! ```
//!
//! Every allocated block carries a reference count so the copy-on-write
//! engine can share frames between address spaces; [`BuddyAllocator`]
//! implements [`kernel_vmem::FrameAlloc`] on top of it.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{BuddyAllocator, GfpFlags, RamPhysMapper, ZoneType};
//!
//! let mut buddy = BuddyAllocator::new(RamPhysMapper::new());
//! buddy.add_zone(ZoneType::Normal, 0x1000, 0x2000).unwrap();
//!
//! let block = buddy.alloc_pages(GfpFlags::KERNEL | GfpFlags::ZERO, 2).unwrap();
//! buddy.free_pages(block, 2).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod buddy;
mod error;
mod gfp;
pub mod phys_mapper;
mod zone;

pub use crate::buddy::{BuddyAllocator, BuddyStats};
pub use crate::error::BuddyError;
pub use crate::gfp::{GfpFlags, WatermarkLevel, ZoneType};
pub use crate::phys_mapper::{HhdmPhysMapper, RamPhysMapper};
pub use crate::zone::{Watermarks, ZoneStats};
