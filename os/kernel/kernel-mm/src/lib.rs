//! # Kernel Memory Core
//!
//! Ties the physical allocator, the virtual memory manager and the
//! compression pools into one context the rest of the kernel holds on to.
//!
//! ```text
//!                 ┌──────────────────── MemoryCore ────────────────────┐
//!  fault/syscall ─►  AddressSpace ──FrameAlloc──► BuddyAllocator       │
//!                 │      │                             │               │
//!                 │      └── reclaim / restore ──► Registry ─► pools   │
//!                 └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{RamPhysMapper, ZoneType};
//! use kernel_mm::{MemoryCore, MemoryCoreConfig};
//! use kernel_vmem::{MmapFlags, Prot};
//!
//! let config = MemoryCoreConfig::single(ZoneType::Normal, 0x100, 0x500);
//! let core = MemoryCore::new(RamPhysMapper::new(), &config).unwrap();
//!
//! let mut space = core.new_address_space(1);
//! let addr = space.mmap(None, 0x4000, Prot::READ | Prot::WRITE, MmapFlags::empty()).unwrap();
//! assert_eq!(space.mapped_pages(addr, addr.checked_add(0x4000).unwrap()), 4);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod error;
mod logger;
mod memory_core;

pub use crate::config::{MemoryCoreConfig, ZoneRange};
pub use crate::error::MemoryCoreError;
pub use crate::logger::RingLogger;
pub use crate::memory_core::{FaultOutcome, MemoryCore, Space};
