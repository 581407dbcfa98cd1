//! # Memory Core Configuration
//!
//! Compile-time configuration shared by the buddy allocator, the virtual
//! memory manager and the compression pools. Every value here is a `const`
//! so that the layout is fixed at build time and validated by `const`
//! assertions instead of at boot.
//!
//! ## Modules
//!
//! * [`memory`]: user address-space layout (heap, mmap arena, stack).
//! * [`buddy`]: allocation orders, watermark ratios and the default boot zones.
//! * [`compression`]: pool registry size and admission thresholds.
//!
//! ## User Address Space Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         (unmapped)              │
//! USER_VIRTUAL_BASE     ├─────────────────────────────────┤ 0x0000_0000_0040_0000
//!                       │        Code / Data              │
//! USER_HEAP_BASE        ├─────────────────────────────────┤ 0x0000_0000_0080_0000
//!                       │     Heap (grows upward)         │
//!                       │              ↓                  │
//!                       │                                 │
//! MMAP_BASE             ├─────────────────────────────────┤ USER_STACK_TOP - 1 GiB
//!                       │  mmap arena (first-fit upward)  │
//! MMAP_CEILING          ├─────────────────────────────────┤ USER_STACK_TOP - 64 KiB
//!                       │        Stack guard gap          │
//! USER_STACK_TOP        └─────────────────────────────────┘ 0x0000_7fff_ffff_f000
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod buddy;
pub mod compression;
pub mod memory;
