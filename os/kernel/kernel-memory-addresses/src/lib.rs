//! # Physical Frame and Virtual Address Types
//!
//! Strongly typed wrappers for the two kinds of memory coordinates the memory
//! core deals with:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalFrame`] | A physical page frame number (PFN), i.e. `physical address >> 12`. |
//! | [`VirtualAddress`] | A raw 64-bit virtual address inside an address space. |
//!
//! Both are `#[repr(transparent)]` over `u64`, implement `Copy`, `Ord` and
//! `Hash`, and are cheap enough to pass by value everywhere.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0080_1234);
//! assert_eq!(va.align_down().as_u64(), 0x0080_1000);
//! assert_eq!(va.align_up().map(VirtualAddress::as_u64), Some(0x0080_2000));
//!
//! let frame = PhysicalFrame::from_address(0x0010_2000);
//! assert_eq!(frame.number(), 0x102);
//! assert_eq!(frame.start_address(), 0x0010_2000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame;
mod virtual_address;

pub use frame::PhysicalFrame;
pub use virtual_address::{PageIter, VirtualAddress};

/// Size of a base page / frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes, as `usize` for buffer lengths.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
};

/// Align `value` down to a multiple of `align` (power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1234, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Align `value` up to a multiple of `align` (power of two).
///
/// Returns `None` if rounding up would overflow `u64`.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
/// assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
/// assert_eq!(align_up(u64::MAX, 0x1000), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Number of whole pages needed to cover `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}
