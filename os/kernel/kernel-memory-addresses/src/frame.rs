use crate::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;

/// Physical page frame number.
///
/// A `PhysicalFrame` names one [`PAGE_SIZE`] frame of physical memory by its
/// index, not its byte address. Zones, the buddy allocator and page-table
/// entries all speak in frame numbers.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::PhysicalFrame;
/// let f = PhysicalFrame::new(0x1000);
/// assert_eq!(f.start_address(), 0x100_0000);
/// assert_eq!(f.offset(3).number(), 0x1003);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct PhysicalFrame(u64);

impl PhysicalFrame {
    #[inline]
    #[must_use]
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// The frame containing the physical byte address `pa`.
    #[inline]
    #[must_use]
    pub const fn from_address(pa: u64) -> Self {
        Self(pa >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0
    }

    /// First physical byte address covered by this frame.
    #[inline]
    #[must_use]
    pub const fn start_address(self) -> u64 {
        self.0 * PAGE_SIZE
    }

    /// The frame `count` frames above this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, count: u64) -> Self {
        Self(self.0 + count)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFN({:#x})", self.0)
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<PhysicalFrame> for u64 {
    #[inline]
    fn from(f: PhysicalFrame) -> Self {
        f.0
    }
}
