use crate::{PAGE_SHIFT, PAGE_SIZE, align_down, align_up};
use core::fmt;
use core::ops::{Add, Sub};

/// Virtual memory address.
///
/// A thin wrapper over a `u64` that marks the value as a virtual address
/// in some address space. Alignment helpers always work on [`PAGE_SIZE`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Page base containing this address.
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0, PAGE_SIZE))
    }

    /// Next page boundary at or above this address, `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match align_up(self.0, PAGE_SIZE) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Virtual page number (`address >> 12`).
    #[inline]
    #[must_use]
    pub const fn page_number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Iterate the page bases in `[self, end)`, stepping one page at a time.
    ///
    /// Both bounds are expected to be page aligned.
    ///
    /// ```rust
    /// # use kernel_memory_addresses::VirtualAddress;
    /// let pages: Vec<_> = VirtualAddress::new(0x1000)
    ///     .pages_until(VirtualAddress::new(0x4000))
    ///     .map(VirtualAddress::as_u64)
    ///     .collect();
    /// assert_eq!(pages, [0x1000, 0x2000, 0x3000]);
    /// ```
    #[inline]
    #[must_use]
    pub const fn pages_until(self, end: Self) -> PageIter {
        PageIter {
            next: self.0,
            end: end.0,
        }
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub for VirtualAddress {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#018x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Iterator over page bases; see [`VirtualAddress::pages_until`].
#[derive(Clone, Debug)]
pub struct PageIter {
    next: u64,
    end: u64,
}

impl Iterator for PageIter {
    type Item = VirtualAddress;

    fn next(&mut self) -> Option<VirtualAddress> {
        if self.next >= self.end {
            return None;
        }
        let va = VirtualAddress(self.next);
        self.next = self.next.saturating_add(PAGE_SIZE);
        Some(va)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        let va = VirtualAddress::new(0x7fff_ffff_f123);
        assert_eq!(va.align_down(), VirtualAddress::new(0x7fff_ffff_f000));
        assert_eq!(va.align_up(), Some(VirtualAddress::new(0x8000_0000_0000)));
        assert!(va.align_down().is_page_aligned());
        assert_eq!(VirtualAddress::new(u64::MAX).align_up(), None);
    }

    #[test]
    fn page_iter_is_empty_for_empty_range() {
        let a = VirtualAddress::new(0x5000);
        assert_eq!(a.pages_until(a).count(), 0);
        assert_eq!(a.pages_until(VirtualAddress::new(0x4000)).count(), 0);
    }

    #[test]
    fn difference_is_byte_count() {
        assert_eq!(VirtualAddress::new(0x3000) - VirtualAddress::new(0x1000), 0x2000);
    }
}
