//! # Software Page Table
//!
//! A four-level radix tree with the x86-64 index split:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! Tables live in an arena owned by the [`PageTable`]; a non-leaf entry stores
//! the arena index of the next-level table in its frame field, a leaf entry
//! stores the physical frame number. Only 4 KiB leaves are used.

use crate::VmmError;
use alloc::boxed::Box;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalFrame, VirtualAddress};

/// Entries per table.
pub const ENTRIES: usize = 512;

const LEVELS: usize = 4;

/// One 64-bit page-table entry, laid out like the hardware format.
///
/// | Bits  | Field |
/// |-------|-------|
/// | 0     | present |
/// | 1     | writable |
/// | 2     | user |
/// | 3     | write-through |
/// | 4     | cache disabled |
/// | 5     | accessed |
/// | 6     | dirty |
/// | 12–51 | frame number (leaf) or table index (non-leaf) |
/// | 63    | no-execute |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    #[bits(5)]
    __: u8,
    #[bits(40)]
    frame_bits: u64,
    #[bits(11)]
    __: u16,
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Leaf entry mapping `frame` with the protection bits of `self`.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalFrame) -> Self {
        self.with_frame_bits(frame.number())
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalFrame {
        PhysicalFrame::new(self.frame_bits())
    }

    /// Present, writable and user-accessible; used for intermediate tables.
    #[inline]
    const fn table_link(index: usize) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_frame_bits(index as u64)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn table_index(&self) -> usize {
        self.frame_bits() as usize
    }
}

type Table = [PageTableEntry; ENTRIES];

/// Split a virtual address into its four table indices (PML4 first).
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn split_indices(va: VirtualAddress) -> [usize; LEVELS] {
    let v = va.as_u64();
    [
        ((v >> 39) & 0x1ff) as usize,
        ((v >> 30) & 0x1ff) as usize,
        ((v >> 21) & 0x1ff) as usize,
        ((v >> 12) & 0x1ff) as usize,
    ]
}

/// Arena-backed four-level page table.
pub struct PageTable {
    tables: Vec<Box<Table>>,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    /// Empty table tree; index 0 is the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: alloc::vec![Box::new([PageTableEntry::new(); ENTRIES])],
        }
    }

    /// Number of tables allocated in the tree, root included.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn walk(&self, va: VirtualAddress) -> Option<(usize, usize)> {
        let idx = split_indices(va);
        let mut table = 0;
        for &i in &idx[..LEVELS - 1] {
            let e = self.tables[table][i];
            if !e.present() {
                return None;
            }
            table = e.table_index();
        }
        Some((table, idx[LEVELS - 1]))
    }

    fn walk_create(&mut self, va: VirtualAddress) -> (usize, usize) {
        let idx = split_indices(va);
        let mut table = 0;
        for &i in &idx[..LEVELS - 1] {
            let e = self.tables[table][i];
            table = if e.present() {
                e.table_index()
            } else {
                let next = self.tables.len();
                self.tables.push(Box::new([PageTableEntry::new(); ENTRIES]));
                self.tables[table][i] = PageTableEntry::table_link(next);
                next
            };
        }
        (table, idx[LEVELS - 1])
    }

    /// The leaf entry for `va`, if its tables exist.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        self.walk(va).map(|(t, i)| self.tables[t][i])
    }

    /// The leaf entry for `va` if it is present.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        self.entry(va).filter(PageTableEntry::present)
    }

    /// Translate a virtual address into a physical byte address.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<u64> {
        self.query(va)
            .map(|e| e.frame().start_address() | (va.as_u64() & ((1 << PAGE_SHIFT) - 1)))
    }

    /// Install a leaf mapping, creating intermediate tables as needed.
    ///
    /// # Errors
    /// [`VmmError::Exists`] if `va` is already mapped.
    pub fn map(&mut self, va: VirtualAddress, entry: PageTableEntry) -> Result<(), VmmError> {
        let (t, i) = self.walk_create(va);
        if self.tables[t][i].present() {
            return Err(VmmError::Exists);
        }
        self.tables[t][i] = entry.with_present(true);
        Ok(())
    }

    /// Clear the leaf for `va`, returning what was there.
    pub fn unmap(&mut self, va: VirtualAddress) -> Option<PageTableEntry> {
        let (t, i) = self.walk(va)?;
        let old = self.tables[t][i];
        if !old.present() {
            return None;
        }
        self.tables[t][i] = PageTableEntry::new();
        Some(old)
    }

    /// Rewrite the present leaf for `va` in place.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if `va` is not mapped.
    pub fn update(
        &mut self,
        va: VirtualAddress,
        f: impl FnOnce(PageTableEntry) -> PageTableEntry,
    ) -> Result<PageTableEntry, VmmError> {
        let (t, i) = self.walk(va).ok_or(VmmError::NotFound)?;
        let old = self.tables[t][i];
        if !old.present() {
            return Err(VmmError::NotFound);
        }
        let new = f(old).with_present(true);
        self.tables[t][i] = new;
        Ok(new)
    }

    /// Present leaves in `[start, end)`, in ascending address order.
    ///
    /// Absent subtrees are skipped without visiting their pages.
    #[must_use]
    pub fn mapped_in(
        &self,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Vec<(VirtualAddress, PageTableEntry)> {
        let mut out = Vec::new();
        self.collect(0, 0, 0, start.as_u64(), end.as_u64(), &mut out);
        out
    }

    fn collect(
        &self,
        table: usize,
        level: usize,
        base: u64,
        start: u64,
        end: u64,
        out: &mut Vec<(VirtualAddress, PageTableEntry)>,
    ) {
        let span = 1u64 << (PAGE_SHIFT as usize + 9 * (LEVELS - 1 - level));
        for (i, e) in self.tables[table].iter().enumerate() {
            if !e.present() {
                continue;
            }
            let lo = base + i as u64 * span;
            if lo + span <= start || lo >= end {
                continue;
            }
            if level == LEVELS - 1 {
                out.push((VirtualAddress::new(lo), *e));
            } else {
                self.collect(e.table_index(), level + 1, lo, start, end, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_rw() -> PageTableEntry {
        PageTableEntry::new()
            .with_writable(true)
            .with_user(true)
            .with_no_execute(true)
    }

    #[test]
    fn split_indices_matches_x86_layout() {
        let va = VirtualAddress::new(0x0000_7fff_ffff_f000);
        assert_eq!(split_indices(va), [255, 511, 511, 511]);
        assert_eq!(split_indices(VirtualAddress::new(0x40_1000)), [0, 0, 2, 1]);
    }

    #[test]
    fn map_creates_intermediate_tables_once() {
        let mut pt = PageTable::new();
        let va = VirtualAddress::new(0x80_0000);
        pt.map(va, user_rw().with_frame(PhysicalFrame::new(0x42)))
            .expect("map");
        assert_eq!(pt.table_count(), 4);

        pt.map(va + 0x1000, user_rw().with_frame(PhysicalFrame::new(0x43)))
            .expect("map neighbor");
        assert_eq!(pt.table_count(), 4);

        assert_eq!(pt.translate(va + 0x123), Some(0x42_123));
        assert_eq!(pt.map(va, user_rw()), Err(VmmError::Exists));
    }

    #[test]
    fn unmap_and_update() {
        let mut pt = PageTable::new();
        let va = VirtualAddress::new(0x1000_0000);
        pt.map(va, user_rw().with_frame(PhysicalFrame::new(7)))
            .expect("map");

        let e = pt.update(va, |e| e.with_writable(false)).expect("update");
        assert!(!e.writable());
        assert_eq!(e.frame(), PhysicalFrame::new(7));

        let old = pt.unmap(va).expect("was mapped");
        assert_eq!(old.frame(), PhysicalFrame::new(7));
        assert!(pt.query(va).is_none());
        assert!(pt.unmap(va).is_none());
        assert_eq!(pt.update(va, |e| e), Err(VmmError::NotFound));
    }

    #[test]
    fn mapped_in_skips_holes_and_respects_bounds() {
        let mut pt = PageTable::new();
        for (n, va) in [0x40_0000u64, 0x40_2000, 0x7fff_0000_0000, 0x7fff_0000_1000]
            .into_iter()
            .enumerate()
        {
            pt.map(
                VirtualAddress::new(va),
                user_rw().with_frame(PhysicalFrame::new(n as u64 + 1)),
            )
            .expect("map");
        }

        let low = pt.mapped_in(VirtualAddress::new(0x40_0000), VirtualAddress::new(0x40_3000));
        let addrs: Vec<_> = low.iter().map(|(va, _)| va.as_u64()).collect();
        assert_eq!(addrs, [0x40_0000, 0x40_2000]);

        let high = pt.mapped_in(
            VirtualAddress::new(0x7fff_0000_1000),
            VirtualAddress::new(0x7fff_0001_0000),
        );
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].1.frame(), PhysicalFrame::new(4));
    }
}
