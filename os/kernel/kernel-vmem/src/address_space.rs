//! # Address Space
//!
//! One process's view of virtual memory: its regions, its page table and the
//! heap/stack/mmap cursors. Region bookkeeping and page mapping are kept in
//! lock-step here; the heap, mmap, COW and fault paths build on the helpers
//! in this module.

use crate::fault::FaultStats;
use crate::info::{MMAP_BASE, USER_HEAP_BASE, USER_STACK_TOP};
use crate::page_table::{PageTable, PageTableEntry};
use crate::region::{Region, RegionFlags, RegionType};
use crate::{FrameAlloc, PhysMapper, TlbFlush, VmmError};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_BYTES, PhysicalFrame, VirtualAddress};

/// The kernel services an address space draws on.
pub struct MemoryBackend<'m, A: FrameAlloc, M: PhysMapper> {
    pub frames: &'m A,
    pub mapper: &'m M,
    pub tlb: &'m dyn TlbFlush,
}

impl<A: FrameAlloc, M: PhysMapper> Clone for MemoryBackend<'_, A, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: FrameAlloc, M: PhysMapper> Copy for MemoryBackend<'_, A, M> {}

impl<'m, A: FrameAlloc, M: PhysMapper> MemoryBackend<'m, A, M> {
    pub const fn new(frames: &'m A, mapper: &'m M, tlb: &'m dyn TlbFlush) -> Self {
        Self {
            frames,
            mapper,
            tlb,
        }
    }
}

/// A process address space.
///
/// Dropping the space unmaps every page and releases its frame reference.
pub struct AddressSpace<'m, A: FrameAlloc, M: PhysMapper> {
    pub(crate) pid: u32,
    pub(crate) regions: BTreeMap<VirtualAddress, Region>,
    pub(crate) page_table: PageTable,
    pub(crate) heap_start: VirtualAddress,
    pub(crate) heap_end: VirtualAddress,
    pub(crate) stack_top: VirtualAddress,
    pub(crate) mmap_start: VirtualAddress,
    pub(crate) stats: FaultStats,
    pub(crate) backend: MemoryBackend<'m, A, M>,
}

impl<'m, A: FrameAlloc, M: PhysMapper> AddressSpace<'m, A, M> {
    /// An empty space with the default user layout.
    pub fn new(pid: u32, backend: MemoryBackend<'m, A, M>) -> Self {
        log::debug!("creating address space for pid {pid}");
        Self {
            pid,
            regions: BTreeMap::new(),
            page_table: PageTable::new(),
            heap_start: VirtualAddress::new(USER_HEAP_BASE),
            heap_end: VirtualAddress::new(USER_HEAP_BASE),
            stack_top: VirtualAddress::new(USER_STACK_TOP),
            mmap_start: VirtualAddress::new(MMAP_BASE),
            stats: FaultStats::default(),
            backend,
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub const fn heap_start(&self) -> VirtualAddress {
        self.heap_start
    }

    /// Current program break.
    pub const fn heap_end(&self) -> VirtualAddress {
        self.heap_end
    }

    pub const fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    /// Where the next mmap address search begins.
    pub const fn mmap_start(&self) -> VirtualAddress {
        self.mmap_start
    }

    pub const fn stats(&self) -> &FaultStats {
        &self.stats
    }

    pub const fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub const fn backend(&self) -> MemoryBackend<'m, A, M> {
        self.backend
    }

    /// Regions in ascending address order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The region containing `va`.
    pub fn find_region(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions
            .range(..=va)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(va))
    }

    pub(crate) fn region_key_containing(&self, va: VirtualAddress) -> Option<VirtualAddress> {
        self.find_region(va).map(Region::start)
    }

    /// Start addresses of every region intersecting `[start, end)`.
    pub(crate) fn overlapping(&self, start: VirtualAddress, end: VirtualAddress) -> Vec<VirtualAddress> {
        self.regions
            .values()
            .filter(|r| r.overlaps(start, end))
            .map(Region::start)
            .collect()
    }

    pub(crate) fn is_range_free(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        !self.regions.values().any(|r| r.overlaps(start, end))
    }

    /// Insert a region covering `[start, end)`.
    ///
    /// # Errors
    /// - [`VmmError::InvalidSize`] for an empty or inverted range.
    /// - [`VmmError::InvalidAddress`] if a bound is not page aligned.
    /// - [`VmmError::Exists`] if the range overlaps an existing region.
    pub fn create_region(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
        flags: RegionFlags,
        kind: RegionType,
        name: &str,
    ) -> Result<(), VmmError> {
        if start >= end {
            return Err(VmmError::InvalidSize);
        }
        if !start.is_page_aligned() || !end.is_page_aligned() {
            return Err(VmmError::InvalidAddress);
        }
        if !self.is_range_free(start, end) {
            return Err(VmmError::Exists);
        }
        log::trace!("pid {}: region {name} {start}..{end} {flags:?}", self.pid);
        self.regions
            .insert(start, Region::new(start, end, flags, kind, name));
        Ok(())
    }

    /// Unmap every page of the region starting at `start` and remove it.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if no region starts at `start`.
    pub fn destroy_region(&mut self, start: VirtualAddress) -> Result<(), VmmError> {
        let region = self.regions.remove(&start).ok_or(VmmError::NotFound)?;
        let released = self.release_range(region.start, region.end);
        log::trace!(
            "pid {}: destroyed region {} ({released} pages released)",
            self.pid,
            region.name
        );
        Ok(())
    }

    /// Split the region containing `addr` at `addr` rounded down to a page.
    ///
    /// Returns the start of the new tail region.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if no region contains `addr`.
    /// - [`VmmError::InvalidAddress`] if the aligned address is a region bound.
    pub fn split_region(&mut self, addr: VirtualAddress) -> Result<VirtualAddress, VmmError> {
        let key = self.region_key_containing(addr).ok_or(VmmError::NotFound)?;
        let at = addr.align_down();
        let region = self.regions.get_mut(&key).ok_or(VmmError::NotFound)?;
        if at <= region.start || at >= region.end {
            return Err(VmmError::InvalidAddress);
        }

        let mut tail = region.clone();
        tail.start = at;
        region.end = at;
        self.regions.insert(at, tail);
        Ok(at)
    }

    /// Merge the region starting at `b` into the one starting at `a`.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if either region does not exist.
    /// - [`VmmError::InvalidAddress`] if the regions are not adjacent.
    /// - [`VmmError::InvalidFlags`] if flags or type differ.
    pub fn merge_regions(&mut self, a: VirtualAddress, b: VirtualAddress) -> Result<(), VmmError> {
        let second = self.regions.get(&b).ok_or(VmmError::NotFound)?;
        let first = self.regions.get(&a).ok_or(VmmError::NotFound)?;
        if first.end != second.start {
            return Err(VmmError::InvalidAddress);
        }
        if first.flags != second.flags || first.kind != second.kind {
            return Err(VmmError::InvalidFlags);
        }

        let end = second.end;
        self.regions.remove(&b);
        if let Some(first) = self.regions.get_mut(&a) {
            first.end = end;
        }
        Ok(())
    }

    /// Replace the flags of every region in `[addr, addr + size)`.
    ///
    /// Regions straddling the range are split so only the covered part
    /// changes. Mapped pages get new protection bits and a TLB flush.
    ///
    /// # Errors
    /// - [`VmmError::InvalidSize`] for a zero size.
    /// - [`VmmError::NotFound`] if no region intersects the range.
    pub fn protect_region(
        &mut self,
        addr: VirtualAddress,
        size: u64,
        flags: RegionFlags,
    ) -> Result<(), VmmError> {
        self.protect_with(addr, size, |_| flags)
    }

    pub(crate) fn protect_with(
        &mut self,
        addr: VirtualAddress,
        size: u64,
        new_flags: impl Fn(RegionFlags) -> RegionFlags,
    ) -> Result<(), VmmError> {
        let (start, end) = page_range(addr, size)?;
        let keys = self.overlapping(start, end);
        if keys.is_empty() {
            return Err(VmmError::NotFound);
        }

        for key in keys {
            let (r_start, r_end) = match self.regions.get(&key) {
                Some(r) => (r.start, r.end),
                None => continue,
            };
            let mut key = key;
            if r_start < start {
                key = self.split_region(start)?;
            }
            if r_end > end {
                self.split_region(end)?;
            }

            let Some(region) = self.regions.get_mut(&key) else {
                continue;
            };
            region.flags = new_flags(region.flags);
            let (flags, lo, hi) = (region.flags, region.start, region.end);
            self.reprotect_pages(lo, hi, flags)?;
        }
        Ok(())
    }

    fn reprotect_pages(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
        flags: RegionFlags,
    ) -> Result<(), VmmError> {
        let frames = self.backend.frames;
        for (va, entry) in self.page_table.mapped_in(start, end) {
            // A frame still shared copy-on-write must stay read-only.
            let shared = flags.contains(RegionFlags::COW) && frames.ref_count(entry.frame()) > 1;
            let bits = flags.page_entry();
            self.page_table.update(va, |e| {
                e.with_writable(bits.writable() && !shared)
                    .with_user(bits.user())
                    .with_no_execute(bits.no_execute())
            })?;
            self.backend.tlb.flush_page(va);
        }
        Ok(())
    }

    /// Map `frame` at `va` with the page bits implied by `flags`.
    ///
    /// The caller's frame reference moves into the page table.
    ///
    /// # Errors
    /// - [`VmmError::InvalidAddress`] if `va` is not page aligned.
    /// - [`VmmError::Exists`] if `va` is already mapped.
    pub fn map_page(
        &mut self,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: RegionFlags,
    ) -> Result<(), VmmError> {
        if !va.is_page_aligned() {
            return Err(VmmError::InvalidAddress);
        }
        self.page_table.map(va, flags.page_entry().with_frame(frame))
    }

    /// Unmap the page at `va` and drop its frame reference.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if nothing is mapped there.
    pub fn unmap_page(&mut self, va: VirtualAddress) -> Result<PhysicalFrame, VmmError> {
        let va = va.align_down();
        let entry = self.page_table.unmap(va).ok_or(VmmError::NotFound)?;
        self.backend.tlb.flush_page(va);
        self.backend.frames.release(entry.frame());
        Ok(entry.frame())
    }

    /// Physical byte address backing `va`.
    pub fn translate(&self, va: VirtualAddress) -> Option<u64> {
        self.page_table.translate(va)
    }

    /// Leaf page-table entry for `va`, if mapped.
    pub fn query(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        self.page_table.query(va)
    }

    /// Copy the contents of the page containing `va` into `out`.
    ///
    /// Kernel-side access; page protections are not checked.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if the page is not mapped.
    pub fn read_page(&self, va: VirtualAddress, out: &mut [u8; PAGE_BYTES]) -> Result<(), VmmError> {
        let entry = self.page_table.query(va.align_down()).ok_or(VmmError::NotFound)?;
        self.backend.mapper.read_frame(entry.frame(), out);
        Ok(())
    }

    /// Overwrite the page containing `va`.
    ///
    /// Kernel-side access; page protections are not checked, so writing a
    /// copy-on-write page through here changes every sharer.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if the page is not mapped.
    pub fn write_page(&mut self, va: VirtualAddress, data: &[u8; PAGE_BYTES]) -> Result<(), VmmError> {
        let entry = self.page_table.query(va.align_down()).ok_or(VmmError::NotFound)?;
        self.backend.mapper.write_frame(entry.frame(), data);
        Ok(())
    }

    /// Allocate a zeroed frame and map it at `va`.
    pub(crate) fn alloc_and_map(
        &mut self,
        va: VirtualAddress,
        flags: RegionFlags,
    ) -> Result<PhysicalFrame, VmmError> {
        let frames = self.backend.frames;
        let frame = frames.alloc_4k().ok_or(VmmError::OutOfMemory)?;
        self.backend.mapper.zero_frame(frame);
        if let Err(e) = self.map_page(va, frame, flags) {
            frames.release(frame);
            return Err(e);
        }
        Ok(frame)
    }

    /// Unmap every mapped page in `[start, end)`; returns how many.
    pub(crate) fn release_range(&mut self, start: VirtualAddress, end: VirtualAddress) -> usize {
        let mapped = self.page_table.mapped_in(start, end);
        for (va, _) in &mapped {
            if let Some(entry) = self.page_table.unmap(*va) {
                self.backend.tlb.flush_page(*va);
                self.backend.frames.release(entry.frame());
            }
        }
        mapped.len()
    }

    /// Number of pages mapped in `[start, end)`.
    pub fn mapped_pages(&self, start: VirtualAddress, end: VirtualAddress) -> usize {
        self.page_table.mapped_in(start, end).len()
    }
}

impl<A: FrameAlloc, M: PhysMapper> Drop for AddressSpace<'_, A, M> {
    fn drop(&mut self) {
        let frames = self.backend.frames;
        let all = self
            .page_table
            .mapped_in(VirtualAddress::new(0), VirtualAddress::new(crate::info::USERSPACE_END));
        for (_, entry) in &all {
            frames.release(entry.frame());
        }
        log::debug!(
            "destroyed address space of pid {} ({} regions, {} pages)",
            self.pid,
            self.regions.len(),
            all.len()
        );
    }
}

/// Page-aligned `[start, end)` covering `size` bytes at `addr`.
pub(crate) fn page_range(
    addr: VirtualAddress,
    size: u64,
) -> Result<(VirtualAddress, VirtualAddress), VmmError> {
    if size == 0 {
        return Err(VmmError::InvalidSize);
    }
    let end = addr
        .checked_add(size)
        .and_then(VirtualAddress::align_up)
        .ok_or(VmmError::Overflow)?;
    Ok((addr.align_down(), end))
}
