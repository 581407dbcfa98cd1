use crate::address_space::page_range;
use crate::info::{MMAP_CEILING, USER_VIRTUAL_BASE};
use crate::region::{RegionFlags, RegionType};
use crate::{AddressSpace, FrameAlloc, PhysMapper, VmmError};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, align_up};

bitflags::bitflags! {
    /// Requested page protection for [`AddressSpace::mmap`] and [`AddressSpace::mprotect`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ  = 0x1;
        const WRITE = 0x2;
        const EXEC  = 0x4;
    }
}

bitflags::bitflags! {
    /// Placement and population options for [`AddressSpace::mmap`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        /// Map exactly at the requested address or fail.
        const FIXED  = 0x10;
        /// Do not populate pages up front.
        const LAZY   = 0x20;
        /// Create a shared region.
        const SHARED = 0x40;
    }
}

impl Prot {
    /// Region flags carrying this protection.
    #[must_use]
    pub const fn region_flags(self) -> RegionFlags {
        let mut flags = RegionFlags::empty();
        if self.contains(Self::READ) {
            flags = flags.union(RegionFlags::READ);
        }
        if self.contains(Self::WRITE) {
            flags = flags.union(RegionFlags::WRITE);
        }
        if self.contains(Self::EXEC) {
            flags = flags.union(RegionFlags::EXEC);
        }
        flags
    }
}

const PROTECTION: RegionFlags = RegionFlags::READ
    .union(RegionFlags::WRITE)
    .union(RegionFlags::EXEC);

impl<A: FrameAlloc, M: PhysMapper> AddressSpace<'_, A, M> {
    /// Map `size` bytes of anonymous memory and return the start address.
    ///
    /// With [`MmapFlags::FIXED`] the mapping lands exactly at `addr` or the
    /// call fails. A non-fixed `addr` is a hint; if that range is taken the
    /// arena is searched first-fit instead. Unless [`MmapFlags::LAZY`] is set
    /// every page is allocated and mapped before returning.
    ///
    /// # Errors
    /// - [`VmmError::InvalidSize`] for a zero size.
    /// - [`VmmError::InvalidAddress`] for an unaligned fixed address.
    /// - [`VmmError::Exists`] if a fixed range is occupied.
    /// - [`VmmError::OutOfMemory`] if no gap fits or a page allocation fails.
    pub fn mmap(
        &mut self,
        addr: Option<VirtualAddress>,
        size: u64,
        prot: Prot,
        flags: MmapFlags,
    ) -> Result<VirtualAddress, VmmError> {
        if size == 0 {
            return Err(VmmError::InvalidSize);
        }
        let size = align_up(size, PAGE_SIZE).ok_or(VmmError::Overflow)?;

        let start = match addr {
            Some(addr) if flags.contains(MmapFlags::FIXED) => {
                if !addr.is_page_aligned() {
                    return Err(VmmError::InvalidAddress);
                }
                let end = addr.checked_add(size).ok_or(VmmError::Overflow)?;
                if !self.is_range_free(addr, end) {
                    return Err(VmmError::Exists);
                }
                addr
            }
            Some(hint) if self.hint_usable(hint, size) => hint,
            Some(_) => self.find_free_range(size)?,
            None if flags.contains(MmapFlags::FIXED) => {
                return Err(VmmError::InvalidArgument("fixed mapping without address"));
            }
            None => self.find_free_range(size)?,
        };
        let end = start + size;

        let mut region_flags = prot.region_flags() | RegionFlags::USER;
        let (kind, name) = if flags.contains(MmapFlags::SHARED) {
            region_flags |= RegionFlags::SHARED;
            (RegionType::Shared, "shared")
        } else {
            (RegionType::Mmap, "mmap")
        };
        if flags.contains(MmapFlags::LAZY) {
            region_flags |= RegionFlags::LAZY;
        }

        self.create_region(start, end, region_flags, kind, name)?;

        if !flags.contains(MmapFlags::LAZY) {
            for page in start.pages_until(end) {
                if let Err(e) = self.alloc_and_map(page, region_flags) {
                    log::debug!("pid {}: mmap at {start} failed at {page}: {e}", self.pid);
                    self.destroy_region(start)?;
                    return Err(e);
                }
            }
        }

        if end > self.mmap_start {
            self.mmap_start = end;
        }
        log::trace!("pid {}: mmap {start}..{end} {prot:?} {flags:?}", self.pid);
        Ok(start)
    }

    fn hint_usable(&self, hint: VirtualAddress, size: u64) -> bool {
        hint.is_page_aligned()
            && hint.as_u64() >= USER_VIRTUAL_BASE
            && hint
                .checked_add(size)
                .is_some_and(|end| end.as_u64() <= MMAP_CEILING && self.is_range_free(hint, end))
    }

    /// First gap of `size` bytes at or above the mmap cursor.
    fn find_free_range(&self, size: u64) -> Result<VirtualAddress, VmmError> {
        let mut candidate = self.mmap_start;
        loop {
            let end = candidate.checked_add(size).ok_or(VmmError::OutOfMemory)?;
            if end.as_u64() > MMAP_CEILING {
                return Err(VmmError::OutOfMemory);
            }
            match self.regions.values().find(|r| r.overlaps(candidate, end)) {
                Some(blocker) => candidate = blocker.end,
                None => return Ok(candidate),
            }
        }
    }

    /// Remove every mapping in `[addr, addr + size)`.
    ///
    /// Regions covered entirely are destroyed; partially covered regions are
    /// trimmed at the head or tail, or split around a hole in the middle.
    ///
    /// # Errors
    /// - [`VmmError::InvalidSize`] for a zero size.
    /// - [`VmmError::NotFound`] if no region intersects the range.
    pub fn munmap(&mut self, addr: VirtualAddress, size: u64) -> Result<(), VmmError> {
        let (start, end) = page_range(addr, size)?;
        let keys = self.overlapping(start, end);
        if keys.is_empty() {
            return Err(VmmError::NotFound);
        }

        for key in keys {
            let Some(r_end) = self.regions.get(&key).map(|r| r.end) else {
                continue;
            };
            let head_covered = start <= key;
            let tail_covered = r_end <= end;

            match (head_covered, tail_covered) {
                (true, true) => self.destroy_region(key)?,
                (true, false) => {
                    self.release_range(key, end);
                    if let Some(mut region) = self.regions.remove(&key) {
                        region.start = end;
                        self.regions.insert(end, region);
                    }
                }
                (false, true) => {
                    self.release_range(start, r_end);
                    if let Some(region) = self.regions.get_mut(&key) {
                        region.end = start;
                    }
                }
                (false, false) => {
                    let middle = self.split_region(start)?;
                    self.split_region(end)?;
                    self.destroy_region(middle)?;
                }
            }
        }
        log::trace!("pid {}: munmap {start}..{end}", self.pid);
        Ok(())
    }

    /// Change the read/write/exec protection of `[addr, addr + size)`.
    ///
    /// Other region flags (user, COW, lazy, ...) are kept.
    ///
    /// # Errors
    /// As [`protect_region`](Self::protect_region).
    pub fn mprotect(&mut self, addr: VirtualAddress, size: u64, prot: Prot) -> Result<(), VmmError> {
        self.protect_with(addr, size, |old| old.difference(PROTECTION) | prot.region_flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use crate::info::MMAP_BASE;
    use crate::testing::{CountingTlb, TestFrames, TestRam};

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn anonymous_mapping_is_placed_at_arena_and_populated() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));

        let a = space
            .mmap(None, 0x2001, Prot::READ | Prot::WRITE, MmapFlags::empty())
            .expect("mmap");
        assert_eq!(a.as_u64(), MMAP_BASE);
        assert_eq!(frames.allocations(), 3);
        assert_eq!(space.mmap_start().as_u64(), MMAP_BASE + 0x3000);

        let region = space.find_region(a).expect("region");
        assert_eq!(region.kind(), RegionType::Mmap);
        assert_eq!(
            region.flags(),
            RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER
        );

        let b = space
            .mmap(None, 0x1000, Prot::READ, MmapFlags::LAZY)
            .expect("second mmap");
        assert_eq!(b.as_u64(), MMAP_BASE + 0x3000);
        assert_eq!(frames.allocations(), 3);
    }

    #[test]
    fn fixed_mapping_must_be_free() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        let at = va(0x1000_0000);
        assert_eq!(
            space.mmap(Some(at), 0x1000, Prot::READ, MmapFlags::FIXED | MmapFlags::LAZY),
            Ok(at)
        );
        assert_eq!(
            space.mmap(Some(at), 0x1000, Prot::READ, MmapFlags::FIXED),
            Err(VmmError::Exists)
        );
        assert_eq!(
            space.mmap(None, 0x1000, Prot::READ, MmapFlags::FIXED),
            Err(VmmError::InvalidArgument("fixed mapping without address"))
        );
    }

    #[test]
    fn colliding_hint_falls_back_to_search() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        let at = va(0x1000_0000);
        space
            .mmap(Some(at), 0x1000, Prot::READ, MmapFlags::FIXED | MmapFlags::LAZY)
            .expect("fixed");
        let got = space
            .mmap(Some(at), 0x1000, Prot::READ, MmapFlags::LAZY)
            .expect("hinted");
        assert_eq!(got.as_u64(), MMAP_BASE);
    }

    #[test]
    fn search_skips_occupied_ranges() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        space
            .mmap(Some(va(MMAP_BASE + 0x1000)), 0x2000, Prot::READ, MmapFlags::FIXED | MmapFlags::LAZY)
            .expect("blocker");
        space.mmap_start = va(MMAP_BASE);

        let got = space
            .mmap(None, 0x2000, Prot::READ, MmapFlags::LAZY)
            .expect("search");
        assert_eq!(got.as_u64(), MMAP_BASE + 0x3000);
    }

    #[test]
    fn failed_population_destroys_region() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        frames.fail_after(2);
        assert_eq!(
            space.mmap(None, 0x4000, Prot::READ | Prot::WRITE, MmapFlags::empty()),
            Err(VmmError::OutOfMemory)
        );
        assert_eq!(space.region_count(), 0);
        assert_eq!(frames.live(), 0);
        assert_eq!(space.mmap_start().as_u64(), MMAP_BASE);
    }

    #[test]
    fn munmap_middle_splits_region() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        let a = space
            .mmap(None, 0x5000, Prot::READ | Prot::WRITE, MmapFlags::empty())
            .expect("mmap");

        space.munmap(a + 0x1000, 0x2000).expect("munmap");
        let layout: Vec<_> = space
            .regions()
            .map(|r| (r.start() - a, r.end() - a))
            .collect();
        assert_eq!(layout, [(0, 0x1000), (0x3000, 0x5000)]);
        assert_eq!(frames.live(), 3);
    }

    #[test]
    fn munmap_head_tail_and_whole() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        let a = space
            .mmap(None, 0x4000, Prot::READ | Prot::WRITE, MmapFlags::empty())
            .expect("mmap");

        space.munmap(a, 0x1000).expect("head");
        space.munmap(a + 0x3000, 0x1000).expect("tail");
        let layout: Vec<_> = space
            .regions()
            .map(|r| (r.start() - a, r.end() - a))
            .collect();
        assert_eq!(layout, [(0x1000, 0x3000)]);
        assert_eq!(frames.live(), 2);

        space.munmap(a, 0x4000).expect("whole");
        assert_eq!(space.region_count(), 0);
        assert_eq!(frames.live(), 0);
        assert_eq!(space.munmap(a, 0x1000), Err(VmmError::NotFound));
    }

    #[test]
    fn mprotect_keeps_non_protection_flags() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        let a = space
            .mmap(None, 0x1000, Prot::READ | Prot::WRITE, MmapFlags::SHARED)
            .expect("mmap");
        space.mprotect(a, 0x1000, Prot::READ | Prot::EXEC).expect("mprotect");

        let region = space.find_region(a).expect("region");
        assert_eq!(
            region.flags(),
            RegionFlags::READ | RegionFlags::EXEC | RegionFlags::USER | RegionFlags::SHARED
        );
        let pte = space.query(a).expect("mapped");
        assert!(!pte.writable() && !pte.no_execute());
    }
}
