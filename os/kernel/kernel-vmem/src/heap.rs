use crate::region::{RegionFlags, RegionType};
use crate::{AddressSpace, FrameAlloc, PhysMapper, VmmError};
use kernel_memory_addresses::VirtualAddress;

/// Flags of a heap region created on demand by [`AddressSpace::expand_heap`].
const HEAP_FLAGS: RegionFlags = RegionFlags::READ
    .union(RegionFlags::WRITE)
    .union(RegionFlags::USER)
    .union(RegionFlags::LAZY);

impl<A: FrameAlloc, M: PhysMapper> AddressSpace<'_, A, M> {
    /// Move the program break by `increment` bytes and return the old break.
    ///
    /// Growing inside an existing heap region maps every newly covered page
    /// right away; growing past the region (or with no region yet) only
    /// extends the region, whose pages are then populated on first touch.
    /// Shrinking unmaps the pages above the new break and trims the region.
    ///
    /// # Errors
    /// - [`VmmError::Overflow`] if the new break wraps around.
    /// - [`VmmError::InvalidArgument`] if the break would leave `[heap_start, stack_top]`.
    /// - [`VmmError::Exists`] if the heap would run into another region.
    /// - [`VmmError::OutOfMemory`] if a page could not be allocated; the break
    ///   and the mappings are left as they were.
    pub fn expand_heap(&mut self, increment: i64) -> Result<VirtualAddress, VmmError> {
        let old_end = self.heap_end;
        let new_end = old_end
            .as_u64()
            .checked_add_signed(increment)
            .map(VirtualAddress::new)
            .ok_or(VmmError::Overflow)?;
        if increment == 0 {
            return Ok(old_end);
        }
        if new_end < self.heap_start {
            return Err(VmmError::InvalidArgument("break below heap start"));
        }
        if new_end > self.stack_top {
            return Err(VmmError::InvalidArgument("break above user space"));
        }

        let old_top = old_end.align_up().ok_or(VmmError::Overflow)?;
        let new_top = new_end.align_up().ok_or(VmmError::Overflow)?;
        let heap = self.heap_region_key(old_end);

        if increment > 0 {
            self.grow_heap(heap, old_top, new_top)?;
        } else {
            self.shrink_heap(heap, old_top, new_top);
        }

        self.heap_end = new_end;
        log::trace!("pid {}: brk {old_end} -> {new_end}", self.pid);
        Ok(old_end)
    }

    /// The heap region that contains or ends at `brk`.
    fn heap_region_key(&self, brk: VirtualAddress) -> Option<VirtualAddress> {
        self.regions
            .values()
            .find(|r| r.kind == RegionType::Heap && r.start <= brk && brk <= r.end)
            .map(|r| r.start)
    }

    fn grow_heap(
        &mut self,
        heap: Option<VirtualAddress>,
        old_top: VirtualAddress,
        new_top: VirtualAddress,
    ) -> Result<(), VmmError> {
        let Some(key) = heap else {
            return self.create_region(self.heap_start, new_top, HEAP_FLAGS, RegionType::Heap, "heap");
        };
        let Some((region_end, flags)) = self.regions.get(&key).map(|r| (r.end, r.flags)) else {
            return Err(VmmError::NotFound);
        };

        if new_top > region_end {
            if !self.is_range_free(region_end, new_top) {
                return Err(VmmError::Exists);
            }
            if let Some(region) = self.regions.get_mut(&key) {
                region.end = new_top;
            }
            return Ok(());
        }

        let mut mapped = alloc::vec::Vec::new();
        for page in old_top.pages_until(new_top) {
            if self.page_table.query(page).is_some() {
                continue;
            }
            match self.alloc_and_map(page, flags) {
                Ok(_) => mapped.push(page),
                Err(e) => {
                    log::debug!("pid {}: heap growth failed at {page}: {e}", self.pid);
                    for page in mapped {
                        let _ = self.unmap_page(page);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn shrink_heap(
        &mut self,
        heap: Option<VirtualAddress>,
        old_top: VirtualAddress,
        new_top: VirtualAddress,
    ) {
        let Some(key) = heap else {
            self.release_range(new_top, old_top);
            return;
        };
        let region_end = self.regions.get(&key).map_or(old_top, |r| r.end);
        self.release_range(new_top, region_end.max(old_top));

        if new_top <= key {
            self.regions.remove(&key);
        } else if let Some(region) = self.regions.get_mut(&key)
            && new_top < region.end
        {
            region.end = new_top;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{CountingTlb, TestFrames, TestRam};
    use crate::{AddressSpace, MemoryBackend, RegionFlags, RegionType, VmmError};
    use kernel_memory_addresses::VirtualAddress;

    const BASE: u64 = crate::info::USER_HEAP_BASE;

    #[test]
    fn first_growth_creates_lazy_heap_region() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));

        let old = space.expand_heap(0x2800).expect("grow");
        assert_eq!(old.as_u64(), BASE);
        assert_eq!(space.heap_end().as_u64(), BASE + 0x2800);

        let heap = space.find_region(VirtualAddress::new(BASE)).expect("heap region");
        assert_eq!(heap.kind(), RegionType::Heap);
        assert_eq!(heap.end().as_u64(), BASE + 0x3000);
        assert!(heap.flags().contains(RegionFlags::LAZY));
        assert_eq!(frames.allocations(), 0);
    }

    #[test]
    fn growth_inside_region_maps_pages_eagerly() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        space
            .create_region(
                VirtualAddress::new(BASE),
                VirtualAddress::new(BASE + 0x4000),
                RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER,
                RegionType::Heap,
                "heap",
            )
            .expect("heap");

        assert_eq!(space.expand_heap(0x3000).map(|v| v.as_u64()), Ok(BASE));
        assert_eq!(frames.allocations(), 3);
        assert_eq!(
            space.mapped_pages(VirtualAddress::new(BASE), VirtualAddress::new(BASE + 0x4000)),
            3
        );
    }

    #[test]
    fn failed_growth_rolls_back() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        space
            .create_region(
                VirtualAddress::new(BASE),
                VirtualAddress::new(BASE + 0x8000),
                RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER,
                RegionType::Heap,
                "heap",
            )
            .expect("heap");

        frames.fail_after(2);
        assert_eq!(space.expand_heap(0x4000), Err(VmmError::OutOfMemory));
        assert_eq!(space.heap_end().as_u64(), BASE);
        assert_eq!(frames.live(), 0);
    }

    #[test]
    fn shrink_unmaps_and_trims() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        space
            .create_region(
                VirtualAddress::new(BASE),
                VirtualAddress::new(BASE + 0x4000),
                RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER,
                RegionType::Heap,
                "heap",
            )
            .expect("heap");
        space.expand_heap(0x4000).expect("grow");
        assert_eq!(frames.live(), 4);

        let old = space.expand_heap(-0x2000).expect("shrink");
        assert_eq!(old.as_u64(), BASE + 0x4000);
        assert_eq!(frames.live(), 2);
        let heap = space.find_region(VirtualAddress::new(BASE)).expect("heap");
        assert_eq!(heap.end().as_u64(), BASE + 0x2000);
    }

    #[test]
    fn rejects_wraparound_and_underflow() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        assert_eq!(space.expand_heap(i64::MIN), Err(VmmError::Overflow));
        assert!(matches!(space.expand_heap(-1), Err(VmmError::InvalidArgument(_))));
        assert!(matches!(space.expand_heap(i64::MAX), Err(VmmError::InvalidArgument(_))));
        assert_eq!(space.heap_end().as_u64(), BASE);
    }

    #[test]
    fn zero_increment_reports_current_break() {
        let (frames, ram, tlb) = (TestFrames::new(), TestRam::default(), CountingTlb::default());
        let mut space = AddressSpace::new(1, MemoryBackend::new(&frames, &ram, &tlb));
        space.expand_heap(0x100).expect("grow");
        assert_eq!(space.expand_heap(0).map(|v| v.as_u64()), Ok(BASE + 0x100));
    }
}
