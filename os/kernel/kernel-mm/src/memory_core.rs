//! # Memory Core
//!
//! The kernel-wide memory context: one buddy allocator, one pool registry
//! and the TLB flusher, plus the paths that move pages between address
//! spaces and compression pools.
//!
//! ```text
//!   reclaim_page:  read page ─► compress_page ─► unmap (frame ref dropped)
//!   restore_page:  alloc frame ─► remove_page ─► write frame ─► map
//! ```
//!
//! Pool entries for user pages are keyed by `(pid, virtual page)` so a
//! page can be found again after its frame has been recycled.

use crate::{MemoryCoreConfig, MemoryCoreError};
use kernel_alloc::{BuddyAllocator, GfpFlags};
use kernel_memory_addresses::{PAGE_BYTES, PhysicalFrame, VirtualAddress};
use kernel_vmem::{
    AddressSpace, CopyReport, FaultResolution, LocalTlb, MemoryBackend, PageFaultError,
    PhysMapper, RegionFlags, VmmError, copy_address_space,
};
use kernel_zpool::{EntryInfo, PageKey, PoolId, Registry};

/// An address space backed by a [`MemoryCore`].
pub type Space<'m, M> = AddressSpace<'m, BuddyAllocator<M>, M>;

/// How [`MemoryCore::handle_page_fault`] resolved a fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The page was brought back from a compression pool.
    Restored(PhysicalFrame),
    /// The address space resolved the fault itself.
    Resolved(FaultResolution),
}

pub struct MemoryCore<M: PhysMapper> {
    frames: BuddyAllocator<M>,
    pools: Registry,
    tlb: LocalTlb,
}

impl<M: PhysMapper> MemoryCore<M> {
    /// Register every zone of `config` on top of `mapper`.
    ///
    /// # Errors
    /// Fails on the first zone the allocator rejects.
    pub fn new(mapper: M, config: &MemoryCoreConfig) -> Result<Self, MemoryCoreError> {
        let mut frames = BuddyAllocator::new(mapper);
        for zone in &config.zones {
            frames.add_zone(zone.kind, zone.start_pfn, zone.end_pfn)?;
        }
        log::info!(
            "memory core: {} zones, {} free pages",
            config.zones.len(),
            frames.free_page_count()
        );
        Ok(Self {
            frames,
            pools: Registry::new(),
            tlb: LocalTlb,
        })
    }

    pub const fn frames(&self) -> &BuddyAllocator<M> {
        &self.frames
    }

    pub const fn pools(&self) -> &Registry {
        &self.pools
    }

    pub fn backend(&self) -> MemoryBackend<'_, BuddyAllocator<M>, M> {
        MemoryBackend::new(&self.frames, self.frames.mapper(), &self.tlb)
    }

    pub fn new_address_space(&self, pid: u32) -> Space<'_, M> {
        AddressSpace::new(pid, self.backend())
    }

    /// Duplicate `parent` for the child `pid`, sharing pages copy-on-write.
    ///
    /// # Errors
    /// Region creation failures in the child; per-page failures are only
    /// counted in the [`CopyReport`].
    pub fn fork<'m>(
        &'m self,
        parent: &mut Space<'m, M>,
        pid: u32,
    ) -> Result<(Space<'m, M>, CopyReport), MemoryCoreError> {
        Ok(copy_address_space(parent, pid)?)
    }

    /// # Errors
    /// See [`BuddyAllocator::alloc_pages`].
    pub fn alloc_pages(
        &self,
        flags: GfpFlags,
        order: usize,
    ) -> Result<PhysicalFrame, MemoryCoreError> {
        Ok(self.frames.alloc_pages(flags, order)?)
    }

    /// # Errors
    /// See [`BuddyAllocator::free_pages`].
    pub fn free_pages(&self, frame: PhysicalFrame, order: usize) -> Result<(), MemoryCoreError> {
        Ok(self.frames.free_pages(frame, order)?)
    }

    /// Compress the resident page at `addr` into `pool` and unmap it.
    ///
    /// A stale entry for the same page is discarded first. On rejection the
    /// page stays mapped and the [`kernel_zpool::ZpoolError::Rejected`]
    /// reason is returned.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if `addr` is outside every region or not mapped.
    /// - [`VmmError::PermissionDenied`] for a [`RegionFlags::LOCKED`] region.
    /// - Any pool error from storing the page.
    pub fn reclaim_page(
        &self,
        space: &mut Space<'_, M>,
        addr: VirtualAddress,
        pool: PoolId,
    ) -> Result<EntryInfo, MemoryCoreError> {
        let va = addr.align_down();
        let region = space.find_region(va).ok_or(VmmError::NotFound)?;
        if region.flags().contains(RegionFlags::LOCKED) {
            return Err(VmmError::PermissionDenied.into());
        }

        let mut page = [0; PAGE_BYTES];
        space.read_page(va, &mut page)?;

        let key = PageKey::from_virtual(space.pid(), va);
        if self.pools.is_page_compressed(pool, key) {
            let mut stale = [0; PAGE_BYTES];
            self.pools.remove_page(pool, key, &mut stale)?;
        }

        let info = self.pools.compress_page(pool, key, &page)?;
        space.unmap_page(va)?;
        log::debug!(
            "pid {}: reclaimed {va} into pool #{} ({} bytes)",
            space.pid(),
            pool.index(),
            info.compressed_size
        );
        Ok(info)
    }

    /// Bring the page at `addr` back from `pool` into a fresh frame.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if `addr` is outside every region.
    /// - [`VmmError::Exists`] if the page is already mapped.
    /// - [`kernel_zpool::ZpoolError::NotCompressed`] if the pool does not hold it.
    /// - [`kernel_alloc::BuddyError::OutOfMemory`] if no frame is available;
    ///   the entry stays in the pool.
    pub fn restore_page(
        &self,
        space: &mut Space<'_, M>,
        addr: VirtualAddress,
        pool: PoolId,
    ) -> Result<PhysicalFrame, MemoryCoreError> {
        let va = addr.align_down();
        let flags = space.find_region(va).ok_or(VmmError::NotFound)?.flags();
        if space.query(va).is_some() {
            return Err(VmmError::Exists.into());
        }

        let key = PageKey::from_virtual(space.pid(), va);
        let frame = self.frames.alloc_pages(GfpFlags::USER, 0)?;
        let mut page = [0; PAGE_BYTES];
        if let Err(e) = self.pools.remove_page(pool, key, &mut page) {
            self.release(frame);
            return Err(e.into());
        }

        self.frames.mapper().write_frame(frame, &page);
        if let Err(e) = space.map_page(va, frame, flags) {
            self.release(frame);
            return Err(e.into());
        }
        log::debug!(
            "pid {}: restored {va} from pool #{} into {frame:?}",
            space.pid(),
            pool.index()
        );
        Ok(frame)
    }

    /// Page-fault entry point that consults `pool` before the address space.
    ///
    /// A non-present fault on a page held by `pool` restores it; everything
    /// else goes to [`AddressSpace::handle_page_fault`].
    ///
    /// # Errors
    /// Restore failures, or whatever the address space reports.
    pub fn handle_page_fault(
        &self,
        space: &mut Space<'_, M>,
        addr: VirtualAddress,
        error: PageFaultError,
        pool: Option<PoolId>,
    ) -> Result<FaultOutcome, MemoryCoreError> {
        if let Some(pool) = pool
            && !error.present()
            && space.find_region(addr).is_some()
            && self
                .pools
                .is_page_compressed(pool, PageKey::from_virtual(space.pid(), addr.align_down()))
        {
            return self.restore_page(space, addr, pool).map(FaultOutcome::Restored);
        }
        Ok(FaultOutcome::Resolved(space.handle_page_fault(addr, error)?))
    }

    fn release(&self, frame: PhysicalFrame) {
        if let Err(e) = self.frames.free_pages(frame, 0) {
            log::warn!("could not release {frame:?}: {e}");
        }
    }
}
