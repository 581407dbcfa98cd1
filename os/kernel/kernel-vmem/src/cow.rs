//! # Copy-on-Write
//!
//! Sharing state lives entirely in the frame reference counts kept by the
//! [`FrameAlloc`]. A shared page is mapped read-only in every space that
//! holds it; the first write faults into [`AddressSpace::handle_cow_fault`],
//! which either takes the page over (last reference) or copies it.

use crate::region::RegionFlags;
use crate::{AddressSpace, FrameAlloc, MemoryBackend, PhysMapper, VmmError};
use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};

/// How a copy-on-write fault was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CowResolution {
    /// The faulting space held the only reference; the page was made writable in place.
    Reused(PhysicalFrame),
    /// The page was copied into a private frame.
    Copied {
        from: PhysicalFrame,
        to: PhysicalFrame,
    },
}

/// Outcome of [`copy_address_space`].
///
/// Per-page failures do not abort the copy; they are counted here.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub regions_copied: usize,
    pub pages_shared: usize,
    pub failed_pages: usize,
}

impl CopyReport {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed_pages == 0
    }
}

/// Share the page at `va` of `src` with `dst`, copy-on-write.
///
/// The source entry loses its write bit, the destination maps the same frame
/// read-only with the remaining bits of `flags`, and the frame gains a
/// reference.
///
/// # Errors
/// - [`VmmError::NotFound`] if `va` is not mapped in `src`.
/// - [`VmmError::Exists`] if `va` is already mapped in `dst`.
pub fn map_cow_page<'m, A: FrameAlloc, M: PhysMapper>(
    dst: &mut AddressSpace<'m, A, M>,
    src: &mut AddressSpace<'m, A, M>,
    va: VirtualAddress,
    flags: RegionFlags,
) -> Result<(), VmmError> {
    let va = va.align_down();
    let entry = src.page_table.update(va, |e| e.with_writable(false))?;
    src.backend.tlb.flush_page(va);

    let frame = entry.frame();
    dst.page_table.map(
        va,
        flags.page_entry().with_writable(false).with_frame(frame),
    )?;
    dst.backend.frames.retain(frame);
    Ok(())
}

/// Duplicate `src` into a new space owned by `pid`, sharing every mapped
/// page copy-on-write.
///
/// Regions are recreated with [`RegionFlags::COW`]; the source regions are
/// tagged as well so writes on either side fault. A page that cannot be
/// shared is skipped and counted in [`CopyReport::failed_pages`].
///
/// # Errors
/// Propagates region creation failures; the partial copy is dropped.
pub fn copy_address_space<'m, A: FrameAlloc, M: PhysMapper>(
    src: &mut AddressSpace<'m, A, M>,
    pid: u32,
) -> Result<(AddressSpace<'m, A, M>, CopyReport), VmmError> {
    let mut dst = AddressSpace::new(pid, src.backend);
    dst.heap_start = src.heap_start;
    dst.heap_end = src.heap_end;
    dst.stack_top = src.stack_top;
    dst.mmap_start = src.mmap_start;

    let mut report = CopyReport::default();
    let keys: Vec<VirtualAddress> = src.regions.keys().copied().collect();
    for key in keys {
        let Some(region) = src.regions.get_mut(&key) else {
            continue;
        };
        region.flags |= RegionFlags::COW;
        let (start, end, flags, kind) = (region.start, region.end, region.flags, region.kind);
        let name = region.name.clone();

        dst.create_region(start, end, flags, kind, &name)?;
        report.regions_copied += 1;

        for (va, _) in src.page_table.mapped_in(start, end) {
            match map_cow_page(&mut dst, src, va, flags) {
                Ok(()) => report.pages_shared += 1,
                Err(e) => {
                    log::debug!("pid {pid}: could not share {va}: {e}");
                    report.failed_pages += 1;
                }
            }
        }
    }

    if report.is_complete() {
        log::debug!(
            "pid {} -> {pid}: copied {} regions, {} shared pages",
            src.pid,
            report.regions_copied,
            report.pages_shared
        );
    } else {
        log::warn!(
            "pid {} -> {pid}: partial copy, {} of {} pages not shared",
            src.pid,
            report.failed_pages,
            report.failed_pages + report.pages_shared
        );
    }
    Ok((dst, report))
}

impl<A: FrameAlloc, M: PhysMapper> AddressSpace<'_, A, M> {
    /// Resolve a write fault on a present, write-protected page.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if the page is not mapped.
    /// - [`VmmError::OutOfMemory`] if a private copy cannot be allocated.
    pub fn handle_cow_fault(&mut self, fault_addr: VirtualAddress) -> Result<CowResolution, VmmError> {
        let va = fault_addr.align_down();
        let entry = self.page_table.query(va).ok_or(VmmError::NotFound)?;
        let MemoryBackend {
            frames,
            mapper,
            tlb,
        } = self.backend;
        let old = entry.frame();
        self.stats.cow_faults += 1;

        if frames.ref_count(old) == 1 {
            self.page_table.update(va, |e| e.with_writable(true))?;
            tlb.flush_page(va);
            log::trace!("pid {}: cow reuse {va} {old:?}", self.pid);
            return Ok(CowResolution::Reused(old));
        }

        let new = frames.alloc_4k().ok_or(VmmError::OutOfMemory)?;
        mapper.copy_frame(old, new);
        self.page_table
            .update(va, |e| e.with_frame(new).with_writable(true))?;
        frames.release(old);
        tlb.flush_page(va);
        log::trace!("pid {}: cow copy {va} {old:?} -> {new:?}", self.pid);
        Ok(CowResolution::Copied { from: old, to: new })
    }
}
