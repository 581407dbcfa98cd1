//! # Buddy Allocator
//!
//! Up to [`MAX_ZONES`] zones, each behind its own [`SpinLock`]. An allocation
//! walks the zone preference list of its [`GfpFlags`], locking one zone at a
//! time; no code path ever holds two zone locks.

use crate::zone::{Zone, ZoneStats};
use crate::{BuddyError, GfpFlags, ZoneType};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::buddy::{MAX_ORDER, MAX_ZONES};
use kernel_memory_addresses::PhysicalFrame;
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};

struct ZoneSlot {
    kind: ZoneType,
    start_pfn: u64,
    end_pfn: u64,
    zone: SpinLock<Zone>,
}

impl ZoneSlot {
    const fn contains(&self, pfn: u64) -> bool {
        self.start_pfn <= pfn && pfn < self.end_pfn
    }
}

#[derive(Default)]
struct Counters {
    allocations: AtomicU64,
    frees: AtomicU64,
    failures: AtomicU64,
    coalesces: AtomicU64,
    zone_fallbacks: AtomicU64,
}

/// Allocator-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyStats {
    pub allocations: u64,
    pub frees: u64,
    pub failures: u64,
    /// Buddy merges performed while freeing.
    pub coalesces: u64,
    /// Allocations served by a zone other than the preferred one.
    pub zone_fallbacks: u64,
    pub zones: Vec<ZoneStats>,
}

/// Zone-based binary buddy allocator over physical frames.
///
/// `M` gives access to frame contents for [`GfpFlags::ZERO`] requests.
pub struct BuddyAllocator<M> {
    zones: Vec<ZoneSlot>,
    mapper: M,
    counters: Counters,
}

impl<M: PhysMapper> BuddyAllocator<M> {
    /// An allocator without zones; see [`add_zone`](Self::add_zone).
    pub fn new(mapper: M) -> Self {
        Self {
            zones: Vec::with_capacity(MAX_ZONES),
            mapper,
            counters: Counters::default(),
        }
    }

    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Register the frames `[start_pfn, end_pfn)` as a zone of type `kind`.
    ///
    /// # Errors
    /// - [`BuddyError::InvalidZone`] for an empty range.
    /// - [`BuddyError::TooManyZones`] once [`MAX_ZONES`] zones exist.
    /// - [`BuddyError::DuplicateZone`] if a zone of this type exists.
    /// - [`BuddyError::ZoneOverlap`] if the range intersects another zone.
    pub fn add_zone(&mut self, kind: ZoneType, start_pfn: u64, end_pfn: u64) -> Result<(), BuddyError> {
        if start_pfn >= end_pfn {
            return Err(BuddyError::InvalidZone);
        }
        if self.zones.len() >= MAX_ZONES {
            return Err(BuddyError::TooManyZones);
        }
        if self.zones.iter().any(|z| z.kind == kind) {
            return Err(BuddyError::DuplicateZone(kind));
        }
        if self
            .zones
            .iter()
            .any(|z| start_pfn < z.end_pfn && z.start_pfn < end_pfn)
        {
            return Err(BuddyError::ZoneOverlap);
        }

        let zone = Zone::new(kind, start_pfn, end_pfn)?;
        log::info!(
            "buddy: {kind:?} zone {start_pfn:#x}..{end_pfn:#x} ({} pages)",
            zone.total_pages()
        );
        self.zones.push(ZoneSlot {
            kind,
            start_pfn,
            end_pfn,
            zone: SpinLock::new(zone),
        });
        Ok(())
    }

    /// Allocate `2^order` physically contiguous frames.
    ///
    /// The preferred zone for `flags` is tried first. If it cannot serve the
    /// request and `flags` lacks [`GfpFlags::NOWAIT`], the remaining zones
    /// are tried in preference order.
    ///
    /// # Errors
    /// - [`BuddyError::InvalidOrder`] if `order > MAX_ORDER`.
    /// - [`BuddyError::OutOfMemory`] if no zone could serve the request.
    pub fn alloc_pages(&self, flags: GfpFlags, order: usize) -> Result<PhysicalFrame, BuddyError> {
        if order > MAX_ORDER {
            return Err(BuddyError::InvalidOrder(order));
        }
        let level = flags.watermark_level();

        let candidates = flags
            .zone_preference()
            .iter()
            .filter_map(|kind| self.zones.iter().find(|z| z.kind == *kind));
        for (attempt, slot) in candidates.enumerate() {
            if attempt > 0 && !flags.allows_fallback() {
                break;
            }
            let Some(pfn) = slot.zone.with_lock(|zone| zone.alloc(order, level)) else {
                continue;
            };

            if attempt > 0 {
                self.counters.zone_fallbacks.fetch_add(1, Ordering::Relaxed);
                log::debug!("buddy: order {order} served by fallback {:?} zone", slot.kind);
            }
            self.counters.allocations.fetch_add(1, Ordering::Relaxed);
            let frame = PhysicalFrame::new(pfn);
            if flags.contains(GfpFlags::ZERO) {
                for i in 0..1 << order {
                    self.mapper.zero_frame(frame.offset(i));
                }
            }
            return Ok(frame);
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        log::debug!("buddy: order {order} allocation failed ({flags:?})");
        Err(BuddyError::OutOfMemory)
    }

    /// Return a block obtained from [`alloc_pages`](Self::alloc_pages).
    ///
    /// # Errors
    /// - [`BuddyError::InvalidOrder`] if `order > MAX_ORDER`.
    /// - [`BuddyError::FrameNotInZone`] if no zone owns `frame`.
    /// - [`BuddyError::NotAllocated`] if `frame` does not head an allocated
    ///   block of this order.
    pub fn free_pages(&self, frame: PhysicalFrame, order: usize) -> Result<(), BuddyError> {
        if order > MAX_ORDER {
            return Err(BuddyError::InvalidOrder(order));
        }
        let slot = self.slot(frame)?;
        let merged = slot.zone.with_lock(|zone| zone.free(frame.number(), order))?;
        self.record_free(merged);
        Ok(())
    }

    /// Add a reference to an allocated block; returns the new count.
    ///
    /// # Errors
    /// [`BuddyError::FrameNotInZone`] or [`BuddyError::NotAllocated`].
    pub fn get_page(&self, frame: PhysicalFrame) -> Result<u32, BuddyError> {
        self.slot(frame)?
            .zone
            .with_lock(|zone| zone.get(frame.number()))
    }

    /// Drop a reference; the block returns to its zone at zero.
    ///
    /// Returns the remaining count.
    ///
    /// # Errors
    /// [`BuddyError::FrameNotInZone`] or [`BuddyError::NotAllocated`].
    pub fn put_page(&self, frame: PhysicalFrame) -> Result<u32, BuddyError> {
        let (remaining, merged) = self
            .slot(frame)?
            .zone
            .with_lock(|zone| zone.put(frame.number()))?;
        if remaining == 0 {
            self.record_free(merged);
        }
        Ok(remaining)
    }

    /// Reference count of `frame`; 0 for free or foreign frames.
    pub fn page_ref_count(&self, frame: PhysicalFrame) -> u32 {
        self.slot(frame)
            .map_or(0, |slot| slot.zone.with_lock(|zone| zone.ref_count(frame.number())))
    }

    /// Free pages summed over all zones.
    pub fn free_page_count(&self) -> u64 {
        self.zones
            .iter()
            .map(|slot| slot.zone.with_lock(|zone| zone.free_pages()))
            .sum()
    }

    /// Snapshot of the zone of type `kind`.
    pub fn zone_stats(&self, kind: ZoneType) -> Option<ZoneStats> {
        self.zones
            .iter()
            .find(|slot| slot.kind == kind)
            .map(|slot| slot.zone.with_lock(|zone| zone.stats()))
    }

    pub fn stats(&self) -> BuddyStats {
        let c = &self.counters;
        BuddyStats {
            allocations: c.allocations.load(Ordering::Relaxed),
            frees: c.frees.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            coalesces: c.coalesces.load(Ordering::Relaxed),
            zone_fallbacks: c.zone_fallbacks.load(Ordering::Relaxed),
            zones: self
                .zones
                .iter()
                .map(|slot| slot.zone.with_lock(|zone| zone.stats()))
                .collect(),
        }
    }

    fn slot(&self, frame: PhysicalFrame) -> Result<&ZoneSlot, BuddyError> {
        self.zones
            .iter()
            .find(|slot| slot.contains(frame.number()))
            .ok_or(BuddyError::FrameNotInZone)
    }

    fn record_free(&self, merged: usize) {
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        self.counters
            .coalesces
            .fetch_add(merged as u64, Ordering::Relaxed);
    }
}

impl<M: PhysMapper> FrameAlloc for BuddyAllocator<M> {
    fn alloc_4k(&self) -> Option<PhysicalFrame> {
        self.alloc_pages(GfpFlags::USER, 0).ok()
    }

    fn retain(&self, frame: PhysicalFrame) {
        if let Err(e) = self.get_page(frame) {
            log::warn!("buddy: retain {frame:?}: {e}");
        }
    }

    fn release(&self, frame: PhysicalFrame) -> u32 {
        self.put_page(frame).unwrap_or_else(|e| {
            log::warn!("buddy: release {frame:?}: {e}");
            0
        })
    }

    fn ref_count(&self, frame: PhysicalFrame) -> u32 {
        self.page_ref_count(frame)
    }
}
