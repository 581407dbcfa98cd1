//! # Buddy Zone
//!
//! A zone owns a contiguous range of frame numbers and one free list per
//! order. Frame bookkeeping lives in a table indexed by `pfn - start_pfn`;
//! the free lists are doubly linked through that table by index, so no
//! pointers into frame memory are ever formed.
//!
//! ```text
//!  free_area[k].head ─► frames[i] ⇄ frames[j] ⇄ ... (all heads of 2^k-frame blocks)
//! ```
//!
//! Buddy pairing uses absolute frame numbers: the buddy of the order-`k`
//! block at `pfn` is the block at `pfn ^ (1 << k)`.

use crate::{BuddyError, WatermarkLevel, ZoneType};
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_info::buddy::{
    MAX_ORDER, NR_ORDERS, WATERMARK_HIGH_DIVISOR, WATERMARK_LOW_DIVISOR, WATERMARK_MIN_DIVISOR,
};

/// End-of-list marker for frame-table links.
const NIL: u32 = u32::MAX;

/// Per-frame state word.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
struct FrameFlags {
    /// Heads a block that sits on a free list.
    free: bool,

    /// Heads a block handed out by [`Zone::alloc`].
    allocated: bool,

    /// Block order; meaningful only while `free` or `allocated` is set.
    #[bits(4)]
    order: u8,

    #[bits(10)]
    __: u16,
}

#[derive(Copy, Clone)]
struct FrameInfo {
    flags: FrameFlags,
    ref_count: u32,
    prev: u32,
    next: u32,
}

impl FrameInfo {
    const EMPTY: Self = Self {
        flags: FrameFlags::new(),
        ref_count: 0,
        prev: NIL,
        next: NIL,
    };
}

#[derive(Copy, Clone)]
struct FreeArea {
    head: u32,
    nr_free: usize,
}

/// Free-page thresholds gating admission by urgency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Watermarks {
    pub min: u64,
    pub low: u64,
    pub high: u64,
}

impl Watermarks {
    /// 5%, 10% and 15% of `total_pages`.
    #[must_use]
    pub const fn for_pages(total_pages: u64) -> Self {
        Self {
            min: total_pages / WATERMARK_MIN_DIVISOR,
            low: total_pages / WATERMARK_LOW_DIVISOR,
            high: total_pages * 3 / WATERMARK_HIGH_DIVISOR,
        }
    }

    #[must_use]
    pub const fn level(&self, level: WatermarkLevel) -> u64 {
        match level {
            WatermarkLevel::Min => self.min,
            WatermarkLevel::Low => self.low,
            WatermarkLevel::High => self.high,
        }
    }
}

/// Snapshot of one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneStats {
    pub kind: ZoneType,
    pub start_pfn: u64,
    pub end_pfn: u64,
    pub total_pages: u64,
    pub free_pages: u64,
    pub watermarks: Watermarks,
    pub allocations: u64,
    pub failures: u64,
    /// Number of free blocks on each order's list.
    pub free_lists: [usize; NR_ORDERS],
}

pub(crate) struct Zone {
    kind: ZoneType,
    start_pfn: u64,
    end_pfn: u64,
    frames: Vec<FrameInfo>,
    free_area: [FreeArea; NR_ORDERS],
    free_pages: u64,
    watermarks: Watermarks,
    allocations: u64,
    failures: u64,
}

impl Zone {
    /// A zone over `[start_pfn, end_pfn)` with every frame free.
    ///
    /// The range is carved into the largest naturally aligned blocks that
    /// fit, so a fresh zone can serve any order its alignment allows.
    pub(crate) fn new(kind: ZoneType, start_pfn: u64, end_pfn: u64) -> Result<Self, BuddyError> {
        if start_pfn >= end_pfn || end_pfn - start_pfn >= u64::from(NIL) {
            return Err(BuddyError::InvalidZone);
        }
        let total = end_pfn - start_pfn;
        let mut zone = Self {
            kind,
            start_pfn,
            end_pfn,
            frames: alloc::vec![FrameInfo::EMPTY; to_index(total)],
            free_area: [FreeArea { head: NIL, nr_free: 0 }; NR_ORDERS],
            free_pages: total,
            watermarks: Watermarks::for_pages(total),
            allocations: 0,
            failures: 0,
        };

        let mut pfn = start_pfn;
        while pfn < end_pfn {
            let mut order = MAX_ORDER;
            while order > 0 && (pfn & ((1 << order) - 1) != 0 || pfn + (1 << order) > end_pfn) {
                order -= 1;
            }
            zone.push_free(pfn, order);
            pfn += 1 << order;
        }
        Ok(zone)
    }

    pub(crate) const fn contains(&self, pfn: u64) -> bool {
        self.start_pfn <= pfn && pfn < self.end_pfn
    }

    pub(crate) const fn free_pages(&self) -> u64 {
        self.free_pages
    }

    pub(crate) const fn total_pages(&self) -> u64 {
        self.end_pfn - self.start_pfn
    }

    const fn watermark_ok(&self, order: usize, level: WatermarkLevel) -> bool {
        self.free_pages >= self.watermarks.level(level) + (1 << order)
    }

    /// Take a `2^order` block, splitting a larger one if needed.
    ///
    /// Fails without touching the free lists when the request would push the
    /// zone below the watermark for `level`.
    pub(crate) fn alloc(&mut self, order: usize, level: WatermarkLevel) -> Option<u64> {
        if !self.watermark_ok(order, level) {
            self.failures += 1;
            log::trace!(
                "{:?} zone below {level:?} watermark ({} free, order {order})",
                self.kind,
                self.free_pages
            );
            return None;
        }

        let Some(found) = (order..=MAX_ORDER).find(|&o| self.free_area[o].head != NIL) else {
            self.failures += 1;
            return None;
        };
        let pfn = self.pfn(self.free_area[found].head);
        self.remove_free(pfn, found);

        let mut current = found;
        while current > order {
            current -= 1;
            self.push_free(pfn + (1 << current), current);
        }

        let i = self.index(pfn);
        let frame = &mut self.frames[i];
        frame.flags = FrameFlags::new().with_allocated(true).with_order(order_bits(order));
        frame.ref_count = 1;
        self.free_pages -= 1 << order;
        self.allocations += 1;
        Some(pfn)
    }

    /// Return a block and merge it with free buddies; yields the merge count.
    pub(crate) fn free(&mut self, pfn: u64, order: usize) -> Result<usize, BuddyError> {
        let i = self.index(pfn);
        let flags = self.frames[i].flags;
        if !flags.allocated() || usize::from(flags.order()) != order {
            return Err(BuddyError::NotAllocated);
        }
        self.frames[i] = FrameInfo::EMPTY;
        self.free_pages += 1 << order;

        let mut head = pfn;
        let mut order = order;
        let mut merged = 0;
        while order < MAX_ORDER {
            let buddy = head ^ (1 << order);
            if !self.contains(buddy) || !self.is_free_block(buddy, order) {
                break;
            }
            self.remove_free(buddy, order);
            head = head.min(buddy);
            order += 1;
            merged += 1;
        }
        self.push_free(head, order);
        Ok(merged)
    }

    /// Reference count of the allocated block headed by `pfn`, 0 otherwise.
    pub(crate) fn ref_count(&self, pfn: u64) -> u32 {
        self.frames[self.index(pfn)].ref_count
    }

    pub(crate) fn get(&mut self, pfn: u64) -> Result<u32, BuddyError> {
        let i = self.index(pfn);
        let frame = &mut self.frames[i];
        if !frame.flags.allocated() {
            return Err(BuddyError::NotAllocated);
        }
        frame.ref_count += 1;
        Ok(frame.ref_count)
    }

    /// Drop a reference; the block is freed when the last one goes.
    ///
    /// Returns the remaining count and the number of buddy merges.
    pub(crate) fn put(&mut self, pfn: u64) -> Result<(u32, usize), BuddyError> {
        let i = self.index(pfn);
        let frame = &mut self.frames[i];
        if !frame.flags.allocated() || frame.ref_count == 0 {
            return Err(BuddyError::NotAllocated);
        }
        frame.ref_count -= 1;
        if frame.ref_count > 0 {
            return Ok((frame.ref_count, 0));
        }
        let order = usize::from(frame.flags.order());
        let merged = self.free(pfn, order)?;
        Ok((0, merged))
    }

    pub(crate) fn stats(&self) -> ZoneStats {
        ZoneStats {
            kind: self.kind,
            start_pfn: self.start_pfn,
            end_pfn: self.end_pfn,
            total_pages: self.total_pages(),
            free_pages: self.free_pages,
            watermarks: self.watermarks,
            allocations: self.allocations,
            failures: self.failures,
            free_lists: core::array::from_fn(|o| self.free_area[o].nr_free),
        }
    }

    fn is_free_block(&self, pfn: u64, order: usize) -> bool {
        let flags = self.frames[self.index(pfn)].flags;
        flags.free() && usize::from(flags.order()) == order
    }

    fn push_free(&mut self, pfn: u64, order: usize) {
        let i = self.index(pfn);
        let head = self.free_area[order].head;
        self.frames[i] = FrameInfo {
            flags: FrameFlags::new().with_free(true).with_order(order_bits(order)),
            ref_count: 0,
            prev: NIL,
            next: head,
        };
        #[allow(clippy::cast_possible_truncation)]
        let link = i as u32;
        if head != NIL {
            self.frames[head as usize].prev = link;
        }
        self.free_area[order].head = link;
        self.free_area[order].nr_free += 1;
    }

    fn remove_free(&mut self, pfn: u64, order: usize) {
        let i = self.index(pfn);
        let FrameInfo { prev, next, .. } = self.frames[i];
        if prev == NIL {
            self.free_area[order].head = next;
        } else {
            self.frames[prev as usize].next = next;
        }
        if next != NIL {
            self.frames[next as usize].prev = prev;
        }
        self.frames[i] = FrameInfo::EMPTY;
        self.free_area[order].nr_free -= 1;
    }

    fn index(&self, pfn: u64) -> usize {
        debug_assert!(self.contains(pfn));
        to_index(pfn - self.start_pfn)
    }

    fn pfn(&self, index: u32) -> u64 {
        self.start_pfn + u64::from(index)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn to_index(offset: u64) -> usize {
    offset as usize
}

#[allow(clippy::cast_possible_truncation)]
const fn order_bits(order: usize) -> u8 {
    order as u8
}
