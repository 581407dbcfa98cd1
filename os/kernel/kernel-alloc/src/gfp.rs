//! # Allocation flags and zone selection

bitflags::bitflags! {
    /// "Get free pages" flags passed to [`BuddyAllocator::alloc_pages`](crate::BuddyAllocator::alloc_pages).
    ///
    /// The zone and urgency bits select where a block comes from and how
    /// deep into the zone's reserve the request may dig.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GfpFlags: u32 {
        /// Ordinary kernel allocation.
        const KERNEL  = 0x0001;
        /// Must not fail for lack of reserve; may dip down to `watermark_min`.
        const ATOMIC  = 0x0002;
        /// Backing memory for user pages.
        const USER    = 0x0004;
        /// Device-addressable memory.
        const DMA     = 0x0008;
        const HIGHMEM = 0x0010;
        /// Zero-fill the block before returning it.
        const ZERO    = 0x0020;
        /// Stay in the preferred zone and stop at `watermark_low`.
        const NOWAIT  = 0x0040;
        const NORETRY = 0x0080;
        const NOFAIL  = 0x0100;
    }
}

/// Memory class of a zone.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneType {
    Dma,
    Normal,
    HighMem,
    Movable,
}

/// Which of a zone's three watermarks a request has to respect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WatermarkLevel {
    Min,
    Low,
    High,
}

const KERNEL_ZONES: [ZoneType; 4] = [
    ZoneType::Normal,
    ZoneType::Dma,
    ZoneType::HighMem,
    ZoneType::Movable,
];

const DMA_ZONES: [ZoneType; 4] = [
    ZoneType::Dma,
    ZoneType::Normal,
    ZoneType::HighMem,
    ZoneType::Movable,
];

const USER_ZONES: [ZoneType; 4] = [
    ZoneType::HighMem,
    ZoneType::Normal,
    ZoneType::Movable,
    ZoneType::Dma,
];

impl GfpFlags {
    /// Zone types in the order they should be tried.
    ///
    /// `DMA` wins over `USER`, which wins over `ATOMIC`/`KERNEL`.
    #[must_use]
    pub const fn zone_preference(self) -> &'static [ZoneType; 4] {
        if self.contains(Self::DMA) {
            &DMA_ZONES
        } else if self.contains(Self::USER) {
            &USER_ZONES
        } else {
            &KERNEL_ZONES
        }
    }

    #[must_use]
    pub const fn watermark_level(self) -> WatermarkLevel {
        if self.contains(Self::ATOMIC) {
            WatermarkLevel::Min
        } else if self.contains(Self::NOWAIT) {
            WatermarkLevel::Low
        } else {
            WatermarkLevel::High
        }
    }

    /// Whether a failed preferred zone may be followed by the others.
    #[must_use]
    pub const fn allows_fallback(self) -> bool {
        !self.contains(Self::NOWAIT)
    }
}
