use alloc::vec::Vec;
use kernel_alloc::ZoneType;
use kernel_info::buddy::boot_zones;

/// A frame range `[start_pfn, end_pfn)` registered as one zone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ZoneRange {
    pub kind: ZoneType,
    pub start_pfn: u64,
    pub end_pfn: u64,
}

impl ZoneRange {
    #[must_use]
    pub const fn new(kind: ZoneType, start_pfn: u64, end_pfn: u64) -> Self {
        Self {
            kind,
            start_pfn,
            end_pfn,
        }
    }
}

/// Boot-time configuration of a [`MemoryCore`](crate::MemoryCore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCoreConfig {
    /// Zones to register, in order.
    pub zones: Vec<ZoneRange>,
}

impl MemoryCoreConfig {
    /// A configuration with a single zone.
    #[must_use]
    pub fn single(kind: ZoneType, start_pfn: u64, end_pfn: u64) -> Self {
        Self {
            zones: alloc::vec![ZoneRange::new(kind, start_pfn, end_pfn)],
        }
    }
}

impl Default for MemoryCoreConfig {
    /// The fixed DMA / Normal / HighMem boot layout.
    fn default() -> Self {
        Self {
            zones: alloc::vec![
                ZoneRange::new(ZoneType::Dma, boot_zones::DMA.0, boot_zones::DMA.1),
                ZoneRange::new(ZoneType::Normal, boot_zones::NORMAL.0, boot_zones::NORMAL.1),
                ZoneRange::new(ZoneType::HighMem, boot_zones::HIGH_MEM.0, boot_zones::HIGH_MEM.1),
            ],
        }
    }
}
