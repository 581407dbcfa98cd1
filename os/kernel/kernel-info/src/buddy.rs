//! # Buddy Allocator Parameters

/// Largest allocation order; blocks span at most `2^MAX_ORDER` frames.
pub const MAX_ORDER: usize = 10;

/// Number of per-order free lists in a zone (`0..=MAX_ORDER`).
pub const NR_ORDERS: usize = MAX_ORDER + 1;

/// Maximum number of zones the allocator tracks.
pub const MAX_ZONES: usize = 4;

/// `watermark_min = total_pages / WATERMARK_MIN_DIVISOR` (5%).
pub const WATERMARK_MIN_DIVISOR: u64 = 20;

/// `watermark_low = total_pages / WATERMARK_LOW_DIVISOR` (10%).
pub const WATERMARK_LOW_DIVISOR: u64 = 10;

/// `watermark_high = total_pages * 3 / WATERMARK_HIGH_DIVISOR` (15%).
pub const WATERMARK_HIGH_DIVISOR: u64 = 20;

/// Boot zone layout, in frame numbers (`[start, end)`).
pub mod boot_zones {
    /// DMA zone: the first 16 MiB.
    pub const DMA: (u64, u64) = (0, 0x1000);

    /// Normal zone: 16 MiB up to 896 MiB.
    pub const NORMAL: (u64, u64) = (0x1000, 0x3_8000);

    /// High memory: 896 MiB up to 4 GiB.
    pub const HIGH_MEM: (u64, u64) = (0x3_8000, 0x10_0000);
}

const _: () = {
    assert!(MAX_ORDER < 32);
    assert!(WATERMARK_MIN_DIVISOR > WATERMARK_LOW_DIVISOR);
    assert!(boot_zones::DMA.1 == boot_zones::NORMAL.0);
    assert!(boot_zones::NORMAL.1 == boot_zones::HIGH_MEM.0);
};
