//! # Compression Pool Parameters

/// Maximum number of live compression pools.
pub const MAX_POOLS: usize = 16;

/// Maximum length of a pool name in bytes.
pub const MAX_POOL_NAME: usize = 32;

/// Reject a compressed page whose size exceeds this percentage of the original.
pub const MIN_COMPRESSION_RATIO: u32 = 75;

/// Upper bound on the encoded size of a single page (75% of a page).
pub const MAX_COMPRESSION_SIZE: usize = 3072;

/// Latency budget for compressing one page, in microseconds.
pub const MAX_COMPRESSION_TIME_US: u64 = 1000;

/// Length of the zero-page marker stored instead of a compressed buffer.
pub const ZERO_PAGE_MARKER_LEN: usize = 4;

const _: () = {
    assert!(MIN_COMPRESSION_RATIO <= 100);
    assert!(MAX_COMPRESSION_SIZE < 4096);
    assert!(MAX_POOLS > 0);
};
