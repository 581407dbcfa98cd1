/// Why a page was not admitted to a pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The encoded page is larger than the pool's ratio threshold allows.
    Ratio,
    /// The coder could not shrink the page at all.
    Incompressible,
    /// Compression overran the pool's time budget.
    Latency,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZpoolError {
    #[error("no pool with this id")]
    PoolNotFound,

    #[error("pool registry is full")]
    RegistryFull,

    /// Empty or oversized name, zero capacity, or an out-of-range ratio.
    #[error("invalid pool configuration")]
    InvalidConfig,

    #[error("compression algorithm {0:?} is not available")]
    UnsupportedAlgorithm(crate::Algorithm),

    /// Admission control declined the page; the caller should fall back.
    #[error("page rejected: {0:?}")]
    Rejected(RejectReason),

    /// The page cannot fit even in an empty pool.
    #[error("pool has no room for the page")]
    NoSpace,

    #[error("page is not compressed in this pool")]
    NotCompressed,

    /// The stored encoding could not be decoded; the entry is kept.
    #[error("compressed data is corrupt")]
    Corrupt,
}
