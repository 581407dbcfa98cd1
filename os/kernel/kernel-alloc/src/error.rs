use crate::ZoneType;

/// Failures reported by the [`BuddyAllocator`](crate::BuddyAllocator).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuddyError {
    /// No registered zone could satisfy the request.
    #[error("out of memory")]
    OutOfMemory,

    /// An order above `MAX_ORDER` was requested.
    #[error("order {0} exceeds the maximum order")]
    InvalidOrder(usize),

    /// A zone registration with an empty frame range.
    #[error("zone range is empty")]
    InvalidZone,

    /// A zone registration overlapping an existing zone.
    #[error("zone overlaps an already registered zone")]
    ZoneOverlap,

    /// A second zone of the same type.
    #[error("a {0:?} zone is already registered")]
    DuplicateZone(ZoneType),

    #[error("zone table is full")]
    TooManyZones,

    /// The frame lies outside every registered zone.
    #[error("frame is not managed by any zone")]
    FrameNotInZone,

    /// The frame is not the head of an allocated block of that order.
    #[error("frame is not an allocated block of the given order")]
    NotAllocated,
}
