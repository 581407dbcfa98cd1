/// Errors surfaced by address-space, region and fault operations.
///
/// [`NotFound`](VmmError::NotFound) and [`InvalidAddress`](VmmError::InvalidAddress)
/// mean "this address is wrong"; [`OutOfMemory`](VmmError::OutOfMemory) means
/// "try again later or elsewhere".
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid address")]
    InvalidAddress,
    #[error("permission denied")]
    PermissionDenied,
    #[error("no region or mapping at address")]
    NotFound,
    #[error("range overlaps an existing region or mapping")]
    Exists,
    #[error("unresolvable page fault")]
    Fault,
    #[error("invalid size")]
    InvalidSize,
    #[error("invalid flags")]
    InvalidFlags,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("address arithmetic overflow")]
    Overflow,
}
