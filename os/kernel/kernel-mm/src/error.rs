use kernel_alloc::BuddyError;
use kernel_vmem::VmmError;
use kernel_zpool::ZpoolError;

/// Any failure of a memory-core operation, tagged by the layer that raised it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryCoreError {
    #[error("buddy allocator: {0}")]
    Buddy(#[from] BuddyError),

    #[error("virtual memory: {0}")]
    Vmm(#[from] VmmError),

    #[error("compression pool: {0}")]
    Zpool(#[from] ZpoolError),
}
