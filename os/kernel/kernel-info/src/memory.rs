//! # User Address Space Layout

pub use kernel_memory_addresses::PAGE_SIZE;

/// Lowest address handed out to user code and data.
pub const USER_VIRTUAL_BASE: u64 = 0x0040_0000;

/// Initial program break; heap regions start here.
pub const USER_HEAP_BASE: u64 = 0x0080_0000;

/// Top of the user stack (exclusive, page aligned).
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// Distance between the mmap arena base and the stack top.
pub const MMAP_STACK_DISTANCE: u64 = 0x4000_0000; // 1 GiB

/// Where the mmap first-fit search starts in a fresh address space.
pub const MMAP_BASE: u64 = USER_STACK_TOP - MMAP_STACK_DISTANCE;

/// Safety margin kept free below the stack top.
pub const STACK_GUARD_GAP: u64 = 0x1_0000;

/// Upper bound (exclusive) for anonymous mappings found by address search.
pub const MMAP_CEILING: u64 = USER_STACK_TOP - STACK_GUARD_GAP;

/// End of the canonical lower half.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

const _: () = {
    assert!(USER_VIRTUAL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(MMAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_HEAP_BASE > USER_VIRTUAL_BASE);
    assert!(MMAP_BASE > USER_HEAP_BASE);
    assert!(MMAP_CEILING > MMAP_BASE);
    assert!(USER_STACK_TOP < USERSPACE_END);
};
