use core::fmt;
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};

/// Identity of an original page inside a pool.
///
/// Keys are opaque; two constructors cover the usual callers. Keys built
/// from a frame and keys built from a virtual page live in disjoint ranges
/// (bit 63).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey(u64);

const VIRTUAL_TAG: u64 = 1 << 63;

/// Bits of the virtual page number kept in a key (47-bit user space).
const VPN_BITS: u32 = 35;

impl PageKey {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Key of the physical frame currently holding the page.
    #[must_use]
    pub const fn from_frame(frame: PhysicalFrame) -> Self {
        Self(frame.start_address() & !VIRTUAL_TAG)
    }

    /// Key of the page at `va` in address space `space`.
    ///
    /// Only the low 28 bits of `space` take part.
    #[must_use]
    pub fn from_virtual(space: u32, va: VirtualAddress) -> Self {
        let vpn = va.page_number() & ((1 << VPN_BITS) - 1);
        Self(VIRTUAL_TAG | (u64::from(space) << VPN_BITS) | vpn)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Bucket index in a table of `mask + 1` buckets.
    pub(crate) const fn bucket(self, mask: usize) -> usize {
        let mut k = self.0;
        k ^= k >> 16;
        k ^= k >> 8;
        #[allow(clippy::cast_possible_truncation)]
        let k = k as usize;
        k & mask
    }
}

impl fmt::Debug for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageKey({:#x})", self.0)
    }
}
