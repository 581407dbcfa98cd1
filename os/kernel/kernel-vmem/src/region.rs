use crate::page_table::PageTableEntry;
use alloc::string::String;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

bitflags::bitflags! {
    /// Protection and behavior flags of a virtual memory region.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct RegionFlags: u32 {
        const READ   = 0x01;
        const WRITE  = 0x02;
        const EXEC   = 0x04;
        const USER   = 0x08;
        /// Backing frames may be mapped into other spaces.
        const SHARED = 0x10;
        /// Pages are shared copy-on-write with another space.
        const COW    = 0x20;
        /// Pages are populated on first touch by the fault handler.
        const LAZY   = 0x40;
        /// Pages must stay resident.
        const LOCKED = 0x80;
    }
}

impl RegionFlags {
    /// Leaf page-table bits for a page in a region with these flags.
    ///
    /// Write maps to `writable`, user to `user`, and anything without exec
    /// gets `no_execute`.
    #[must_use]
    pub const fn page_entry(self) -> PageTableEntry {
        PageTableEntry::new()
            .with_present(true)
            .with_writable(self.contains(Self::WRITE))
            .with_user(self.contains(Self::USER))
            .with_no_execute(!self.contains(Self::EXEC))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionType {
    Code,
    Data,
    Heap,
    Stack,
    Mmap,
    Shared,
    Kernel,
}

/// A `[start, end)` range of one address space with uniform flags and type.
#[derive(Clone, PartialEq, Eq)]
pub struct Region {
    pub(crate) start: VirtualAddress,
    pub(crate) end: VirtualAddress,
    pub(crate) flags: RegionFlags,
    pub(crate) kind: RegionType,
    pub(crate) name: String,
}

impl Region {
    pub(crate) fn new(
        start: VirtualAddress,
        end: VirtualAddress,
        flags: RegionFlags,
        kind: RegionType,
        name: &str,
    ) -> Self {
        Self {
            start,
            end,
            flags,
            kind,
            name: String::from(name),
        }
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub const fn flags(&self) -> RegionFlags {
        self.flags
    }

    #[must_use]
    pub const fn kind(&self) -> RegionType {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.start <= va && va < self.end
    }

    #[must_use]
    pub fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        self.start < end && start < self.end
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region({:?} {:#x}..{:#x} {:?} \"{}\")",
            self.kind,
            self.start.as_u64(),
            self.end.as_u64(),
            self.flags,
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_entry_follows_region_flags() {
        let rw = (RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER).page_entry();
        assert!(rw.present() && rw.writable() && rw.user() && rw.no_execute());

        let rx = (RegionFlags::READ | RegionFlags::EXEC).page_entry();
        assert!(!rx.writable() && !rx.user() && !rx.no_execute());
    }

    #[test]
    fn overlap_is_half_open() {
        let r = Region::new(
            VirtualAddress::new(0x1000),
            VirtualAddress::new(0x3000),
            RegionFlags::READ,
            RegionType::Data,
            "data",
        );
        assert!(r.overlaps(VirtualAddress::new(0x2000), VirtualAddress::new(0x4000)));
        assert!(!r.overlaps(VirtualAddress::new(0x3000), VirtualAddress::new(0x4000)));
        assert!(!r.overlaps(VirtualAddress::new(0x0), VirtualAddress::new(0x1000)));
        assert!(r.contains(VirtualAddress::new(0x2fff)));
        assert!(!r.contains(VirtualAddress::new(0x3000)));
    }
}
