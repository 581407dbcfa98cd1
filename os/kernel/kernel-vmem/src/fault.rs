use crate::cow::CowResolution;
use crate::region::RegionFlags;
use crate::{AddressSpace, FrameAlloc, PhysMapper, VmmError};
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    #[bits(59)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            "Instruction fetch on protected page"
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Per-space fault counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FaultStats {
    pub page_faults: u64,
    pub cow_faults: u64,
    /// Resolved without I/O (demand-zero pages).
    pub minor_faults: u64,
    /// Not resolvable by the memory core.
    pub major_faults: u64,
}

/// How [`AddressSpace::handle_page_fault`] resolved a fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultResolution {
    CopyOnWrite(CowResolution),
    DemandZero,
}

impl<A: FrameAlloc, M: PhysMapper> AddressSpace<'_, A, M> {
    /// Entry point for the page-fault trap handler.
    ///
    /// # Errors
    /// - [`VmmError::PermissionDenied`] if the access violates the region flags.
    /// - [`VmmError::OutOfMemory`] if a page could not be allocated.
    /// - [`VmmError::Fault`] if `addr` lies outside every region or the fault
    ///   is otherwise unresolvable.
    pub fn handle_page_fault(
        &mut self,
        addr: VirtualAddress,
        error: PageFaultError,
    ) -> Result<FaultResolution, VmmError> {
        self.stats.page_faults += 1;

        let Some(flags) = self.find_region(addr).map(crate::Region::flags) else {
            self.stats.major_faults += 1;
            log::debug!("pid {}: fault at {addr} outside any region", self.pid);
            return Err(VmmError::Fault);
        };

        let denied = (error.write() && !flags.contains(RegionFlags::WRITE))
            || (error.instruction_fetch() && !flags.contains(RegionFlags::EXEC))
            || (error.user() && !flags.contains(RegionFlags::USER));
        if denied {
            log::debug!("pid {}: {} at {addr} ({flags:?})", self.pid, error.explain());
            return Err(VmmError::PermissionDenied);
        }

        if error.write() && error.present() && flags.contains(RegionFlags::COW) {
            return self
                .handle_cow_fault(addr)
                .map(FaultResolution::CopyOnWrite);
        }

        if !error.present() && flags.contains(RegionFlags::LAZY) {
            self.alloc_and_map(addr.align_down(), flags)?;
            self.stats.minor_faults += 1;
            return Ok(FaultResolution::DemandZero);
        }

        self.stats.major_faults += 1;
        log::debug!("pid {}: unresolved fault at {addr}: {}", self.pid, error.explain());
        Err(VmmError::Fault)
    }
}
