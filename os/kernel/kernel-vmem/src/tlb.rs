use kernel_memory_addresses::VirtualAddress;

/// Invalidate cached translations after a page-table change.
pub trait TlbFlush {
    /// Drop the translation for the page containing `va` on this core.
    fn flush_page(&self, va: VirtualAddress);
}

/// Flushes the local core's TLB with `invlpg`.
///
/// Outside a bare-metal x86-64 target there is no TLB to maintain and the
/// flush does nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct LocalTlb;

impl TlbFlush for LocalTlb {
    #[inline]
    fn flush_page(&self, va: VirtualAddress) {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        // SAFETY: invlpg only discards a cached translation.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
        #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
        let _ = va;
    }
}
