use kernel_alloc::{RamPhysMapper, ZoneType};
use kernel_memory_addresses::{PAGE_BYTES, VirtualAddress};
use kernel_mm::{FaultOutcome, MemoryCore, MemoryCoreConfig, MemoryCoreError};
use kernel_vmem::{
    CowResolution, FaultResolution, FrameAlloc, MmapFlags, PageFaultError, Prot, VmmError,
};
use kernel_zpool::Algorithm;

fn core() -> MemoryCore<RamPhysMapper> {
    let config = MemoryCoreConfig::single(ZoneType::Normal, 0x1000, 0x1400);
    MemoryCore::new(RamPhysMapper::new(), &config).expect("core")
}

fn user_write() -> PageFaultError {
    PageFaultError::new()
        .with_present(true)
        .with_write(true)
        .with_user(true)
}

fn user_read_missing() -> PageFaultError {
    PageFaultError::new().with_user(true)
}

#[test]
fn default_config_uses_the_boot_layout() {
    let config = MemoryCoreConfig::default();
    let kinds: Vec<_> = config.zones.iter().map(|z| z.kind).collect();
    assert_eq!(kinds, [ZoneType::Dma, ZoneType::Normal, ZoneType::HighMem]);
    assert!(config.zones.windows(2).all(|w| w[0].end_pfn == w[1].start_pfn));
}

#[test]
fn overlapping_zones_are_rejected() {
    let mut config = MemoryCoreConfig::single(ZoneType::Normal, 0x1000, 0x2000);
    config
        .zones
        .push(kernel_mm::ZoneRange::new(ZoneType::HighMem, 0x1800, 0x3000));
    assert!(matches!(
        MemoryCore::new(RamPhysMapper::new(), &config),
        Err(MemoryCoreError::Buddy(kernel_alloc::BuddyError::ZoneOverlap))
    ));
}

#[test]
fn fork_shares_pages_until_written() {
    let core = core();
    let mut parent = core.new_address_space(1);
    let addr = parent
        .mmap(None, 0x2000, Prot::READ | Prot::WRITE, MmapFlags::empty())
        .expect("mmap");
    parent.write_page(addr, &[5; PAGE_BYTES]).expect("write");
    let original = parent.query(addr).expect("mapped").frame();

    let (mut child, report) = core.fork(&mut parent, 2).expect("fork");
    assert!(report.is_complete());
    assert_eq!(report.pages_shared, 2);
    assert_eq!(core.frames().ref_count(original), 2);

    // Child writes first: it gets a private copy.
    let resolution = child
        .handle_page_fault(addr, user_write())
        .expect("cow fault");
    let FaultResolution::CopyOnWrite(CowResolution::Copied { from, to }) = resolution else {
        panic!("expected a copy, got {resolution:?}");
    };
    assert_eq!(from, original);
    assert_ne!(to, original);
    assert_eq!(core.frames().ref_count(original), 1);

    child.write_page(addr, &[9; PAGE_BYTES]).expect("write");
    let mut out = [0; PAGE_BYTES];
    parent.read_page(addr, &mut out).expect("read");
    assert_eq!(out, [5; PAGE_BYTES]);

    // The parent is now the only holder and takes the page over in place.
    let allocations = core.frames().stats().allocations;
    assert_eq!(
        parent.handle_page_fault(addr, user_write()),
        Ok(FaultResolution::CopyOnWrite(CowResolution::Reused(original)))
    );
    assert_eq!(core.frames().stats().allocations, allocations);
    assert!(parent.query(addr).is_some_and(|e| e.writable()));
}

#[test]
fn dropping_spaces_returns_every_frame() {
    let core = core();
    let free = core.frames().free_page_count();
    {
        let mut parent = core.new_address_space(1);
        parent
            .mmap(None, 0x8000, Prot::READ | Prot::WRITE, MmapFlags::empty())
            .expect("mmap");
        parent.expand_heap(0x3000).expect("brk");
        parent
            .handle_page_fault(VirtualAddress::new(0x80_1000), user_read_missing())
            .expect("demand zero");
        let (child, _) = core.fork(&mut parent, 2).expect("fork");
        assert!(core.frames().free_page_count() < free);
        drop(child);
    }
    assert_eq!(core.frames().free_page_count(), free);
}

#[test]
fn faults_restore_reclaimed_pages() {
    let core = core();
    let pool = core
        .pools()
        .create_pool("anon", Algorithm::RunLength, 1 << 16, 64)
        .expect("pool");
    let mut space = core.new_address_space(3);
    let addr = space
        .mmap(None, 0x1000, Prot::READ | Prot::WRITE, MmapFlags::empty())
        .expect("mmap");
    space.write_page(addr, &[0x11; PAGE_BYTES]).expect("write");

    core.reclaim_page(&mut space, addr, pool).expect("reclaim");
    assert!(space.query(addr).is_none());

    let outcome = core
        .handle_page_fault(&mut space, addr, user_read_missing(), Some(pool))
        .expect("restore");
    assert!(matches!(outcome, FaultOutcome::Restored(_)));
    let mut out = [0; PAGE_BYTES];
    space.read_page(addr, &mut out).expect("read");
    assert_eq!(out, [0x11; PAGE_BYTES]);

    // Nothing left to restore: an eager mapping does not demand-fault.
    space.unmap_page(addr).expect("unmap");
    assert_eq!(
        core.handle_page_fault(&mut space, addr, user_read_missing(), Some(pool)),
        Err(MemoryCoreError::Vmm(VmmError::Fault))
    );
    assert_eq!(core.pools().stats().total_decompressions, 1);
}
