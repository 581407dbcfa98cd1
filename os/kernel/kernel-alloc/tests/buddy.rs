use kernel_alloc::{BuddyAllocator, GfpFlags, RamPhysMapper, ZoneType};
use kernel_info::buddy::MAX_ORDER;
use kernel_memory_addresses::PhysicalFrame;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn allocator(kind: ZoneType, start: u64, pages: u64) -> BuddyAllocator<RamPhysMapper> {
    let mut buddy = BuddyAllocator::new(RamPhysMapper::new());
    buddy.add_zone(kind, start, start + pages).expect("zone");
    buddy
}

#[test]
fn eight_pages_freed_in_any_order_restore_the_zone() {
    let buddy = allocator(ZoneType::Normal, 0x1000, 1024);
    let before = buddy.zone_stats(ZoneType::Normal).expect("zone");
    assert_eq!(before.free_lists[MAX_ORDER], 1);

    let pages: Vec<PhysicalFrame> = (0..8)
        .map(|_| buddy.alloc_pages(GfpFlags::KERNEL, 0).expect("page"))
        .collect();
    for i in [3, 0, 7, 5, 1, 6, 2, 4] {
        buddy.free_pages(pages[i], 0).expect("free");
    }

    let after = buddy.zone_stats(ZoneType::Normal).expect("zone");
    assert_eq!(after.free_pages, before.free_pages);
    assert_eq!(after.free_lists, before.free_lists);
    assert_eq!(after.allocations, 8);
}

#[test]
fn buddies_of_order_k_coalesce_into_one_block() {
    const K: usize = 4;
    let buddy = allocator(ZoneType::Normal, 0x1000, 1 << K);

    // Atomic requests may drain the zone completely.
    let pages: Vec<PhysicalFrame> = (0..1 << K)
        .map(|_| buddy.alloc_pages(GfpFlags::ATOMIC, 0).expect("page"))
        .collect();
    let numbers: HashSet<u64> = pages.iter().map(|f| f.number()).collect();
    assert_eq!(numbers, (0x1000..0x1000 + (1 << K)).collect());
    let drained = buddy.zone_stats(ZoneType::Normal).expect("zone").free_lists;
    assert!(drained.iter().all(|&n| n == 0));

    for page in pages {
        buddy.free_pages(page, 0).expect("free");
    }
    let lists = buddy.zone_stats(ZoneType::Normal).expect("zone").free_lists;
    assert_eq!(lists[K], drained[K] + 1);
    assert!(lists[..K].iter().all(|&n| n == 0));
    assert_eq!(buddy.stats().coalesces, (1 << K) - 1);
}

#[test]
fn user_allocations_prefer_high_memory() {
    let mut buddy = BuddyAllocator::new(RamPhysMapper::new());
    buddy.add_zone(ZoneType::Dma, 0, 0x400).expect("dma");
    buddy.add_zone(ZoneType::Normal, 0x400, 0x800).expect("normal");
    buddy.add_zone(ZoneType::HighMem, 0x800, 0xC00).expect("high");

    let user = buddy.alloc_pages(GfpFlags::USER, 0).expect("user");
    let kernel = buddy.alloc_pages(GfpFlags::KERNEL, 0).expect("kernel");
    let dma = buddy.alloc_pages(GfpFlags::DMA | GfpFlags::USER, 0).expect("dma");
    assert!((0x800..0xC00).contains(&user.number()));
    assert!((0x400..0x800).contains(&kernel.number()));
    assert!((0..0x400).contains(&dma.number()));
    assert_eq!(buddy.stats().zone_fallbacks, 0);
}

#[test]
fn concurrent_alloc_and_free_keep_the_zone_consistent() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let buddy = Arc::new(allocator(ZoneType::Normal, 0x4000, 4096));
    let total = buddy.free_page_count();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let buddy = Arc::clone(&buddy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    let order = (t + round) % 4;
                    let frame = buddy
                        .alloc_pages(GfpFlags::KERNEL, order)
                        .expect("alloc");
                    held.push((frame, order));
                    if held.len() > 4 {
                        let (frame, order) = held.remove(0);
                        buddy.free_pages(frame, order).expect("free");
                    }
                }
                for (frame, order) in held {
                    buddy.free_pages(frame, order).expect("free");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread");
    }

    let stats = buddy.stats();
    assert_eq!(buddy.free_page_count(), total);
    assert_eq!(stats.allocations, (THREADS * ROUNDS) as u64);
    assert_eq!(stats.frees, stats.allocations);
    assert_eq!(stats.zones[0].free_lists[MAX_ORDER], 4);
}
