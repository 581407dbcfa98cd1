use kernel_zpool::info::{MAX_COMPRESSION_TIME_US, MAX_POOLS};
use kernel_zpool::{
    Algorithm, ManualClock, PageKey, PoolConfig, Registry, RejectReason, ZpoolError,
};
use std::sync::{Arc, Barrier};
use std::thread;

const PAGE: usize = 4096;

fn page(v: u8) -> [u8; PAGE] {
    [v; PAGE]
}

#[test]
fn registry_holds_at_most_max_pools() {
    let registry = Registry::new();
    let ids: Vec<_> = (0..MAX_POOLS)
        .map(|i| {
            registry
                .create_pool(&format!("pool-{i}"), Algorithm::RunLength, 4096, 4)
                .expect("pool")
        })
        .collect();
    assert_eq!(
        registry.create_pool("one-more", Algorithm::RunLength, 4096, 4),
        Err(ZpoolError::RegistryFull)
    );

    registry.destroy_pool(ids[5]).expect("destroy");
    let again = registry
        .create_pool("one-more", Algorithm::RunLength, 4096, 4)
        .expect("slot freed");
    assert_eq!(again, ids[5]);
}

#[test]
fn pool_parameters_are_validated() {
    let registry = Registry::new();
    let long = "x".repeat(33);
    for (name, size, pages) in [("", 4096, 4), (long.as_str(), 4096, 4), ("p", 0, 4), ("p", 4096, 0)] {
        assert_eq!(
            registry.create_pool(name, Algorithm::RunLength, size, pages),
            Err(ZpoolError::InvalidConfig)
        );
    }
    assert_eq!(
        registry.create_pool("p", Algorithm::Deflate, 4096, 4),
        Err(ZpoolError::UnsupportedAlgorithm(Algorithm::Deflate))
    );
    assert_eq!(registry.stats().active_pools, 0);
}

#[test]
fn inserting_past_max_pages_evicts_exactly_the_oldest() {
    const N: usize = 8;
    let key = |k: usize| PageKey::new(k as u64);
    let registry = Registry::new();
    let id = registry
        .create_pool("lru", Algorithm::RunLength, 1 << 20, N)
        .expect("pool");

    for k in 0..=N {
        let info = registry
            .compress_page(id, key(k), &page(1))
            .expect("store");
        assert!(!info.dirty);
    }

    let stats = registry.pool_stats(id).expect("stats");
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.compressed_pages, N);
    assert!(!registry.is_page_compressed(id, key(0)));
    assert!((1..=N).all(|k| registry.is_page_compressed(id, key(k))));
}

#[test]
fn latency_budget_is_enforced_per_pool() {
    let clock = ManualClock::new(1_000);
    let registry = Registry::with_clock(&clock);
    let id = registry
        .create_pool("slow", Algorithm::RunLength, 1 << 16, 16)
        .expect("pool");

    clock.set_step(MAX_COMPRESSION_TIME_US + 1);
    assert_eq!(
        registry.compress_page(id, PageKey::new(1), &page(3)),
        Err(ZpoolError::Rejected(RejectReason::Latency))
    );

    registry
        .set_pool_config(
            id,
            PoolConfig {
                max_compression_time_us: 10 * MAX_COMPRESSION_TIME_US,
                ..PoolConfig::default()
            },
        )
        .expect("config");
    registry
        .compress_page(id, PageKey::new(1), &page(3))
        .expect("within budget");

    let stats = registry.stats();
    assert_eq!(stats.compression_failures, 1);
    assert_eq!(stats.total_compression_time_us, MAX_COMPRESSION_TIME_US + 1);
}

#[test]
fn pools_are_shared_across_threads() {
    const THREADS: usize = 8;
    const PAGES: usize = 64;

    let registry = Arc::new(Registry::new());
    let shared = registry
        .create_pool("shared", Algorithm::RunLength, 1 << 20, 4096)
        .expect("pool");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let own = registry
                    .create_pool(&format!("t{t}"), Algorithm::RunLength, 1 << 16, 64)
                    .expect("own pool");
                barrier.wait();
                let mut out = [0; PAGE];
                for i in 0..PAGES {
                    let n = t * PAGES + i;
                    let key = PageKey::new(n as u64);
                    let data = page(u8::try_from(n % 256).expect("byte"));
                    registry.compress_page(shared, key, &data).expect("shared");
                    registry.compress_page(own, key, &data).expect("own");
                    registry.remove_page(own, key, &mut out).expect("own");
                    assert_eq!(out, data);
                }
                registry.destroy_pool(own).expect("destroy");
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread");
    }

    let stats = registry.stats();
    assert_eq!(stats.active_pools, 1);
    assert_eq!(stats.compressed_pages, THREADS * PAGES);
    assert_eq!(stats.total_compressions, 2 * (THREADS * PAGES) as u64);
    assert_eq!(stats.total_decompressions, (THREADS * PAGES) as u64);
}
