//! # Pool Registry
//!
//! A fixed table of [`MAX_POOLS`] slots, each holding a shared handle to a
//! pool behind its own lock. Lock order is registry, then pool: page
//! operations clone the pool handle and drop the registry lock before
//! touching the pool, so operations on different pools run in parallel.

use crate::pool::{EntryInfo, Pool, PoolConfig, PoolStats};
use crate::{Algorithm, Clock, PageKey, TickClock, ZpoolError};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::compression::MAX_POOLS;
use kernel_memory_addresses::PAGE_BYTES;
use kernel_sync::SpinLock;

type PoolHandle = Arc<SpinLock<Pool>>;

/// Slot index of a live pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PoolId(usize);

impl PoolId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Subsystem-wide compression statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CompressionStats {
    /// Pages newly stored; hits on existing entries are not counted.
    pub total_compressions: u64,
    pub total_decompressions: u64,
    pub compression_failures: u64,
    pub decompression_failures: u64,
    pub bytes_compressed: u64,
    pub bytes_decompressed: u64,
    pub bytes_saved: u64,
    pub active_pools: usize,
    pub compressed_pages: usize,
    /// Stored bytes as a percentage of original bytes, 0 before any store.
    pub avg_compression_ratio: u32,
    pub total_compression_time_us: u64,
    pub total_decompression_time_us: u64,
}

#[derive(Default)]
struct Totals {
    compressions: AtomicU64,
    decompressions: AtomicU64,
    compression_failures: AtomicU64,
    decompression_failures: AtomicU64,
    bytes_compressed: AtomicU64,
    bytes_decompressed: AtomicU64,
    bytes_saved: AtomicU64,
    compression_time_us: AtomicU64,
    decompression_time_us: AtomicU64,
}

impl Totals {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// The set of live compression pools.
pub struct Registry<C: Clock = TickClock> {
    pools: SpinLock<[Option<PoolHandle>; MAX_POOLS]>,
    totals: Totals,
    clock: C,
}

impl Registry<TickClock> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(TickClock::new())
    }
}

impl Default for Registry<TickClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Registry<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            pools: SpinLock::new([const { None }; MAX_POOLS]),
            totals: Totals::default(),
            clock,
        }
    }

    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Create a pool in the lowest free slot.
    ///
    /// # Errors
    /// - [`ZpoolError::InvalidConfig`] for an empty or overlong name, or a
    ///   zero capacity.
    /// - [`ZpoolError::UnsupportedAlgorithm`] for a coder that is not built in.
    /// - [`ZpoolError::RegistryFull`] once [`MAX_POOLS`] pools exist.
    pub fn create_pool(
        &self,
        name: &str,
        algorithm: Algorithm,
        memory_size: usize,
        max_pages: usize,
    ) -> Result<PoolId, ZpoolError> {
        let pool = Pool::new(name, algorithm, memory_size, max_pages)?;
        let id = self.pools.with_lock(|slots| {
            let index = slots
                .iter()
                .position(Option::is_none)
                .ok_or(ZpoolError::RegistryFull)?;
            slots[index] = Some(Arc::new(SpinLock::new(pool)));
            Ok(PoolId(index))
        })?;
        log::info!(
            "zpool {name}: created as #{} ({}, {memory_size} bytes, {max_pages} pages)",
            id.0,
            algorithm.name()
        );
        Ok(id)
    }

    /// Drop a pool and everything stored in it.
    ///
    /// # Errors
    /// [`ZpoolError::PoolNotFound`] if the slot is empty.
    pub fn destroy_pool(&self, id: PoolId) -> Result<(), ZpoolError> {
        let pool = self
            .pools
            .with_lock(|slots| slots.get_mut(id.0).and_then(Option::take))
            .ok_or(ZpoolError::PoolNotFound)?;
        pool.with_lock(|p| {
            log::info!("zpool {}: destroyed with {} pages", p.name(), p.len());
        });
        Ok(())
    }

    /// Id of the pool called `name`.
    pub fn find_pool(&self, name: &str) -> Option<PoolId> {
        self.pools.with_lock(|slots| {
            slots.iter().enumerate().find_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|p| p.with_lock(|p| p.name() == name))
                    .map(|_| PoolId(i))
            })
        })
    }

    fn pool(&self, id: PoolId) -> Result<PoolHandle, ZpoolError> {
        self.pools
            .with_lock(|slots| slots.get(id.0).and_then(Clone::clone))
            .ok_or(ZpoolError::PoolNotFound)
    }

    /// Store a page, or touch it if `key` is already present.
    ///
    /// # Errors
    /// [`ZpoolError::Rejected`] when admission control declines the page;
    /// the caller should keep it uncompressed. [`ZpoolError::NoSpace`] when
    /// it cannot fit even after evicting everything.
    pub fn compress_page(
        &self,
        id: PoolId,
        key: PageKey,
        page: &[u8; PAGE_BYTES],
    ) -> Result<EntryInfo, ZpoolError> {
        let pool = self.pool(id)?;
        let result = pool.with_lock(|p| p.compress(key, page, &self.clock));
        match result {
            Ok(stored) => {
                if !stored.hit {
                    let t = &self.totals;
                    Totals::add(&t.compressions, 1);
                    Totals::add(&t.bytes_compressed, PAGE_BYTES as u64);
                    Totals::add(
                        &t.bytes_saved,
                        (PAGE_BYTES - stored.info.compressed_size) as u64,
                    );
                    Totals::add(&t.compression_time_us, stored.elapsed_us);
                }
                Ok(stored.info)
            }
            Err(e) => {
                Totals::add(&self.totals.compression_failures, 1);
                log::debug!("zpool #{}: {key:?} not stored: {e}", id.0);
                Err(e)
            }
        }
    }

    /// Decode the page stored under `key` into `out`. The entry stays.
    ///
    /// # Errors
    /// - [`ZpoolError::NotCompressed`] if the pool does not hold `key`.
    /// - [`ZpoolError::Corrupt`] if the stored data does not decode to a page.
    pub fn decompress_page(
        &self,
        id: PoolId,
        key: PageKey,
        out: &mut [u8; PAGE_BYTES],
    ) -> Result<(), ZpoolError> {
        let pool = self.pool(id)?;
        let result = pool.with_lock(|p| p.decompress(key, out, &self.clock));
        self.account_decompression(result)
    }

    /// Decode the page stored under `key` into `out` and drop the entry.
    ///
    /// A corrupt entry is kept so the failure stays observable.
    ///
    /// # Errors
    /// As for [`decompress_page`](Self::decompress_page).
    pub fn remove_page(
        &self,
        id: PoolId,
        key: PageKey,
        out: &mut [u8; PAGE_BYTES],
    ) -> Result<(), ZpoolError> {
        let pool = self.pool(id)?;
        let result = pool.with_lock(|p| p.remove(key, out, &self.clock));
        self.account_decompression(result)
    }

    fn account_decompression(&self, result: Result<u64, ZpoolError>) -> Result<(), ZpoolError> {
        let t = &self.totals;
        match result {
            Ok(elapsed_us) => {
                Totals::add(&t.decompressions, 1);
                Totals::add(&t.bytes_decompressed, PAGE_BYTES as u64);
                Totals::add(&t.decompression_time_us, elapsed_us);
                Ok(())
            }
            Err(e) => {
                Totals::add(&t.decompression_failures, 1);
                Err(e)
            }
        }
    }

    /// `false` also when the pool does not exist.
    pub fn is_page_compressed(&self, id: PoolId, key: PageKey) -> bool {
        self.pool(id)
            .is_ok_and(|pool| pool.with_lock(|p| p.contains(key)))
    }

    /// # Errors
    /// [`ZpoolError::PoolNotFound`] or [`ZpoolError::NotCompressed`].
    pub fn entry_info(&self, id: PoolId, key: PageKey) -> Result<EntryInfo, ZpoolError> {
        self.pool(id)?
            .with_lock(|p| p.entry_info(key))
            .ok_or(ZpoolError::NotCompressed)
    }

    /// Flag the stored copy of `key` as stale.
    ///
    /// # Errors
    /// [`ZpoolError::PoolNotFound`] or [`ZpoolError::NotCompressed`].
    pub fn mark_dirty(&self, id: PoolId, key: PageKey) -> Result<(), ZpoolError> {
        self.pool(id)?.with_lock(|p| p.mark_dirty(key))
    }

    /// # Errors
    /// [`ZpoolError::InvalidConfig`] for a ratio outside `1..=100`.
    pub fn set_pool_config(&self, id: PoolId, config: PoolConfig) -> Result<(), ZpoolError> {
        self.pool(id)?.with_lock(|p| p.set_config(config))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn pool_stats(&self, id: PoolId) -> Result<PoolStats, ZpoolError> {
        Ok(self.pool(id)?.with_lock(|p| p.stats()))
    }

    pub fn stats(&self) -> CompressionStats {
        let (active_pools, compressed_pages) = self.pools.with_lock(|slots| {
            slots
                .iter()
                .flatten()
                .fold((0, 0), |(n, pages), p| (n + 1, pages + p.with_lock(|p| p.len())))
        });

        let t = &self.totals;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let bytes_compressed = load(&t.bytes_compressed);
        let bytes_saved = load(&t.bytes_saved);
        let avg_compression_ratio = (bytes_compressed - bytes_saved)
            .checked_mul(100)
            .and_then(|stored| stored.checked_div(bytes_compressed))
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(0);

        CompressionStats {
            total_compressions: load(&t.compressions),
            total_decompressions: load(&t.decompressions),
            compression_failures: load(&t.compression_failures),
            decompression_failures: load(&t.decompression_failures),
            bytes_compressed,
            bytes_decompressed: load(&t.bytes_decompressed),
            bytes_saved,
            active_pools,
            compressed_pages,
            avg_compression_ratio,
            total_compression_time_us: load(&t.compression_time_us),
            total_decompression_time_us: load(&t.decompression_time_us),
        }
    }
}
