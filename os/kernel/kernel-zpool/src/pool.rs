//! # Compression Pool
//!
//! A capacity-bounded cache from [`PageKey`] to an encoded page.
//!
//! Entries live in a slab (`slots`) and are addressed by index. Each entry
//! sits on two intrusive lists threaded through those indices:
//!
//! ```text
//!   buckets[h] ─► e3 ⇄ e7 ⇄ e1          hash chain per bucket
//!   lru_head   ─► e7 ⇄ e1 ⇄ e3 ◄─ lru_tail   most to least recently used
//! ```
//!
//! An entry is reachable from its hash chain if and only if it is on the
//! LRU list; vacated slots are on neither and are recycled through `vacant`.
//! The pool's capacity is an accounting limit: the sum of stored encoded
//! sizes never exceeds `memory_size`.

use crate::codec::{self, Algorithm};
use crate::{Clock, PageKey, RejectReason, ZpoolError};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_info::compression::{
    MAX_COMPRESSION_SIZE, MAX_COMPRESSION_TIME_US, MAX_POOL_NAME, MIN_COMPRESSION_RATIO,
};
use kernel_memory_addresses::PAGE_BYTES;

/// Admission thresholds of a pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Largest accepted `compressed * 100 / original`, in percent.
    pub min_compression_ratio: u32,
    /// Latency budget for compressing one page.
    pub max_compression_time_us: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_compression_ratio: MIN_COMPRESSION_RATIO,
            max_compression_time_us: MAX_COMPRESSION_TIME_US,
        }
    }
}

impl PoolConfig {
    const fn is_valid(&self) -> bool {
        self.min_compression_ratio > 0 && self.min_compression_ratio <= 100
    }
}

/// Snapshot of one stored page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: PageKey,
    pub original_size: usize,
    pub compressed_size: usize,
    /// [`Algorithm::None`] for zero pages.
    pub algorithm: Algorithm,
    pub last_access_us: u64,
    pub access_count: u32,
    /// Set when the original page changed after it was stored.
    pub dirty: bool,
}

/// Snapshot of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub name: String,
    pub algorithm: Algorithm,
    pub config: PoolConfig,
    pub memory_size: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub max_pages: usize,
    pub compressed_pages: usize,
    pub compressions: u64,
    pub decompressions: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes_saved: u64,
}

/// Result of [`Pool::compress`].
pub(crate) struct Stored {
    pub info: EntryInfo,
    pub elapsed_us: u64,
    /// The key was already present; nothing was encoded.
    pub hit: bool,
}

#[derive(Debug, Default, Copy, Clone)]
struct Links {
    prev: Option<usize>,
    next: Option<usize>,
}

struct Entry {
    key: PageKey,
    data: Box<[u8]>,
    algorithm: Algorithm,
    last_access: u64,
    access_count: u32,
    dirty: bool,
    hash: Links,
    lru: Links,
}

impl Entry {
    fn vacant() -> Self {
        Self {
            key: PageKey::new(0),
            data: Box::default(),
            algorithm: Algorithm::None,
            last_access: 0,
            access_count: 0,
            dirty: false,
            hash: Links::default(),
            lru: Links::default(),
        }
    }
}

#[derive(Default)]
struct Counters {
    compressions: u64,
    decompressions: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    bytes_saved: u64,
}

pub(crate) struct Pool {
    name: String,
    algorithm: Algorithm,
    config: PoolConfig,
    memory_size: usize,
    used: usize,
    max_pages: usize,
    len: usize,
    slots: Vec<Entry>,
    vacant: Vec<usize>,
    buckets: Vec<Option<usize>>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    counters: Counters,
}

impl Pool {
    pub(crate) fn new(
        name: &str,
        algorithm: Algorithm,
        memory_size: usize,
        max_pages: usize,
    ) -> Result<Self, ZpoolError> {
        if name.is_empty() || name.len() > MAX_POOL_NAME || memory_size == 0 || max_pages == 0 {
            return Err(ZpoolError::InvalidConfig);
        }
        if !algorithm.is_available() {
            return Err(ZpoolError::UnsupportedAlgorithm(algorithm));
        }
        let buckets = max_pages
            .checked_mul(2)
            .and_then(usize::checked_next_power_of_two)
            .ok_or(ZpoolError::InvalidConfig)?;

        Ok(Self {
            name: String::from(name),
            algorithm,
            config: PoolConfig::default(),
            memory_size,
            used: 0,
            max_pages,
            len: 0,
            slots: Vec::new(),
            vacant: Vec::new(),
            buckets: alloc::vec![None; buckets],
            lru_head: None,
            lru_tail: None,
            counters: Counters::default(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn set_config(&mut self, config: PoolConfig) -> Result<(), ZpoolError> {
        if !config.is_valid() {
            return Err(ZpoolError::InvalidConfig);
        }
        self.config = config;
        Ok(())
    }

    /// Store `page` under `key`, evicting least recently used entries to
    /// make room.
    ///
    /// A key that is already present is a hit: the entry is touched and
    /// returned unchanged.
    pub(crate) fn compress<C: Clock + ?Sized>(
        &mut self,
        key: PageKey,
        page: &[u8; PAGE_BYTES],
        clock: &C,
    ) -> Result<Stored, ZpoolError> {
        if let Some(i) = self.find(key) {
            self.counters.hits += 1;
            self.touch(i, clock.now_us());
            return Ok(Stored {
                info: self.info_at(i),
                elapsed_us: 0,
                hit: true,
            });
        }
        self.counters.misses += 1;

        let start = clock.now_us();
        let (data, algorithm) = self.encode(page)?;
        let elapsed_us = clock.now_us().saturating_sub(start);
        if elapsed_us > self.config.max_compression_time_us {
            log::debug!("zpool {}: {key:?} took {elapsed_us} us", self.name);
            return Err(ZpoolError::Rejected(RejectReason::Latency));
        }

        let size = data.len();
        if size > self.memory_size {
            return Err(ZpoolError::NoSpace);
        }
        while self.len >= self.max_pages || self.memory_size - self.used < size {
            if !self.evict_lru() {
                return Err(ZpoolError::NoSpace);
            }
        }

        let i = self.insert(Entry {
            key,
            data: data.into_boxed_slice(),
            algorithm,
            last_access: clock.now_us(),
            access_count: 1,
            dirty: false,
            hash: Links::default(),
            lru: Links::default(),
        });
        self.hash_link(i);
        self.lru_push_front(i);
        self.used += size;
        self.len += 1;
        self.counters.compressions += 1;
        self.counters.bytes_saved += (PAGE_BYTES - size) as u64;

        log::trace!(
            "zpool {}: stored {key:?} as {size} bytes ({})",
            self.name,
            algorithm.name()
        );
        Ok(Stored {
            info: self.info_at(i),
            elapsed_us,
            hit: false,
        })
    }

    /// Zero-page marker, else the pool's coder subject to the ratio limit.
    fn encode(&self, page: &[u8; PAGE_BYTES]) -> Result<(Vec<u8>, Algorithm), ZpoolError> {
        if codec::is_zero_page(page) {
            return Ok((codec::zero_marker(), Algorithm::None));
        }
        let encoded = match self.algorithm {
            Algorithm::RunLength => codec::rle_encode(page, MAX_COMPRESSION_SIZE),
            _ => None,
        }
        .ok_or(ZpoolError::Rejected(RejectReason::Incompressible))?;

        if ratio_percent(encoded.len()) > u64::from(self.config.min_compression_ratio) {
            return Err(ZpoolError::Rejected(RejectReason::Ratio));
        }
        Ok((encoded, self.algorithm))
    }

    /// Decode the page stored under `key` into `out`; returns the decode time.
    ///
    /// A decode failure leaves the entry in place.
    pub(crate) fn decompress<C: Clock + ?Sized>(
        &mut self,
        key: PageKey,
        out: &mut [u8; PAGE_BYTES],
        clock: &C,
    ) -> Result<u64, ZpoolError> {
        let i = self.find(key).ok_or(ZpoolError::NotCompressed)?;
        let start = clock.now_us();
        let entry = &self.slots[i];
        let decoded = match entry.algorithm {
            Algorithm::None => codec::zero_decode(&entry.data, out),
            Algorithm::RunLength => codec::rle_decode(&entry.data, out),
            Algorithm::Zstd | Algorithm::Lzo | Algorithm::Deflate => Err(ZpoolError::Corrupt),
        };
        if let Err(e) = decoded {
            log::warn!("zpool {}: cannot decode {key:?}: {e}", self.name);
            return Err(e);
        }
        let now = clock.now_us();
        self.touch(i, now);
        self.counters.decompressions += 1;
        Ok(now.saturating_sub(start))
    }

    /// Decode and drop the entry for `key`.
    pub(crate) fn remove<C: Clock + ?Sized>(
        &mut self,
        key: PageKey,
        out: &mut [u8; PAGE_BYTES],
        clock: &C,
    ) -> Result<u64, ZpoolError> {
        let elapsed = self.decompress(key, out, clock)?;
        if let Some(i) = self.find(key) {
            self.release(i);
        }
        Ok(elapsed)
    }

    pub(crate) fn contains(&self, key: PageKey) -> bool {
        self.find(key).is_some()
    }

    pub(crate) fn entry_info(&self, key: PageKey) -> Option<EntryInfo> {
        self.find(key).map(|i| self.info_at(i))
    }

    pub(crate) fn mark_dirty(&mut self, key: PageKey) -> Result<(), ZpoolError> {
        let i = self.find(key).ok_or(ZpoolError::NotCompressed)?;
        self.slots[i].dirty = true;
        Ok(())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            name: self.name.clone(),
            algorithm: self.algorithm,
            config: self.config,
            memory_size: self.memory_size,
            used_bytes: self.used,
            free_bytes: self.memory_size - self.used,
            max_pages: self.max_pages,
            compressed_pages: self.len,
            compressions: c.compressions,
            decompressions: c.decompressions,
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            bytes_saved: c.bytes_saved,
        }
    }

    fn find(&self, key: PageKey) -> Option<usize> {
        let mut cursor = self.buckets[key.bucket(self.buckets.len() - 1)];
        while let Some(i) = cursor {
            if self.slots[i].key == key {
                return Some(i);
            }
            cursor = self.slots[i].hash.next;
        }
        None
    }

    fn info_at(&self, i: usize) -> EntryInfo {
        let e = &self.slots[i];
        EntryInfo {
            key: e.key,
            original_size: PAGE_BYTES,
            compressed_size: e.data.len(),
            algorithm: e.algorithm,
            last_access_us: e.last_access,
            access_count: e.access_count,
            dirty: e.dirty,
        }
    }

    fn insert(&mut self, entry: Entry) -> usize {
        if let Some(i) = self.vacant.pop() {
            self.slots[i] = entry;
            i
        } else {
            self.slots.push(entry);
            self.slots.len() - 1
        }
    }

    /// Unlink slot `i` from both lists and recycle it.
    fn release(&mut self, i: usize) {
        self.hash_unlink(i);
        self.lru_unlink(i);
        self.used -= self.slots[i].data.len();
        self.len -= 1;
        self.slots[i] = Entry::vacant();
        self.vacant.push(i);
    }

    fn evict_lru(&mut self) -> bool {
        let Some(victim) = self.lru_tail else {
            return false;
        };
        log::debug!("zpool {}: evicting {:?}", self.name, self.slots[victim].key);
        self.release(victim);
        self.counters.evictions += 1;
        true
    }

    fn touch(&mut self, i: usize, now: u64) {
        if self.lru_head != Some(i) {
            self.lru_unlink(i);
            self.lru_push_front(i);
        }
        let e = &mut self.slots[i];
        e.last_access = now;
        e.access_count = e.access_count.saturating_add(1);
    }

    fn hash_link(&mut self, i: usize) {
        let b = self.slots[i].key.bucket(self.buckets.len() - 1);
        let head = self.buckets[b];
        self.slots[i].hash = Links {
            prev: None,
            next: head,
        };
        if let Some(h) = head {
            self.slots[h].hash.prev = Some(i);
        }
        self.buckets[b] = Some(i);
    }

    fn hash_unlink(&mut self, i: usize) {
        let Links { prev, next } = self.slots[i].hash;
        match prev {
            Some(p) => self.slots[p].hash.next = next,
            None => {
                let b = self.slots[i].key.bucket(self.buckets.len() - 1);
                self.buckets[b] = next;
            }
        }
        if let Some(n) = next {
            self.slots[n].hash.prev = prev;
        }
        self.slots[i].hash = Links::default();
    }

    fn lru_push_front(&mut self, i: usize) {
        self.slots[i].lru = Links {
            prev: None,
            next: self.lru_head,
        };
        match self.lru_head {
            Some(h) => self.slots[h].lru.prev = Some(i),
            None => self.lru_tail = Some(i),
        }
        self.lru_head = Some(i);
    }

    fn lru_unlink(&mut self, i: usize) {
        let Links { prev, next } = self.slots[i].lru;
        match prev {
            Some(p) => self.slots[p].lru.next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].lru.prev = prev,
            None => self.lru_tail = prev,
        }
        self.slots[i].lru = Links::default();
    }

    #[cfg(test)]
    fn corrupt(&mut self, key: PageKey) {
        if let Some(i) = self.find(key) {
            self.slots[i].data = Box::new([0xFF, 3]);
        }
    }

    #[cfg(test)]
    fn lru_keys(&self) -> Vec<PageKey> {
        let mut keys = Vec::new();
        let mut cursor = self.lru_head;
        while let Some(i) = cursor {
            keys.push(self.slots[i].key);
            cursor = self.slots[i].lru.next;
        }
        keys
    }
}

/// `size` as a percentage of a page, rounded down.
fn ratio_percent(size: usize) -> u64 {
    (size as u64) * 100 / PAGE_BYTES as u64
}
