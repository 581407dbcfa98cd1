use alloc::collections::VecDeque;
use alloc::string::String;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sync::SpinLock;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A [`Log`] sink that keeps the most recent records in memory.
///
/// Once `capacity` records are buffered the oldest one is dropped for each
/// new record. A console drains the buffer with [`drain_into`](Self::drain_into).
pub struct RingLogger {
    max_level: LevelFilter,
    capacity: usize,
    records: SpinLock<VecDeque<String>>,
    dropped: AtomicU64,
}

impl RingLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter, capacity: usize) -> Self {
        Self {
            max_level,
            capacity,
            records: SpinLock::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Install as the global logger. Call this once during early init.
    #[allow(clippy::missing_errors_doc)]
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.with_lock(|r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write and remove every buffered record, oldest first, one per line.
    ///
    /// # Errors
    /// Stops at the first failing write; records not yet written stay buffered.
    pub fn drain_into(&self, out: &mut impl Write) -> fmt::Result {
        self.records.with_lock(|records| {
            while let Some(line) = records.front() {
                writeln!(out, "{line}")?;
                records.pop_front();
            }
            Ok(())
        })
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) || self.capacity == 0 {
            return;
        }

        // Format before taking the lock.
        let mut line = String::new();
        if write!(line, "[{}] {}: {}", record.level(), record.target(), record.args()).is_err() {
            return;
        }

        self.records.with_lock(|records| {
            if records.len() == self.capacity {
                records.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            records.push_back(line);
        });
    }

    fn flush(&self) {}
}
