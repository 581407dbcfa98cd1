//! # Time source for latency accounting

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic microsecond clock.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// A clock that advances by one tick on every reading.
///
/// Without a calibrated timer every measured operation takes exactly one
/// microsecond, which always fits the default budget.
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }
}

impl Clock for TickClock {
    fn now_us(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A clock under test control.
///
/// Each reading returns the current time and then advances it by `step`.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    step: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step: AtomicU64::new(0),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::Relaxed);
    }

    /// Make every reading advance the clock by `us`.
    pub fn set_step(&self, us: u64) {
        self.step.store(us, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        let step = self.step.load(Ordering::Relaxed);
        self.now.fetch_add(step, Ordering::Relaxed)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_clock_is_strictly_increasing() {
        let clock = TickClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b > a);
    }

    #[test]
    fn manual_clock_steps() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_us(), 100);
        clock.set_step(10);
        assert_eq!(clock.now_us(), 100);
        assert_eq!(clock.now_us(), 110);
        clock.advance(5);
        assert_eq!(clock.now_us(), 125);
        clock.set(0);
        assert_eq!(clock.now_us(), 0);
    }
}
