//! # Kernel synchronization primitives
//!
//! The memory core guards each buddy zone, each compression pool and the pool
//! registry with its own [`SpinLock`]. None of these critical sections block or
//! yield, so a test-and-test-and-set spin lock is all that is needed.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
