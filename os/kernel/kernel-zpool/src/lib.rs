//! # Compressed Page Pools
//!
//! Named, capacity-bounded pools that hold pages in encoded form so that
//! cold memory can be reclaimed without a swap device.
//!
//! ```text
//!  compress_page(id, key, page)
//!        │
//!        ├─ key present ─► hit: touch LRU, return entry
//!        ├─ zero page ─► 4-byte marker
//!        ├─ encode with the pool's coder ─► Rejected(Incompressible)
//!        ├─ ratio / latency thresholds ─► Rejected(Ratio | Latency)
//!        └─ evict LRU tail until it fits ─► NoSpace if it never does
//! ```
//!
//! A rejection is not an error condition for the caller's page; it simply
//! stays uncompressed. Only [`Algorithm::RunLength`] (and zero pages under
//! [`Algorithm::None`]) are built in; the other selectors are recognised but
//! refused at pool creation.
//!
//! ## Usage
//! ```rust
//! use kernel_zpool::{Algorithm, PageKey, Registry};
//!
//! let registry = Registry::new();
//! let pool = registry.create_pool("swap", Algorithm::RunLength, 1 << 20, 256).unwrap();
//!
//! let key = PageKey::new(0x1000);
//! registry.compress_page(pool, key, &[7; 4096]).unwrap();
//!
//! let mut page = [0; 4096];
//! registry.remove_page(pool, key, &mut page).unwrap();
//! assert_eq!(page, [7; 4096]);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod clock;
mod codec;
mod error;
mod key;
mod pool;
mod registry;

pub use crate::clock::{Clock, ManualClock, TickClock};
pub use crate::codec::Algorithm;
pub use crate::error::{RejectReason, ZpoolError};
pub use crate::key::PageKey;
pub use crate::pool::{EntryInfo, PoolConfig, PoolStats};
pub use crate::registry::{CompressionStats, PoolId, Registry};

/// Re-export constants as info module.
pub use kernel_info::compression as info;
