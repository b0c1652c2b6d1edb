//! Request deduplication for dashboard reads
//!
//! Timeline and history reads are keyed by a canonical [`FilterKey`] and go
//! through a [`DedupCache`] so overlapping pollers and view switches never
//! fan out into duplicate network calls.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod key;

pub use cache::{CacheConfig, CacheEntry, CacheStats, DedupCache};
pub use key::{FilterKey, FilterKeyBuilder};
