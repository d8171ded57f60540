//! Result caching keyed by request fingerprint.
//!
//! [`ResultCache`] bounds memory two ways: a hard entry capacity with
//! least-recently-used eviction, and a per-entry time-to-live.

mod recency;
mod stats;
mod store;

pub use stats::CacheStats;
pub use store::ResultCache;
