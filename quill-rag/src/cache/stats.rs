//! Cache counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Statistics for a [`ResultCache`](crate::ResultCache).
///
/// `get` reports "absent" for both never-inserted and expired keys; the two
/// reasons are only distinguishable here (`misses` vs `expired_misses`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups for keys that were not present.
    pub misses: u64,
    /// Lookups that found an entry past its expiry.
    pub expired_misses: u64,
    /// Entries evicted to stay within capacity.
    pub evictions_capacity: u64,
    /// Expired entries physically removed.
    pub evictions_expired: u64,
    /// Explicit invalidations.
    pub invalidations: u64,
    /// Entries currently held (may include expired entries not yet reclaimed).
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.expired_misses;
        if total == 0 { 0.0 } else { (self.hits as f64 / total as f64) * 100.0 }
    }

    /// Capacity utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 { 0.0 } else { (self.entries as f64 / self.capacity as f64) * 100.0 }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, expired: {}, hit_rate: {:.2}%, \
             entries: {}/{}, evictions: {} }}",
            self.hits,
            self.misses,
            self.expired_misses,
            self.hit_rate(),
            self.entries,
            self.capacity,
            self.evictions_capacity + self.evictions_expired
        )
    }
}
