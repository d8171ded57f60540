//! Capacity- and TTL-bounded result cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::recency::RecencyList;
use crate::cache::stats::CacheStats;
use crate::config::{CacheConfig, MAX_DURATION};
use crate::error::{RagError, Result};

#[derive(Debug)]
struct Entry<V> {
    key: String,
    value: V,
    created_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct Inner<V> {
    index: HashMap<String, usize>,
    recency: RecencyList<Entry<V>>,
    /// Entries ordered by expiry, so a full cache reclaims dead entries first.
    expiry: BTreeSet<(Instant, usize)>,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn remove_slot(&mut self, slot: usize) -> Option<Entry<V>> {
        let entry = self.recency.remove(slot)?;
        self.index.remove(&entry.key);
        self.expiry.remove(&(entry.expires_at, slot));
        Some(entry)
    }

    /// Free one slot: an expired entry if there is one, else the least recently used.
    fn make_room(&mut self, now: Instant) {
        if let Some(&(expires_at, slot)) = self.expiry.first() {
            if expires_at <= now {
                if let Some(entry) = self.remove_slot(slot) {
                    self.stats.evictions_expired += 1;
                    debug!(key = %entry.key, "reclaimed expired entry");
                }
                return;
            }
        }
        if let Some(slot) = self.recency.back() {
            if let Some(entry) = self.remove_slot(slot) {
                self.stats.evictions_capacity += 1;
                debug!(
                    key = %entry.key,
                    idle = ?now.duration_since(entry.last_accessed),
                    "evicted least recently used entry"
                );
            }
        }
    }
}

/// A thread-safe LRU cache whose entries expire after a time-to-live.
///
/// - `get` returns a value only if present and unexpired, and marks it as
///   most recently used.
/// - `put` never lets the entry count exceed `capacity`: when full it first
///   reclaims an expired entry, otherwise evicts the least recently used one
///   (ties on access time resolve to the earliest inserted).
/// - Expired entries are removed eagerly when a lookup finds them.
///
/// Every operation runs under one short critical section, so concurrent
/// callers never see a torn value or a wrong entry count. Time comes from
/// `tokio::time`, which lets tests drive expiry with a paused clock.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use quill_rag::ResultCache;
///
/// let cache = ResultCache::new(1000, Duration::from_secs(3600))?;
/// cache.put("fingerprint", "generated text".to_string(), Duration::from_secs(60))?;
/// assert_eq!(cache.get("fingerprint").as_deref(), Some("generated text"));
/// ```
#[derive(Debug)]
pub struct ResultCache<V> {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `capacity` is zero or `default_ttl` is zero
    /// or longer than [`MAX_DURATION`].
    pub fn new(capacity: usize, default_ttl: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(RagError::invalid("cache capacity must be at least 1"));
        }
        validate_ttl(default_ttl)?;
        Ok(Self {
            capacity,
            default_ttl,
            inner: Mutex::new(Inner {
                index: HashMap::with_capacity(capacity.min(4096)),
                recency: RecencyList::with_capacity(capacity.min(4096)),
                expiry: BTreeSet::new(),
                stats: CacheStats { capacity, ..Default::default() },
            }),
        })
    }

    /// Create a cache from a [`CacheConfig`].
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.capacity, config.ttl)
    }

    /// Return the value for `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        let Some(&slot) = inner.index.get(key) else {
            inner.stats.misses += 1;
            debug!(key, "cache miss");
            return None;
        };

        let expired = inner.recency.get(slot).is_none_or(|e| e.is_expired(now));
        if expired {
            inner.remove_slot(slot);
            inner.stats.expired_misses += 1;
            inner.stats.evictions_expired += 1;
            debug!(key, "cache entry expired");
            return None;
        }

        inner.recency.promote(slot);
        inner.stats.hits += 1;
        let entry = inner.recency.get_mut(slot)?;
        entry.last_accessed = now;
        debug!(key, age = ?now.duration_since(entry.created_at), "cache hit");
        Some(entry.value.clone())
    }

    /// Insert or replace `key`, expiring `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `ttl` is zero or longer than [`MAX_DURATION`].
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<()> {
        validate_ttl(ttl)?;
        let key = key.into();
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| RagError::invalid(format!("ttl {ttl:?} overflows the clock")))?;
        let mut inner = self.lock();

        if let Some(&slot) = inner.index.get(&key) {
            let previous_expiry = inner.recency.get(slot).map(|e| e.expires_at);
            if let Some(previous) = previous_expiry {
                inner.expiry.remove(&(previous, slot));
            }
            if let Some(entry) = inner.recency.get_mut(slot) {
                entry.value = value;
                entry.created_at = now;
                entry.expires_at = expires_at;
                entry.last_accessed = now;
            }
            inner.recency.promote(slot);
            inner.expiry.insert((expires_at, slot));
            debug!(key = %key, ?ttl, "replaced cache entry");
            return Ok(());
        }

        while inner.recency.len() >= self.capacity {
            inner.make_room(now);
        }

        let slot = inner.recency.push_front(Entry {
            key: key.clone(),
            value,
            created_at: now,
            expires_at,
            last_accessed: now,
        });
        inner.index.insert(key.clone(), slot);
        inner.expiry.insert((expires_at, slot));
        inner.stats.entries = inner.recency.len();
        debug!(key = %key, ?ttl, entries = inner.stats.entries, "cached entry");
        Ok(())
    }

    /// Insert or replace `key` with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.put(key, value, self.default_ttl)
    }

    /// Remove `key` if present. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(&slot) = inner.index.get(key) else {
            return false;
        };
        inner.remove_slot(slot);
        inner.stats.invalidations += 1;
        debug!(key, "invalidated cache entry");
        true
    }

    /// Physically remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut removed = 0;
        while let Some(&(expires_at, slot)) = inner.expiry.first() {
            if expires_at > now {
                break;
            }
            inner.remove_slot(slot);
            removed += 1;
        }
        inner.stats.evictions_expired += removed as u64;
        if removed > 0 {
            debug!(removed, "purged expired entries");
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let count = inner.recency.len();
        inner.index.clear();
        inner.recency.clear();
        inner.expiry.clear();
        inner.stats.invalidations += count as u64;
        debug!(count, "cleared cache");
    }

    /// Number of entries held, including expired entries not yet reclaimed.
    pub fn len(&self) -> usize {
        self.lock().recency.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL used by [`insert`](Self::insert).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats { entries: inner.recency.len(), ..inner.stats.clone() }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // Critical sections never leave the state half-updated, so a poisoned
        // lock still guards consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(RagError::invalid("ttl must be greater than zero"));
    }
    if ttl > MAX_DURATION {
        return Err(RagError::invalid(format!("ttl {ttl:?} exceeds {MAX_DURATION:?}")));
    }
    Ok(())
}
