//! Result cache: LRU eviction, TTL expiry and concurrent access.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use quill_rag::{CacheConfig, MAX_DURATION, RagError, ResultCache};

const HOUR: Duration = Duration::from_secs(3600);

fn cache(capacity: usize) -> ResultCache<String> {
    ResultCache::new(capacity, HOUR).unwrap()
}

#[test]
fn get_returns_what_was_put() {
    let cache = cache(4);
    cache.put("a", "alpha".to_string(), HOUR).unwrap();
    assert_eq!(cache.get("a").as_deref(), Some("alpha"));
    assert_eq!(cache.get("missing"), None);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
}

#[test]
fn least_recently_used_is_evicted_first() {
    let cache = cache(2);
    cache.insert("a", "1".to_string()).unwrap();
    cache.insert("b", "2".to_string()).unwrap();
    assert!(cache.get("a").is_some());

    cache.insert("c", "3".to_string()).unwrap();
    assert_eq!(cache.len(), 2);
    assert!(cache.get("b").is_none());
    assert!(cache.get("a").is_some());
    assert!(cache.get("c").is_some());
    assert_eq!(cache.stats().evictions_capacity, 1);
}

#[test]
fn put_replaces_existing_key() {
    let cache = cache(2);
    cache.insert("k", "first".to_string()).unwrap();
    cache.insert("k", "second".to_string()).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("k").as_deref(), Some("second"));
}

#[test]
fn invalid_construction_and_ttl_are_rejected() {
    assert!(matches!(ResultCache::<String>::new(0, HOUR), Err(RagError::InvalidArgument(_))));
    assert!(ResultCache::<String>::new(1, Duration::ZERO).is_err());

    let cache = cache(1);
    let err = cache.put("k", "v".to_string(), Duration::ZERO).unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn oversized_ttl_is_rejected_without_panicking() {
    assert!(matches!(
        ResultCache::<String>::new(1, Duration::MAX),
        Err(RagError::InvalidArgument(_))
    ));

    let cache = cache(2);
    let err = cache.put("k", "v".to_string(), Duration::MAX).unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
    assert!(cache.is_empty());

    cache.put("k", "v".to_string(), MAX_DURATION).unwrap();
    tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
    assert_eq!(cache.get("k").as_deref(), Some("v"));
}

#[test]
fn invalidate_and_clear() {
    let cache = cache(4);
    cache.insert("a", "1".to_string()).unwrap();
    cache.insert("b", "2".to_string()).unwrap();

    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"));
    assert_eq!(cache.get("a"), None);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.stats().invalidations, 2);
}

#[test]
fn from_config_uses_configured_bounds() {
    let config = CacheConfig { capacity: 3, ttl: Duration::from_secs(5) };
    let cache: ResultCache<u32> = ResultCache::from_config(&config).unwrap();
    assert_eq!(cache.capacity(), 3);
    assert_eq!(cache.default_ttl(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let cache = cache(4);
    cache.put("k", "v".to_string(), Duration::from_secs(10)).unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.get("k").is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("k"), None);

    // removed eagerly on the expired lookup
    assert_eq!(cache.len(), 0);
    let stats = cache.stats();
    assert_eq!((stats.expired_misses, stats.evictions_expired), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn reading_does_not_extend_ttl() {
    let cache = cache(4);
    cache.put("k", "v".to_string(), Duration::from_secs(10)).unwrap();
    for _ in 0..9 {
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_some());
    }
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get("k").is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_reclaimed_before_live_lru() {
    let cache = cache(2);
    cache.put("long-lived", "1".to_string(), Duration::from_secs(100)).unwrap();
    cache.put("short-lived", "2".to_string(), Duration::from_secs(5)).unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    cache.put("new", "3".to_string(), HOUR).unwrap();

    // "long-lived" is the LRU entry but still valid, so it survives
    assert!(cache.get("long-lived").is_some());
    assert!(cache.get("new").is_some());
    let stats = cache.stats();
    assert_eq!((stats.evictions_expired, stats.evictions_capacity), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn purge_removes_only_expired_entries() {
    let cache = cache(8);
    for i in 0..3 {
        cache.put(format!("short-{i}"), "s".to_string(), Duration::from_secs(1)).unwrap();
    }
    cache.put("long", "l".to_string(), Duration::from_secs(60)).unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.purge_expired(), 3);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.purge_expired(), 0);
}

#[test]
fn concurrent_writers_never_exceed_capacity() {
    let cache = Arc::new(cache(16));
    std::thread::scope(|scope| {
        for t in 0..8 {
            let cache = Arc::clone(&cache);
            scope.spawn(move || {
                for i in 0..500 {
                    let key = format!("k{}", (t * 31 + i) % 64);
                    cache.insert(key.clone(), format!("{t}:{i}")).unwrap();
                    if let Some(value) = cache.get(&key) {
                        assert!(value.contains(':'));
                    }
                    assert!(cache.len() <= 16);
                }
            });
        }
    });
    assert_eq!(cache.len(), 16);
    let stats = cache.stats();
    assert_eq!(stats.entries, 16);
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8),
    Get(u8),
    Invalidate(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..12).prop_map(Op::Put),
        2 => (0u8..12).prop_map(Op::Get),
        1 => (0u8..12).prop_map(Op::Invalidate),
    ]
}

/// *For any* sequence of operations, the cache never holds more than
/// `capacity` entries, and a key just written reads back its new value.
mod prop_capacity_bound {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn size_stays_within_capacity(
            capacity in 1usize..6,
            ops in proptest::collection::vec(arb_op(), 1..80),
        ) {
            let cache: ResultCache<u32> = ResultCache::new(capacity, HOUR).unwrap();
            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Put(k) => {
                        cache.insert(k.to_string(), step as u32).unwrap();
                        prop_assert_eq!(cache.get(&k.to_string()), Some(step as u32));
                    }
                    Op::Get(k) => {
                        cache.get(&k.to_string());
                    }
                    Op::Invalidate(k) => {
                        cache.invalidate(&k.to_string());
                        prop_assert_eq!(cache.get(&k.to_string()), None);
                    }
                }
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
