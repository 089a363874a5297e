//! # Cache Layer Tests: CacheStore
//!
//! Freshness against per-read ttls, invalidation and overwrite semantics.
//! Runs on a paused clock so ages are exact.

use fetch_x::{CacheStore, Response};
use std::time::Duration;
use tokio::time::{advance, Instant};

/// Verifies fresh-then-stale under a 60 s ttl.
#[tokio::test(start_paused = true)]
async fn test_entry_goes_stale_after_ttl() {
    let t = Instant::now();

    let cache = CacheStore::new();
    let ttl = Duration::from_secs(60);
    cache.set("users", Response::ok("[1]"));

    advance(Duration::from_secs(59)).await;
    assert!(cache.is_fresh("users", ttl));
    assert_eq!(cache.get_fresh("users", ttl), Some(Response::ok("[1]")));

    advance(Duration::from_secs(2)).await;
    assert!(!cache.is_fresh("users", ttl), "entry older than ttl reported fresh");
    assert_eq!(cache.get_fresh("users", ttl), None);
    assert!(cache.get("users").is_some(), "stale entries stay until overwritten");

    let overhead = t.elapsed();
    println!("test_entry_goes_stale_after_ttl: Testing Overhead = {:?}", overhead);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_is_never_fresh() {
    let cache = CacheStore::new();
    cache.set("k", 1u32);
    assert!(!cache.is_fresh("k", Duration::ZERO));
    assert_eq!(cache.get_fresh("k", Duration::ZERO), None);
}

/// Verifies that the ttl is evaluated per read, not stored with the entry.
#[tokio::test(start_paused = true)]
async fn test_ttl_is_per_read() {
    let cache = CacheStore::new();
    cache.set("k", "v");
    advance(Duration::from_secs(30)).await;

    assert!(cache.is_fresh("k", Duration::from_secs(60)));
    assert!(!cache.is_fresh("k", Duration::from_secs(10)));
    let entry = cache.get("k").unwrap();
    assert_eq!(entry.age(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_set_overwrites_and_resets_age() {
    let cache = CacheStore::new();
    cache.set("k", "old");
    advance(Duration::from_secs(100)).await;
    cache.set("k", "new");

    let entry = cache.get("k").unwrap();
    assert_eq!(entry.data, "new");
    assert_eq!(entry.age(), Duration::ZERO);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_invalidate_and_clear() {
    let cache = CacheStore::new();
    cache.set("a", 1);
    cache.set("b", 2);

    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"), "second invalidate must report nothing removed");
    assert!(cache.get("a").is_none());

    let shared = cache.clone();
    shared.clear();
    assert!(cache.is_empty(), "clones must share storage");
}
