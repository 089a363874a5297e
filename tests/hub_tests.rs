//! # Fan-out Layer Tests: SubscriptionHub
//!
//! Per-key delivery, unsubscribe on drop and snapshot semantics when the
//! subscriber set changes mid-notification.

use fetch_x::{FetchError, Response, StatePatch, SubscriptionHub};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Verifies that patches reach only the subscribers of their key.
#[test]
fn test_notify_is_scoped_to_key() {
    let t = Instant::now();

    let hub: SubscriptionHub<StatePatch> = SubscriptionHub::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    let _users = hub.subscribe("users", move |patch: &StatePatch| log.lock().unwrap().push(patch.clone()));
    let _other = hub.subscribe("orders", |_: &StatePatch| panic!("wrong key notified"));

    assert_eq!(hub.notify("users", &StatePatch::fetching()), 1);
    assert_eq!(hub.notify("users", &StatePatch::succeeded(Response::ok("[]"))), 1);
    assert_eq!(hub.notify("nobody", &StatePatch::idle()), 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].is_fetching, Some(true));
    assert_eq!(seen[1].data, Some(Response::ok("[]")));
    assert_eq!(seen[1].error, None);

    let overhead = t.elapsed();
    println!("test_notify_is_scoped_to_key: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_drop_unsubscribes() {
    let hub: SubscriptionHub<u32> = SubscriptionHub::new();
    let first = hub.subscribe("k", |_: &u32| {});
    let second = hub.subscribe("k", |_: &u32| {});
    assert_eq!(hub.subscriber_count("k"), 2);

    drop(first);
    assert_eq!(hub.subscriber_count("k"), 1);
    assert_eq!(second.key(), "k");
    second.unsubscribe();
    assert_eq!(hub.subscriber_count("k"), 0);
    assert_eq!(hub.notify("k", &1), 0);
}

#[test]
fn test_subscription_outliving_hub_is_harmless() {
    let hub: SubscriptionHub<u32> = SubscriptionHub::new();
    let subscription = hub.subscribe("k", |_: &u32| {});
    drop(hub);
    drop(subscription);
}

/// Verifies that subscribing or unsubscribing from inside a callback does
/// not affect the notification pass in progress.
#[test]
fn test_callbacks_may_change_subscriber_set() {
    let hub: SubscriptionHub<u32> = SubscriptionHub::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let late: Arc<Mutex<Vec<fetch_x::Subscription>>> = Arc::new(Mutex::new(Vec::new()));
    let victim: Arc<Mutex<Option<fetch_x::Subscription>>> = Arc::new(Mutex::new(None));

    let (hub_ref, late_ref, victim_ref, count) = (hub.clone(), Arc::clone(&late), Arc::clone(&victim), Arc::clone(&calls));
    let _first = hub.subscribe("k", move |_: &u32| {
        count.fetch_add(1, Ordering::SeqCst);
        victim_ref.lock().unwrap().take();
        let inner = Arc::clone(&count);
        late_ref.lock().unwrap().push(hub_ref.subscribe("k", move |_: &u32| {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
    });
    let count = Arc::clone(&calls);
    *victim.lock().unwrap() = Some(hub.subscribe("k", move |_: &u32| {
        count.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(hub.notify("k", &7), 2, "snapshot must include both original subscribers");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(hub.subscriber_count("k"), 2, "victim removed, late subscriber added");
}

#[test]
fn test_patch_constructors() {
    let failed = StatePatch::failed(FetchError::Timeout(10));
    assert_eq!(failed.is_fetching, Some(false));
    assert_eq!(failed.error, Some(FetchError::Timeout(10)));
    assert!(failed.data.is_none());

    let mutated = StatePatch::mutated(Response::ok("x"));
    assert_eq!(mutated.is_fetching, None, "a mutation leaves fetching state alone");
}
