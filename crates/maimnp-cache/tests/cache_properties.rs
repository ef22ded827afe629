//! Behavioral tests of the cache manager against the in-memory backend.
//!
//! Every test builds its own manager, so no state leaks between tests.

use maimnp_cache::backend::KvBackend;
use maimnp_cache::invalidation::invalidate_resource;
use maimnp_cache::{CacheConfig, CacheManager, CacheRuntime, MemoryBackend};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn enabled() -> (Arc<CacheManager>, MemoryBackend) {
    let backend = MemoryBackend::new();
    let runtime = CacheRuntime::with_backend(&CacheConfig::default(), Arc::new(backend.clone()))
        .expect("valid config");
    (runtime.manager(), backend)
}

fn disabled() -> Arc<CacheManager> {
    CacheRuntime::from_config(&CacheConfig::disabled())
        .expect("valid config")
        .manager()
}

/// Fetch closure counting its invocations.
async fn fetch_kb(calls: &AtomicUsize) -> Option<Value> {
    calls.fetch_add(1, Ordering::SeqCst);
    Some(json!({"id": "kb:1"}))
}

#[tokio::test]
async fn test_round_trip_of_json_values() {
    let (manager, _) = enabled();
    let values = [
        json!(null),
        json!(true),
        json!(12.5),
        json!("text"),
        json!([1, "two", {"three": 3}]),
        json!({"nested": {"list": [1, 2], "flag": false}}),
    ];

    for (i, value) in values.iter().enumerate() {
        let key = manager.build_key("value", i);
        assert!(manager.set_cached(&key, value, None).await);
        assert_eq!(manager.get_cached::<Value>(&key).await.as_ref(), Some(value));
    }
}

#[tokio::test]
async fn test_penetration_bound() {
    let (manager, _) = enabled();
    let calls = AtomicUsize::new(0);
    let key = manager.build_key("user", "missing");

    for _ in 0..2 {
        let value: Option<Value> = manager
            .get_or_fetch(&key, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert_eq!(value, None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_degradation_is_transparent() {
    let expected = Some(json!({"id": "kb:1"}));

    // Healthy but absent.
    let (healthy, _) = enabled();
    let calls = AtomicUsize::new(0);
    assert_eq!(healthy.get_or_fetch("kb:1", None, || fetch_kb(&calls)).await, expected);

    // Backend unreachable.
    let (unreachable, backend) = enabled();
    backend.set_available(false);
    let calls = AtomicUsize::new(0);
    assert_eq!(unreachable.get_or_fetch("kb:1", None, || fetch_kb(&calls)).await, expected);

    // Disabled.
    let calls = AtomicUsize::new(0);
    assert_eq!(disabled().get_or_fetch("kb:1", None, || fetch_kb(&calls)).await, expected);
}

#[tokio::test]
async fn test_invalidate_then_miss() {
    let (manager, _) = enabled();
    let key = manager.build_key("user", 7);
    assert!(manager.set_cached(&key, &json!({"id": 7}), None).await);
    assert!(manager.invalidate(&key).await);
    assert_eq!(manager.get_cached::<Value>(&key).await, None);
}

#[tokio::test]
async fn test_pattern_count_accuracy() {
    let (manager, backend) = enabled();
    for id in 0..25 {
        assert!(manager.set_cached(&manager.build_key("user", id), &id, None).await);
    }
    for id in 0..5 {
        assert!(manager.set_cached(&manager.build_key("order", id), &id, None).await);
    }

    assert_eq!(manager.invalidate_pattern("user:*").await, 25);
    for id in 0..25 {
        assert!(!backend.exists(&manager.build_key("user", id)).await.unwrap());
    }
    assert_eq!(backend.len(), 5);
    assert_eq!(invalidate_resource(&manager, "order").await, 5);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_scenario_enabled_fetch_once() {
    let (manager, backend) = enabled();
    let calls = AtomicUsize::new(0);
    let ttl = Some(Duration::from_secs(3600));

    let first = manager.get_or_fetch("kb:1", ttl, || fetch_kb(&calls)).await;
    assert_eq!(first, Some(json!({"id": "kb:1"})));
    assert_eq!(backend.get("kb:1").await.unwrap().as_deref(), Some(r#"{"id":"kb:1"}"#));

    let second = manager.get_or_fetch("kb:1", ttl, || fetch_kb(&calls)).await;
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scenario_disabled_fetches_every_time() {
    // A disabled runtime drops any backend it is handed.
    let backend = MemoryBackend::new();
    let manager = Arc::new(CacheManager::new(
        &CacheConfig::disabled(),
        Some(Arc::new(backend.clone())),
    ));
    let calls = AtomicUsize::new(0);
    let ttl = Some(Duration::from_secs(3600));

    for _ in 0..2 {
        let value = manager.get_or_fetch("kb:1", ttl, || fetch_kb(&calls)).await;
        assert_eq!(value, Some(json!({"id": "kb:1"})));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(backend.is_empty());
}

/// Stands in for a value holding an OS handle.
struct OpenSocket;

impl Serialize for OpenSocket {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("socket handles cannot be serialized"))
    }
}

#[derive(Serialize)]
struct Connection {
    peer: String,
    socket: OpenSocket,
}

#[tokio::test]
async fn test_scenario_unencodable_value_is_rejected() {
    let (manager, backend) = enabled();
    let value = Connection {
        peer: "10.0.0.1:5432".into(),
        socket: OpenSocket,
    };
    assert!(!manager.set_cached("k", &value, None).await);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let backend = MemoryBackend::new();
    let runtime = CacheRuntime::with_backend(&CacheConfig::default(), Arc::new(backend)).unwrap();
    runtime.shutdown().await;
    runtime.shutdown().await;
}
