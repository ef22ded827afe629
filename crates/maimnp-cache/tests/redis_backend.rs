//! Integration tests against a real Redis.
//!
//! These tests use testcontainers and need a Docker daemon; run them with
//! `cargo test -- --ignored`.

use maimnp_cache::backend::KvBackend;
use maimnp_cache::{CacheConfig, CacheRuntime, HealthStatus, RedisClient};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

async fn redis_config(key_prefix: &str) -> CacheConfig {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, port)
        })
        .await;

    CacheConfig {
        host: "127.0.0.1".into(),
        port: *port,
        key_prefix: key_prefix.into(),
        ..CacheConfig::default()
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_client_commands() {
    let client = RedisClient::new(&redis_config("cmd").await);
    assert!(!client.is_connected());

    assert!(client.set("cmd:a", "1", Some(Duration::from_secs(30))).await.unwrap());
    assert!(client.is_connected());
    assert_eq!(client.get("cmd:a").await.unwrap().as_deref(), Some("1"));
    assert!(client.exists("cmd:a").await.unwrap());
    assert!(client.expire("cmd:a", Duration::from_secs(5)).await.unwrap());
    assert!(!client.expire("cmd:nope", Duration::from_secs(5)).await.unwrap());

    assert!(client.delete("cmd:a").await.unwrap());
    assert!(!client.delete("cmd:a").await.unwrap());
    assert_eq!(client.get("cmd:a").await.unwrap(), None);

    assert!(client.ping().await);
    client.close().await;
    client.close().await;
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_compare_and_delete_spares_rewritten_keys() {
    let client = RedisClient::new(&redis_config("cad").await);
    client.set("cad:k", "{broken", None).await.unwrap();
    client.set("cad:k", "5", None).await.unwrap();

    assert!(!client.compare_and_delete("cad:k", "{broken").await.unwrap());
    assert_eq!(client.get("cad:k").await.unwrap().as_deref(), Some("5"));
    assert!(client.compare_and_delete("cad:k", "5").await.unwrap());
    assert!(!client.exists("cad:k").await.unwrap());
    client.close().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_pattern_delete_scans_in_batches() {
    let client = RedisClient::new(&redis_config("scan").await);
    for i in 0..1200 {
        client.set(&format!("scan:user:{i}"), "x", None).await.unwrap();
    }
    client.set("scan:order:1", "x", None).await.unwrap();

    assert_eq!(client.delete_pattern("scan:user:*").await.unwrap(), 1200);
    assert_eq!(client.delete_pattern("scan:user:*").await.unwrap(), 0);
    assert!(client.exists("scan:order:1").await.unwrap());
    client.close().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_manager_over_redis() {
    let runtime = CacheRuntime::from_config(&redis_config("mgr").await).unwrap();
    let manager = runtime.manager();
    assert_eq!(manager.health().await, HealthStatus::Healthy);

    let calls = AtomicUsize::new(0);
    let key = manager.build_key("kb", 1);
    for _ in 0..2 {
        let value: Option<Value> = manager
            .get_or_fetch(&key, Some(Duration::from_secs(3600)), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(json!({"id": "kb:1"}))
            })
            .await;
        assert_eq!(value, Some(json!({"id": "kb:1"})));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(manager.invalidate_pattern("kb:*").await, 1);
    runtime.shutdown().await;
}
