//! Process-local backend with TTL support.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::{KvBackend, glob_to_regex};
use crate::error::BackendError;

/// A stored value with optional expiry.
#[derive(Clone, Debug)]
struct StoredValue {
    data: Arc<str>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: &str, ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::from(data),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// Single-instance backend over a `DashMap`.
///
/// Expired entries are removed lazily when touched. The backend can be
/// switched unavailable to exercise outage handling: every call then fails
/// with [`BackendError::Connection`] and `ping` reports `false`.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    map: Arc<DashMap<String, StoredValue>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the backend going down (`false`) or recovering (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw write bypassing availability, for seeding fixtures.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), StoredValue::new(value, None));
    }

    /// Remaining TTL of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.map
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Connection("memory backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.map.remove(key);
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.live(key).map(|entry| entry.data.to_string()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BackendError> {
        self.check()?;
        self.map.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        Ok(match self.map.remove(key) {
            Some((_, entry)) => !entry.is_expired(),
            None => false,
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError> {
        self.check()?;
        let removed = self
            .map
            .remove_if(key, |_, entry| !entry.is_expired() && &*entry.data == expected);
        Ok(removed.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.check()?;
        if self.live(key).is_none() {
            return Ok(false);
        }
        Ok(match self.map.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, BackendError> {
        self.check()?;
        let matcher = glob_to_regex(pattern)?;
        let matching: Vec<String> = self
            .map
            .iter()
            .filter(|e| matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0u64;
        for key in matching {
            if let Some((_, entry)) = self.map.remove(&key)
                && !entry.is_expired()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        self.check().is_ok()
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete() {
        let backend = MemoryBackend::new();
        assert!(backend.set("k", "v", None).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(backend.exists("k").await.unwrap());
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_delete_spares_overwritten_values() {
        let backend = MemoryBackend::new();
        backend.insert_raw("k", "{broken");
        assert!(backend.set("k", "fresh", None).await.unwrap());
        assert!(!backend.compare_and_delete("k", "{broken").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("fresh"));

        assert!(backend.compare_and_delete("k", "fresh").await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn entries_expire() {
        let backend = MemoryBackend::new();
        backend
            .set("short", "v", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(backend.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(backend.get("short").await.unwrap().is_none());
        assert!(!backend.expire("short", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn expire_updates_ttl() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert!(backend.ttl("k").is_none());
        assert!(backend.expire("k", Duration::from_secs(30)).await.unwrap());
        let ttl = backend.ttl("k").unwrap();
        assert!(ttl <= Duration::from_secs(30) && ttl > Duration::from_secs(25));
    }

    #[tokio::test]
    async fn delete_pattern_counts_removed_keys() {
        let backend = MemoryBackend::new();
        for id in 0..5 {
            backend
                .set(&format!("p:user:{id}"), "v", None)
                .await
                .unwrap();
        }
        backend.set("p:article:1", "v", None).await.unwrap();

        assert_eq!(backend.delete_pattern("p:user:*").await.unwrap(), 5);
        assert_eq!(backend.delete_pattern("p:user:*").await.unwrap(), 0);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn delete_pattern_honors_negated_classes() {
        let backend = MemoryBackend::new();
        for key in ["user:a1", "user:b1", "user:^1"] {
            backend.set(key, "v", None).await.unwrap();
        }

        assert_eq!(backend.delete_pattern("user:[^a]*").await.unwrap(), 2);
        assert!(backend.exists("user:a1").await.unwrap());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_backend_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(matches!(
            backend.get("k").await,
            Err(BackendError::Connection(_))
        ));
        assert!(backend.set("k", "v", None).await.is_err());
        assert!(!backend.ping().await);

        backend.set_available(true);
        assert!(backend.ping().await);
    }
}
