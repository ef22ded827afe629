//! Invalidation helpers for write paths.
//!
//! Thin wrappers over [`CacheManager`] that follow the key layout used by
//! [`CacheManager::build_key`] and the HTTP middleware. They degrade exactly
//! like the manager operations they call.

use crate::manager::CacheManager;

/// Drops the cached entry of one entity, `{prefix}:{resource}:{id}`.
pub async fn invalidate_entity(
    manager: &CacheManager,
    resource: &str,
    id: impl std::fmt::Display,
) -> bool {
    manager.invalidate(&manager.build_key(resource, id)).await
}

/// Drops every cached entry of a resource type.
pub async fn invalidate_resource(manager: &CacheManager, resource: &str) -> u64 {
    manager.invalidate_pattern(&format!("{resource}:*")).await
}

/// Drops a list of fully qualified keys and returns how many deletions
/// succeeded at the backend.
pub async fn invalidate_keys<I, K>(manager: &CacheManager, keys: I) -> usize
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let mut succeeded = 0;
    for key in keys {
        if manager.invalidate(key.as_ref()).await {
            succeeded += 1;
        }
    }
    succeeded
}

/// Drops every response stored by the HTTP caching middleware.
pub async fn invalidate_http_responses(manager: &CacheManager) -> u64 {
    manager.invalidate_pattern("http:*").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KvBackend, MemoryBackend};
    use crate::config::CacheConfig;
    use std::sync::Arc;

    fn manager() -> (CacheManager, MemoryBackend) {
        let backend = MemoryBackend::new();
        let manager = CacheManager::new(&CacheConfig::default(), Some(Arc::new(backend.clone())));
        (manager, backend)
    }

    #[tokio::test]
    async fn entity_and_resource() {
        let (manager, backend) = manager();
        for id in 1..=3 {
            assert!(manager.set_cached(&manager.build_key("user", id), &id, None).await);
        }
        assert!(manager.set_cached(&manager.build_key("post", 1), &1, None).await);

        assert!(invalidate_entity(&manager, "user", 1).await);
        assert!(!backend.exists("maimnp:user:1").await.unwrap());

        assert_eq!(invalidate_resource(&manager, "user").await, 2);
        assert!(backend.exists("maimnp:post:1").await.unwrap());
    }

    #[tokio::test]
    async fn explicit_keys_and_http_responses() {
        let (manager, backend) = manager();
        backend.insert_raw("maimnp:a", "1");
        backend.insert_raw("maimnp:b", "2");
        backend.insert_raw("maimnp:http:abc", "{}");
        backend.insert_raw("maimnp:http:def", "{}");

        assert_eq!(invalidate_keys(&manager, ["maimnp:a", "maimnp:b", "maimnp:missing"]).await, 3);
        assert_eq!(invalidate_http_responses(&manager).await, 2);
        assert!(backend.is_empty());

        backend.set_available(false);
        assert_eq!(invalidate_keys(&manager, vec!["maimnp:a".to_string()]).await, 0);
        assert_eq!(invalidate_http_responses(&manager).await, 0);
    }
}
