//! Composition root of the cache layer.

use std::sync::Arc;

use crate::backend::{KvBackend, RedisClient};
use crate::config::{CacheConfig, HttpCacheConfig};
use crate::error::ConfigError;
use crate::http::HttpCache;
use crate::manager::CacheManager;
use crate::metrics;

/// Owns the shared [`CacheManager`] for the lifetime of the process.
///
/// Build one at startup, hand out [`manager`](Self::manager) clones, and call
/// [`shutdown`](Self::shutdown) before exiting so pooled connections are
/// released.
pub struct CacheRuntime {
    config: CacheConfig,
    manager: Arc<CacheManager>,
}

impl CacheRuntime {
    /// Validates `config` and wires a Redis backend when caching is enabled.
    ///
    /// No connection is opened here; the pool is created on first use.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend: Option<Arc<dyn KvBackend>> = if config.enabled {
            Some(Arc::new(RedisClient::new(config)))
        } else {
            None
        };
        Ok(Self::assemble(config, backend))
    }

    /// Uses a caller-supplied backend instead of Redis.
    pub fn with_backend(
        config: &CacheConfig,
        backend: Arc<dyn KvBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config, Some(backend)))
    }

    fn assemble(config: &CacheConfig, backend: Option<Arc<dyn KvBackend>>) -> Self {
        let manager = Arc::new(CacheManager::new(config, backend));
        metrics::set_cache_enabled(manager.is_enabled());
        tracing::info!(
            enabled = manager.is_enabled(),
            key_prefix = %config.key_prefix,
            default_ttl_secs = config.default_ttl,
            "cache runtime initialized"
        );
        Self {
            config: config.clone(),
            manager,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn manager(&self) -> Arc<CacheManager> {
        Arc::clone(&self.manager)
    }

    /// Middleware state sharing this runtime's manager.
    pub fn http_cache(&self, config: HttpCacheConfig) -> Arc<HttpCache> {
        Arc::new(HttpCache::new(self.manager(), config))
    }

    /// Drains background cleanups and closes the backend.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        metrics::set_cache_enabled(false);
    }
}
