//! Cache-aside orchestration with automatic degradation.
//!
//! ## Lookup flow
//!
//! ```text
//! get_or_fetch(key) ─┬─ disabled ──────────────→ fetch()            (no backend I/O)
//!                    └─ backend GET ─┬─ error ─→ fetch() → write back
//!                                    ├─ null sentinel → None         (cached absence)
//!                                    ├─ JSON ok ──→ value            (hit)
//!                                    ├─ JSON bad ─→ evict → fetch() → write back
//!                                    └─ missing ──→ fetch() → write back
//! ```
//!
//! A cache failure never becomes a failure of the operation it accelerates:
//! backend and encoding errors are logged, counted and replaced by the
//! fallback. Concurrent misses on the same key may all call `fetch`; fetch
//! callbacks must be idempotent.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::KvBackend;
use crate::codec::{self, NULL_TTL};
use crate::config::CacheConfig;
use crate::events::{CacheEventLogger, DegradationEvent, DegradationReason, LogLevel};
use crate::metrics::{self, OpStatus};
use crate::tasks::{CleanupTasks, MAX_PENDING_CLEANUPS};

const SOURCE: &str = "cache_manager";

/// Result of the health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

enum Lookup<T> {
    Hit(T),
    CachedAbsence,
    Miss,
}

/// Key-value cache orchestrator.
///
/// Constructed once by [`CacheRuntime`](crate::factory::CacheRuntime) and
/// shared as `Arc<CacheManager>`.
pub struct CacheManager {
    enabled: bool,
    key_prefix: String,
    default_ttl: Duration,
    backend: Option<Arc<dyn KvBackend>>,
    logger: CacheEventLogger,
    cleanup: CleanupTasks,
}

impl CacheManager {
    /// Creates a manager. The backend is ignored when caching is disabled.
    pub fn new(config: &CacheConfig, backend: Option<Arc<dyn KvBackend>>) -> Self {
        let logger = CacheEventLogger::new(SOURCE);
        Self {
            enabled: config.enabled,
            key_prefix: config.key_prefix.clone(),
            default_ttl: config.default_ttl(),
            backend: if config.enabled { backend } else { None },
            logger,
            cleanup: CleanupTasks::new(MAX_PENDING_CLEANUPS, logger),
        }
    }

    /// A manager that never touches a backend.
    pub fn disabled(config: &CacheConfig) -> Self {
        Self::new(
            &CacheConfig {
                enabled: false,
                ..config.clone()
            },
            None,
        )
    }

    /// Caching is switched on and a backend is attached.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.backend.is_some()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn backend(&self) -> Option<&Arc<dyn KvBackend>> {
        self.backend.as_ref()
    }

    /// `{prefix}:{resource}:{id}`.
    pub fn build_key(&self, resource: &str, id: impl std::fmt::Display) -> String {
        format!("{}:{}:{}", self.key_prefix, resource, id)
    }

    /// Prepends the key prefix unless the pattern already carries it.
    pub fn qualify_pattern(&self, pattern: &str) -> String {
        let prefix = format!("{}:", self.key_prefix);
        if pattern.starts_with(&prefix) {
            pattern.to_string()
        } else {
            format!("{prefix}{pattern}")
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Looks a key up without a fallback.
    ///
    /// Returns `None` on a miss, on a cached absence, when disabled and when
    /// the backend is unreachable.
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.lookup(key, "get").await {
            Lookup::Hit(value) => Some(value),
            Lookup::CachedAbsence | Lookup::Miss => None,
        }
    }

    /// Serves `key` from the cache, or calls `fetch` and caches its result.
    ///
    /// A `None` from `fetch` is cached as an absence for [`NULL_TTL`] whatever
    /// `ttl` says. The fetched value is returned even if the write fails.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let result = self
            .try_get_or_fetch(key, ttl, move || async move { Ok::<_, Infallible>(fetch().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) for fallible producers.
    ///
    /// An error from `fetch` is returned as-is and nothing is cached.
    pub async fn try_get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.lookup(key, "get").await {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::CachedAbsence => return Ok(None),
            Lookup::Miss => {}
        }

        let value = fetch().await?;

        if self.is_enabled() {
            let write_ttl = match value {
                Some(_) => ttl.unwrap_or(self.default_ttl),
                None => NULL_TTL,
            };
            match codec::encode_optional(value.as_ref()) {
                Ok(raw) => {
                    self.write_raw(key, &raw, write_ttl, "set").await;
                }
                Err(e) => {
                    self.logger.degradation(
                        DegradationEvent::new(
                            DegradationReason::SerializationError,
                            "set",
                            "return fetched value uncached",
                        )
                        .with_key(key)
                        .with_error(&e),
                    );
                }
            }
        }

        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, operation: &str) -> Lookup<T> {
        let backend = match self.active_backend() {
            Some(backend) => backend,
            None => {
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::CacheDisabled,
                        operation,
                        "primary source",
                    )
                    .with_key(key),
                );
                return Lookup::Miss;
            }
        };

        let started = Instant::now();
        let raw = match backend.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                let elapsed = started.elapsed();
                metrics::record_cache_miss(operation);
                metrics::record_operation(operation, OpStatus::Degraded, elapsed);
                self.logger
                    .event(LogLevel::Warn, operation)
                    .key(key)
                    .hit(false)
                    .degraded(true)
                    .latency(elapsed)
                    .error(&e)
                    .emit();
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::BackendUnavailable,
                        operation,
                        "primary source",
                    )
                    .with_key(key)
                    .with_error(&e),
                );
                return Lookup::Miss;
            }
        };
        let elapsed = started.elapsed();

        let Some(raw) = raw else {
            metrics::record_cache_miss(operation);
            metrics::record_operation(operation, OpStatus::Miss, elapsed);
            self.logger
                .event(LogLevel::Debug, operation)
                .key(key)
                .hit(false)
                .degraded(false)
                .latency(elapsed)
                .emit();
            return Lookup::Miss;
        };

        if codec::is_null_sentinel(&raw) {
            metrics::record_cache_hit(operation);
            metrics::record_operation(operation, OpStatus::Hit, elapsed);
            self.logger
                .event(LogLevel::Debug, operation)
                .key(key)
                .hit(true)
                .degraded(false)
                .field("cached_absence", true)
                .latency(elapsed)
                .emit();
            return Lookup::CachedAbsence;
        }

        match codec::decode::<T>(&raw) {
            Ok(value) => {
                metrics::record_cache_hit(operation);
                metrics::record_operation(operation, OpStatus::Hit, elapsed);
                self.logger
                    .event(LogLevel::Debug, operation)
                    .key(key)
                    .hit(true)
                    .degraded(false)
                    .latency(elapsed)
                    .emit();
                Lookup::Hit(value)
            }
            Err(e) => {
                metrics::record_cache_miss(operation);
                metrics::record_operation(operation, OpStatus::Degraded, elapsed);
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::SerializationError,
                        operation,
                        "evict and treat as miss",
                    )
                    .with_key(key)
                    .with_error(&e),
                );
                self.evict_in_background(key, &raw);
                Lookup::Miss
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Stores a value. `ttl` defaults to the configured TTL.
    ///
    /// Returns `true` without I/O when disabled, `false` when the value cannot
    /// be encoded or the backend fails.
    pub async fn set_cached<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        if !self.is_enabled() {
            self.logger
                .event(LogLevel::Debug, "set")
                .key(key)
                .success(true)
                .degraded(true)
                .emit();
            return true;
        }

        let raw = match codec::encode(value) {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_operation("set", OpStatus::Failure, Duration::ZERO);
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::SerializationError,
                        "set",
                        "skip write",
                    )
                    .with_key(key)
                    .with_error(&e),
                );
                return false;
            }
        };

        self.write_raw(key, &raw, ttl.unwrap_or(self.default_ttl), "set").await
    }

    async fn write_raw(&self, key: &str, raw: &str, ttl: Duration, operation: &str) -> bool {
        let Some(backend) = self.active_backend() else {
            return true;
        };

        let started = Instant::now();
        let result = backend.set(key, raw, Some(ttl)).await;
        let elapsed = started.elapsed();

        match result {
            Ok(stored) => {
                metrics::record_operation(
                    operation,
                    if stored { OpStatus::Success } else { OpStatus::Failure },
                    elapsed,
                );
                self.logger
                    .event(LogLevel::Debug, operation)
                    .key(key)
                    .success(stored)
                    .degraded(false)
                    .field("ttl_secs", ttl.as_secs())
                    .latency(elapsed)
                    .emit();
                stored
            }
            Err(e) => {
                metrics::record_operation(operation, OpStatus::Degraded, elapsed);
                self.logger
                    .event(LogLevel::Warn, operation)
                    .key(key)
                    .success(false)
                    .degraded(true)
                    .latency(elapsed)
                    .error(&e)
                    .emit();
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::BackendUnavailable,
                        operation,
                        "skip write",
                    )
                    .with_key(key)
                    .with_error(&e),
                );
                false
            }
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Removes a key. `true` when disabled or when the backend call succeeded,
    /// whether or not the key existed.
    pub async fn invalidate(&self, key: &str) -> bool {
        let Some(backend) = self.active_backend() else {
            return true;
        };

        let started = Instant::now();
        let result = backend.delete(key).await;
        let elapsed = started.elapsed();

        match result {
            Ok(removed) => {
                metrics::record_operation("invalidate", OpStatus::Success, elapsed);
                self.logger
                    .event(LogLevel::Info, "invalidate")
                    .key(key)
                    .success(true)
                    .field("removed", removed)
                    .degraded(false)
                    .latency(elapsed)
                    .emit();
                true
            }
            Err(e) => {
                metrics::record_operation("invalidate", OpStatus::Degraded, elapsed);
                self.logger
                    .event(LogLevel::Warn, "invalidate")
                    .key(key)
                    .success(false)
                    .degraded(true)
                    .latency(elapsed)
                    .error(&e)
                    .emit();
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::BackendUnavailable,
                        "invalidate",
                        "entry left to expire",
                    )
                    .with_key(key)
                    .with_error(&e),
                );
                false
            }
        }
    }

    /// Removes every key matching a glob and returns how many were removed.
    ///
    /// The pattern is qualified with the key prefix; see
    /// [`qualify_pattern`](Self::qualify_pattern).
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.active_backend() else {
            return 0;
        };
        let pattern = self.qualify_pattern(pattern);

        let started = Instant::now();
        let result = backend.delete_pattern(&pattern).await;
        let elapsed = started.elapsed();

        match result {
            Ok(removed) => {
                metrics::record_operation("invalidate_pattern", OpStatus::Success, elapsed);
                self.logger
                    .event(LogLevel::Info, "invalidate_pattern")
                    .pattern(&pattern)
                    .success(true)
                    .field("removed", removed)
                    .degraded(false)
                    .latency(elapsed)
                    .emit();
                removed
            }
            Err(e) => {
                metrics::record_operation("invalidate_pattern", OpStatus::Degraded, elapsed);
                self.logger
                    .event(LogLevel::Warn, "invalidate_pattern")
                    .pattern(&pattern)
                    .success(false)
                    .degraded(true)
                    .latency(elapsed)
                    .error(&e)
                    .emit();
                self.logger.degradation(
                    DegradationEvent::new(
                        DegradationReason::BackendUnavailable,
                        "invalidate_pattern",
                        "entries left to expire",
                    )
                    .with_error(&e),
                );
                0
            }
        }
    }

    /// Deletes a corrupted entry off the caller's path. The key is left alone
    /// once it holds anything but `corrupted`. Failures are logged only.
    pub fn evict_in_background(&self, key: &str, corrupted: &str) {
        if let Some(backend) = self.active_backend() {
            self.cleanup.spawn_evict(Arc::clone(backend), key.to_string(), corrupted.to_string());
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// `Healthy` when caching is off or the backend answers a ping.
    pub async fn health(&self) -> HealthStatus {
        match self.active_backend() {
            None => HealthStatus::Healthy,
            Some(backend) if backend.ping().await => HealthStatus::Healthy,
            Some(_) => HealthStatus::Degraded,
        }
    }

    /// Waits for background cleanups.
    pub async fn drain_background(&self) {
        self.cleanup.drain().await;
    }

    /// Drains background work and closes the backend.
    pub async fn shutdown(&self) {
        self.cleanup.drain().await;
        if let Some(backend) = &self.backend {
            backend.close().await;
        }
        tracing::info!(target: "maimnp_cache", "cache manager shut down");
    }

    fn active_backend(&self) -> Option<&Arc<dyn KvBackend>> {
        if self.enabled { self.backend.as_ref() } else { None }
    }
}
