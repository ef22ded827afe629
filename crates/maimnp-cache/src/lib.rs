//! Cache-aside layer over a key-value backend.
//!
//! ## Components
//!
//! - [`backend`]: the [`KvBackend`] trait with Redis and in-memory clients
//! - [`manager`]: [`CacheManager`], fetch-or-serve with automatic degradation
//! - [`decorators`]: declarative wrappers around async producers
//! - [`http`]: axum middleware caching GET responses with ETag revalidation
//! - [`invalidation`]: helpers for write paths
//! - [`factory`]: [`CacheRuntime`], the composition root
//!
//! ## Degradation
//!
//! The cache accelerates a primary source and never replaces it. When caching
//! is disabled, the backend is unreachable, or a stored value cannot be
//! decoded, every operation falls back to the primary source. The event is
//! logged through [`events`] and counted in [`metrics`].

pub mod backend;
pub mod codec;
pub mod config;
pub mod decorators;
pub mod error;
pub mod events;
pub mod factory;
pub mod http;
pub mod invalidation;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod tasks;

pub use backend::{KvBackend, MemoryBackend, RedisClient};
pub use codec::{ColumnRecord, Columns, NULL_SENTINEL, NULL_TTL};
pub use config::{CacheConfig, HttpCacheConfig};
pub use decorators::{CachedFn, InvalidatingFn, cache_invalidate, cached};
pub use error::{BackendError, ConfigError, KeyBuildError, SerializationError};
pub use events::{CacheEventLogger, DegradationEvent, DegradationReason};
pub use factory::CacheRuntime;
pub use http::{HttpCache, http_cache_middleware};
pub use key::KeyTemplate;
pub use manager::{CacheManager, HealthStatus};
