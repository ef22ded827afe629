//! HTTP response caching for axum routers.
//!
//! GET responses are stored as JSON envelopes keyed by a hash of the path and
//! normalized query. Requests are revalidated with `If-None-Match` against the
//! stored ETag. The layer degrades to a plain pass-through whenever the cache
//! is disabled or unreachable.
//!
//! Only bodies whose size hint is bounded by `max_body_bytes` are buffered.
//! Streams of unknown length and larger bodies are forwarded untouched: they
//! are never stored and carry no ETag.

mod envelope;
mod middleware;
mod stats;

pub use envelope::{CachedResponse, compute_etag, etag_matches};
pub use middleware::{HttpCache, X_CACHE, X_RESPONSE_TIME, http_cache_middleware, storage_ttl};
pub use stats::{HttpCacheStats, HttpCacheStatsSnapshot};
