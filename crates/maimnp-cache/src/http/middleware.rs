use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use super::envelope::{self, CachedResponse};
use super::stats::{HttpCacheStats, HttpCacheStatsSnapshot};
use crate::config::HttpCacheConfig;
use crate::events::{CacheEventLogger, DegradationEvent, DegradationReason, LogLevel};
use crate::manager::CacheManager;
use crate::metrics::{self, OpStatus};

const LOGGER: CacheEventLogger = CacheEventLogger::new("http_middleware");
const OPERATION: &str = "http_get";

pub const X_CACHE: &str = "x-cache";
pub const X_RESPONSE_TIME: &str = "x-response-time";

/// Shared state of the HTTP caching middleware.
///
/// An ETag is attached to every buffered response. Responses too large to
/// buffer (see [`HttpCacheConfig::max_body_bytes`]) go out without one.
///
/// ```ignore
/// let cache = Arc::new(HttpCache::new(runtime.manager(), config.http_cache.clone()));
/// let app = api.layer(axum::middleware::from_fn_with_state(cache, http_cache_middleware));
/// ```
pub struct HttpCache {
    manager: Arc<CacheManager>,
    config: HttpCacheConfig,
    stats: HttpCacheStats,
}

impl HttpCache {
    pub fn new(manager: Arc<CacheManager>, config: HttpCacheConfig) -> Self {
        Self {
            manager,
            config,
            stats: HttpCacheStats::default(),
        }
    }

    pub fn config(&self) -> &HttpCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> HttpCacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// `{prefix}:http:{sha256}` of the path and, if enabled, the sorted query.
    pub fn request_key(&self, path: &str, query: Option<&str>) -> String {
        let fingerprint = if self.config.cache_query_params {
            format!("{path}?{}", normalized_query(query.unwrap_or_default()))
        } else {
            path.to_string()
        };
        let digest = Sha256::digest(fingerprint.as_bytes());
        format!("{}:http:{}", self.manager.key_prefix(), hex::encode(digest))
    }

    fn should_bypass(&self, req: &Request<Body>) -> bool {
        if !self.config.enabled || req.method() != Method::GET {
            return true;
        }
        let path = req.uri().path();
        if self
            .config
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return true;
        }
        let headers = req.headers();
        has_directive(headers, header::CACHE_CONTROL, &["no-cache", "no-store"])
            || has_directive(headers, header::PRAGMA, &["no-cache"])
    }

    async fn handle(&self, req: Request<Body>, next: Next) -> Response {
        if self.should_bypass(&req) {
            self.stats.record_bypass();
            return next.run(req).await;
        }

        let Some(backend) = self.manager.backend().filter(|_| self.manager.is_enabled()) else {
            self.stats.record_degraded(DegradationReason::CacheDisabled);
            LOGGER.degradation(
                DegradationEvent::new(
                    DegradationReason::CacheDisabled,
                    OPERATION,
                    "forward request",
                )
                .with_key(req.uri().path()),
            );
            return next.run(req).await;
        };

        let key = self.request_key(req.uri().path(), req.uri().query());
        let started = Instant::now();

        match backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedResponse>(&raw) {
                Ok(cached) => {
                    self.stats.record_hit();
                    metrics::record_cache_hit(OPERATION);
                    metrics::record_operation(OPERATION, OpStatus::Hit, started.elapsed());
                    LOGGER
                        .event(LogLevel::Debug, OPERATION)
                        .key(&key)
                        .hit(true)
                        .degraded(false)
                        .latency(started.elapsed())
                        .emit();
                    return serve_cached(&req, cached);
                }
                Err(e) => {
                    self.stats.record_error();
                    self.stats.record_degraded(DegradationReason::SerializationError);
                    LOGGER.degradation(
                        DegradationEvent::new(
                            DegradationReason::SerializationError,
                            OPERATION,
                            "evict and forward request",
                        )
                        .with_key(&key)
                        .with_error(&e),
                    );
                    self.manager.evict_in_background(&key, &raw);
                }
            },
            Ok(None) => {}
            Err(e) => {
                self.stats.record_error();
                self.stats.record_degraded(DegradationReason::BackendUnavailable);
                LOGGER.degradation(
                    DegradationEvent::new(
                        DegradationReason::BackendUnavailable,
                        OPERATION,
                        "forward request",
                    )
                    .with_key(&key)
                    .with_error(&e),
                );
            }
        }

        self.stats.record_miss();
        metrics::record_cache_miss(OPERATION);
        self.forward_and_store(req, next, &key).await
    }

    async fn forward_and_store(&self, req: Request<Body>, next: Next, key: &str) -> Response {
        let started = Instant::now();
        let response = next.run(req).await;
        let elapsed = started.elapsed();
        metrics::record_operation(OPERATION, OpStatus::Miss, elapsed);

        let (mut parts, body) = response.into_parts();
        tag_miss(&mut parts.headers, elapsed);

        // Streams of unknown or excessive length are passed through untouched.
        let fits = body
            .size_hint()
            .upper()
            .is_some_and(|upper| upper <= self.config.max_body_bytes as u64);
        if !fits {
            LOGGER
                .event(LogLevel::Debug, OPERATION)
                .key(key)
                .hit(false)
                .field("stored", false)
                .field("reason", "body_too_large")
                .latency(elapsed)
                .emit();
            return Response::from_parts(parts, body);
        }

        let bytes = match axum::body::to_bytes(body, self.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.record_error();
                LOGGER
                    .event(LogLevel::Error, OPERATION)
                    .key(key)
                    .error(&e)
                    .emit();
                let mut failed = Response::new(Body::empty());
                *failed.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return failed;
            }
        };

        let etag = envelope::compute_etag(&bytes);
        if let Ok(value) = HeaderValue::from_str(&etag) {
            parts.headers.insert(header::ETAG, value);
        }

        let ttl = if parts.status.is_success() {
            storage_ttl(&parts.headers, self.config.default_ttl())
        } else {
            None
        };
        let mut stored = false;
        if let Some(ttl) = ttl {
            match std::str::from_utf8(&bytes) {
                Ok(content) => {
                    let cached = CachedResponse::capture(
                        parts.status,
                        &parts.headers,
                        content.to_string(),
                        etag,
                    );
                    stored = self.manager.set_cached(key, &cached, Some(ttl)).await;
                    if !stored {
                        self.stats.record_error();
                    }
                }
                Err(_) => {
                    LOGGER
                        .event(LogLevel::Debug, OPERATION)
                        .key(key)
                        .field("reason", "non_utf8_body")
                        .emit();
                }
            }
        }

        LOGGER
            .event(LogLevel::Debug, OPERATION)
            .key(key)
            .hit(false)
            .degraded(false)
            .field("stored", stored)
            .field("status_code", parts.status.as_u16())
            .latency(elapsed)
            .emit();

        Response::from_parts(parts, Body::from(bytes))
    }
}

/// axum middleware serving GET responses through the cache.
pub async fn http_cache_middleware(
    State(cache): State<Arc<HttpCache>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    cache.handle(req, next).await
}

fn serve_cached(req: &Request<Body>, cached: CachedResponse) -> Response {
    let revalidated = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|inm| envelope::etag_matches(inm, &cached.etag));
    if revalidated {
        return envelope::not_modified(&cached.etag);
    }

    let mut response = cached.into_response();
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("HIT"));
    response
}

fn tag_miss(headers: &mut HeaderMap, elapsed: Duration) {
    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    let millis = format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&millis) {
        headers.insert(X_RESPONSE_TIME, value);
    }
}

/// Query pairs sorted by name then value, re-encoded.
fn normalized_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn has_directive(headers: &HeaderMap, name: header::HeaderName, directives: &[&str]) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| directives.contains(&d.as_str()))
}

/// TTL for a downstream response, or `None` when it must not be stored.
pub fn storage_ttl(headers: &HeaderMap, default_ttl: Duration) -> Option<Duration> {
    let mut ttl = default_ttl;
    for value in headers.get_all(header::CACHE_CONTROL).iter() {
        let Ok(value) = value.to_str() else { continue };
        for directive in value.split(',').map(|d| d.trim().to_ascii_lowercase()) {
            match directive.as_str() {
                "no-store" | "no-cache" | "private" => return None,
                d => {
                    if let Some(secs) = d.strip_prefix("max-age=")
                        && let Ok(secs) = secs.trim_matches('"').parse::<u64>()
                    {
                        ttl = Duration::from_secs(secs);
                    }
                }
            }
        }
    }
    if ttl.is_zero() { None } else { Some(ttl) }
}
