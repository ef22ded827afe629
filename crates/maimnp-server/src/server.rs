use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use maimnp_cache::http::http_cache_middleware;
use maimnp_cache::{CacheRuntime, ConfigError, KvBackend};
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    handlers::{self, AppState},
};

/// Operational endpoints plus `api` behind the HTTP caching middleware.
pub fn build_app(state: AppState, api: Router) -> Router {
    let cached_api = api.layer(middleware::from_fn_with_state(
        Arc::clone(&state.http_cache),
        http_cache_middleware,
    ));

    Router::new()
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/health", get(handlers::health))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/stats/reset", post(handlers::reset_cache_stats))
        .with_state(state)
        .merge(cached_api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status().as_u16();
                        span.record("http.status_code", tracing::field::display(status));
                        tracing::info!(
                            http.status = %status,
                            x_cache = res
                                .headers()
                                .get(maimnp_cache::http::X_CACHE)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("-"),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

pub struct CacheServer {
    addr: SocketAddr,
    app: Router,
    runtime: CacheRuntime,
}

pub struct ServerBuilder {
    config: AppConfig,
    api: Router,
    backend: Option<Arc<dyn KvBackend>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            api: Router::new(),
            backend: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Routes served through the HTTP cache.
    pub fn with_api(mut self, api: Router) -> Self {
        self.api = api;
        self
    }

    /// Replaces the Redis client built from `cache` settings.
    pub fn with_backend(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<CacheServer, ConfigError> {
        self.config.validate()?;
        let runtime = match self.backend {
            Some(backend) if self.config.cache.enabled => {
                CacheRuntime::with_backend(&self.config.cache, backend)?
            }
            _ => CacheRuntime::from_config(&self.config.cache)?,
        };
        let state = AppState {
            manager: runtime.manager(),
            http_cache: runtime.http_cache(self.config.http_cache.clone()),
        };
        Ok(CacheServer {
            addr: self.config.addr(),
            app: build_app(state, self.api),
            runtime,
        })
    }
}

impl CacheServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        // Release pooled connections even if serving failed.
        self.runtime.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
