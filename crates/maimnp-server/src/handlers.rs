use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use maimnp_cache::http::{HttpCache, HttpCacheStatsSnapshot};
use maimnp_cache::{CacheManager, HealthStatus, metrics};
use serde::Serialize;
use std::sync::Arc;

/// State shared by the operational endpoints.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
    pub http_cache: Arc<HttpCache>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: HealthStatus,
    cache_enabled: bool,
}

#[derive(Serialize)]
pub struct StatsResponse {
    enabled: bool,
    hits: u64,
    misses: u64,
    hit_rate: f64,
    degradations: u64,
    http: HttpCacheStatsSnapshot,
}

/// Prometheus text exposition.
pub async fn metrics_endpoint() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let summary = metrics::summary();
    Json(StatsResponse {
        enabled: state.manager.is_enabled(),
        hits: summary.hits,
        misses: summary.misses,
        hit_rate: summary.hit_rate,
        degradations: summary.degradations,
        http: state.http_cache.stats(),
    })
}

pub async fn reset_cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.http_cache.reset_stats();
    metrics::reset_summary();
    tracing::info!("cache statistics reset");
    (StatusCode::OK, Json(serde_json::json!({ "status": "reset" })))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.manager.health().await;
    if status == HealthStatus::Degraded {
        tracing::warn!("cache backend unreachable, serving without cache");
    }
    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            cache_enabled: state.manager.is_enabled(),
        }),
    )
}
