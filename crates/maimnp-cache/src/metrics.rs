//! Prometheus metrics for the cache layer.
//!
//! This module provides:
//! - Hit/miss counters
//! - Degradation counter by reason
//! - Enabled-status gauge
//! - Operation latency histogram by operation and status
//!
//! Samples go through the `metrics` facade, so nothing is exported until a
//! recorder is installed with [`init_metrics`]. A process-wide atomic summary
//! is kept alongside the facade for the JSON summary endpoint.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

static SUMMARY: Summary = Summary::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_DEGRADATIONS_TOTAL: &str = "cache_degradations_total";
    pub const CACHE_ENABLED: &str = "cache_enabled";
    pub const CACHE_OPERATION_DURATION_SECONDS: &str = "cache_operation_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized
/// or another recorder is installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: the server renders /metrics itself.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Outcome label for the duration histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Hit,
    Miss,
    Success,
    Failure,
    Degraded,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Hit => "hit",
            OpStatus::Miss => "miss",
            OpStatus::Success => "success",
            OpStatus::Failure => "failure",
            OpStatus::Degraded => "degraded",
        }
    }
}

/// Record a cache hit.
pub fn record_cache_hit(operation: &str) {
    counter!(names::CACHE_HITS_TOTAL, "operation" => operation.to_string()).increment(1);
    SUMMARY.hits.fetch_add(1, Ordering::Relaxed);
}

/// Record a cache miss.
pub fn record_cache_miss(operation: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "operation" => operation.to_string()).increment(1);
    SUMMARY.misses.fetch_add(1, Ordering::Relaxed);
}

/// Record a degradation by reason.
pub fn record_degradation(reason: &str) {
    counter!(names::CACHE_DEGRADATIONS_TOTAL, "reason" => reason.to_string()).increment(1);
    SUMMARY.degradations.fetch_add(1, Ordering::Relaxed);
}

/// Record the duration of a cache operation.
pub fn record_operation(operation: &str, status: OpStatus, duration: Duration) {
    histogram!(
        names::CACHE_OPERATION_DURATION_SECONDS,
        "operation" => operation.to_string(),
        "status" => status.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Set the enabled-status gauge.
pub fn set_cache_enabled(enabled: bool) {
    gauge!(names::CACHE_ENABLED).set(if enabled { 1.0 } else { 0.0 });
}

// =============================================================================
// Summary
// =============================================================================

struct Summary {
    hits: AtomicU64,
    misses: AtomicU64,
    degradations: AtomicU64,
}

impl Summary {
    const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degradations: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of the process-wide counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub hits: u64,
    pub misses: u64,
    pub degradations: u64,
    /// Hits over lookups, as a percentage.
    pub hit_rate: f64,
}

pub fn summary() -> MetricsSummary {
    let hits = SUMMARY.hits.load(Ordering::Relaxed);
    let misses = SUMMARY.misses.load(Ordering::Relaxed);
    let total = hits + misses;
    MetricsSummary {
        hits,
        misses,
        degradations: SUMMARY.degradations.load(Ordering::Relaxed),
        hit_rate: if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        },
    }
}

/// Zeroes the summary. Prometheus counters are left untouched.
pub fn reset_summary() {
    SUMMARY.hits.store(0, Ordering::Relaxed);
    SUMMARY.misses.store(0, Ordering::Relaxed);
    SUMMARY.degradations.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_monotonically() {
        let before = summary();
        record_cache_hit("get");
        record_cache_hit("get");
        record_cache_miss("get");
        record_degradation("cache_disabled");
        let after = summary();

        // Other tests share the process-wide counters.
        assert!(after.hits >= before.hits + 2);
        assert!(after.misses > before.misses);
        assert!(after.degradations > before.degradations);
        assert!(after.hit_rate > 0.0 && after.hit_rate <= 100.0);
    }

    #[test]
    fn status_labels() {
        assert_eq!(OpStatus::Hit.as_str(), "hit");
        assert_eq!(OpStatus::Degraded.as_str(), "degraded");
    }
}
