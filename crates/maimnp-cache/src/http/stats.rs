use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::DegradationReason;

/// Running counters of one middleware instance.
#[derive(Debug, Default)]
pub struct HttpCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    bypassed: AtomicU64,
    degraded: AtomicU64,
    reasons: DashMap<DegradationReason, u64>,
}

/// Serializable copy of [`HttpCacheStats`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HttpCacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub bypassed: u64,
    pub degraded: u64,
    pub degradation_reasons: BTreeMap<String, u64>,
    pub hit_rate: f64,
}

impl HttpCacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self, reason: DegradationReason) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        *self.reasons.entry(reason).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> HttpCacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        HttpCacheStatsSnapshot {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            degradation_reasons: self
                .reasons
                .iter()
                .map(|e| (e.key().as_str().to_string(), *e.value()))
                .collect(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (hits as f64 / lookups as f64) * 100.0
            },
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.bypassed.store(0, Ordering::Relaxed);
        self.degraded.store(0, Ordering::Relaxed);
        self.reasons.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset() {
        let stats = HttpCacheStats::default();
        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_bypass();
        stats.record_degraded(DegradationReason::CacheDisabled);
        stats.record_degraded(DegradationReason::CacheDisabled);
        stats.record_degraded(DegradationReason::BackendUnavailable);

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 2);
        assert_eq!(snap.bypassed, 1);
        assert_eq!(snap.degraded, 3);
        assert_eq!(snap.degradation_reasons["cache_disabled"], 2);
        assert_eq!(snap.degradation_reasons["backend_unavailable"], 1);
        assert!((snap.hit_rate - 33.333).abs() < 0.01);

        stats.reset();
        assert_eq!(stats.snapshot(), HttpCacheStatsSnapshot::default());
    }
}
