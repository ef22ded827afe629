//! Structured event logging for cache operations and degradations.
//!
//! Each record is a single-line JSON object:
//!
//! ```text
//! {"timestamp":"2026-01-01T00:00:00.123Z","level":"info","operation":"get","source":"cache_manager","key":"maimnp:user:42","hit":true,"latency_ms":0.41,"degraded":false}
//! ```
//!
//! Records are emitted through `tracing` under the `maimnp_cache::events`
//! target as the bare message, so the subscriber installed by the host decides
//! where they go. It should print that target's message alone to keep each
//! line valid JSON.

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::metrics;

/// Tracing target for every cache event.
pub const EVENT_TARGET: &str = "maimnp_cache::events";

/// Log level of a cache event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Why a cache operation fell back to the primary source.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DegradationReason {
    CacheDisabled,
    BackendUnavailable,
    SerializationError,
}

impl DegradationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationReason::CacheDisabled => "cache_disabled",
            DegradationReason::BackendUnavailable => "backend_unavailable",
            DegradationReason::SerializationError => "serialization_error",
        }
    }
}

impl std::fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEvent {
    pub timestamp: String,
    pub level: LogLevel,
    pub operation: String,
    pub source: &'static str,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CacheEvent {
    pub fn new(level: LogLevel, operation: impl Into<String>, source: &'static str) -> Self {
        Self {
            timestamp: utc_timestamp(),
            level,
            operation: operation.into(),
            source,
            fields: Map::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn key(self, key: &str) -> Self {
        self.field("key", key)
    }

    pub fn pattern(self, pattern: &str) -> Self {
        self.field("pattern", pattern)
    }

    pub fn hit(self, hit: bool) -> Self {
        self.field("hit", hit)
    }

    pub fn success(self, success: bool) -> Self {
        self.field("success", success)
    }

    pub fn degraded(self, degraded: bool) -> Self {
        self.field("degraded", degraded)
    }

    pub fn latency(self, elapsed: Duration) -> Self {
        let ms = (elapsed.as_secs_f64() * 1_000_000.0).round() / 1000.0;
        self.field("latency_ms", ms)
    }

    pub fn error(self, error: impl std::fmt::Display) -> Self {
        self.field("error", error.to_string())
    }

    /// Renders the record as one line of JSON.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"timestamp":"{}","level":"error","operation":"log","source":"events","error":"{}"}}"#,
                self.timestamp, e
            )
        })
    }

    /// Emits the record through `tracing` at its level.
    pub fn emit(self) {
        let line = self.to_json_line();
        match self.level {
            LogLevel::Debug => tracing::debug!(target: EVENT_TARGET, "{line}"),
            LogLevel::Info => tracing::info!(target: EVENT_TARGET, "{line}"),
            LogLevel::Warn => tracing::warn!(target: EVENT_TARGET, "{line}"),
            LogLevel::Error => tracing::error!(target: EVENT_TARGET, "{line}"),
        }
    }
}

/// A fallback to the primary source. Logged and counted, never stored.
#[derive(Debug, Clone)]
pub struct DegradationEvent {
    pub reason: DegradationReason,
    pub operation: String,
    pub key: Option<String>,
    pub error: Option<String>,
    pub fallback: String,
}

impl DegradationEvent {
    pub fn new(reason: DegradationReason, operation: &str, fallback: &str) -> Self {
        Self {
            reason,
            operation: operation.to_string(),
            key: None,
            error: None,
            fallback: fallback.to_string(),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    fn into_event(self, source: &'static str) -> CacheEvent {
        // A disabled cache degrades on every call; keep it out of warn logs.
        let level = match self.reason {
            DegradationReason::CacheDisabled => LogLevel::Debug,
            _ => LogLevel::Warn,
        };
        let mut event = CacheEvent::new(level, "degradation", source)
            .field("degraded_operation", self.operation)
            .field("reason", self.reason.as_str())
            .field("fallback", self.fallback)
            .degraded(true);
        if let Some(key) = self.key {
            event = event.key(&key);
        }
        if let Some(error) = self.error {
            event = event.field("error", error);
        }
        event
    }
}

/// Emits cache events tagged with a fixed `source`.
#[derive(Debug, Clone, Copy)]
pub struct CacheEventLogger {
    source: &'static str,
}

impl CacheEventLogger {
    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Starts an event for `operation`; call [`CacheEvent::emit`] when done.
    pub fn event(&self, level: LogLevel, operation: &str) -> CacheEvent {
        CacheEvent::new(level, operation, self.source)
    }

    /// Logs and counts a degradation.
    pub fn degradation(&self, event: DegradationEvent) {
        metrics::record_degradation(event.reason.as_str());
        event.into_event(self.source).emit();
    }
}

fn utc_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
