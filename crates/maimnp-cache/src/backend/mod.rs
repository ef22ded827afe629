//! Key-value backend clients.
//!
//! [`KvBackend`] is the seam between the cache manager and storage. Backends
//! never degrade on their own: every transport failure is returned as a
//! [`BackendError`] so the manager can apply its fallback policy.
//!
//! - [`RedisClient`]: pooled Redis connection, shared across instances
//! - [`MemoryBackend`]: process-local map with TTL expiry

use async_trait::async_trait;
use std::time::Duration;

use crate::error::BackendError;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisClient;

/// Keys deleted per `DEL` during a pattern delete, and the `SCAN` page hint.
pub const SCAN_BATCH_SIZE: usize = 500;

#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Returns the stored string, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores `value`. `None` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool, BackendError>;

    /// Returns `true` iff a key was actually removed.
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Deletes `key` only while it still holds `expected`. Atomic on the
    /// backend, so a concurrent overwrite is never removed.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Sets a new TTL. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError>;

    /// Deletes every key matching a glob pattern, scanning incrementally.
    /// Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, BackendError>;

    /// Health probe. Never errors; `false` on any failure.
    async fn ping(&self) -> bool;

    /// Releases connections. Safe to call more than once.
    async fn close(&self);
}

/// Compiles a backend glob (`*`, `?`, `[...]`, `\` escapes) into a regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, BackendError> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                let mut first = true;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    // A leading `^` negates the class, as in Redis.
                    if inner == '\\' || (inner == '^' && !first) {
                        out.push('\\');
                    }
                    out.push(inner);
                    first = false;
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out).map_err(|e| BackendError::Command(format!("invalid pattern: {e}")))
}
