//! Error types for the cache layer.
//!
//! Only [`ConfigError`] is ever fatal. Everything else is recovered by the
//! cache manager, the wrappers or the HTTP middleware and turned into a
//! logged degradation.

use thiserror::Error;

/// Invalid cache configuration, detected at startup validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache.port must be in 1..=65535")]
    InvalidPort,

    #[error("cache.key_prefix must not be empty")]
    EmptyKeyPrefix,

    #[error("{field} must be > 0")]
    NonPositive { field: &'static str },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure talking to the key-value backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend pool error: {0}")]
    Pool(String),

    #[error("backend connection error: {0}")]
    Connection(String),

    #[error("backend command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("backend command error: {0}")]
    Command(String),
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            BackendError::Connection(format!("timeout: {err}"))
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            BackendError::Connection(err.to_string())
        } else {
            BackendError::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for BackendError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Backend(e) => e.into(),
            other => BackendError::Pool(other.to_string()),
        }
    }
}

/// A value could not be encoded for storage, or a stored value could not be
/// decoded.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode cached value: {0}")]
    Decode(String),
}

/// A cache key could not be derived from a call's arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyBuildError {
    #[error("placeholder '{0}' not found in call arguments")]
    MissingPlaceholder(String),

    #[error("malformed key template '{0}'")]
    MalformedTemplate(String),

    #[error("call arguments are not key-addressable: {0}")]
    Arguments(String),
}
