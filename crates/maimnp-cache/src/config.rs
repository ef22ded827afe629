use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Key-value backend and cache manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. When false no backend connection is ever attempted and
    /// every cache operation degrades to a pass-through.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logical database index on the backend.
    #[serde(default)]
    pub db: u32,

    #[serde(default)]
    pub password: Option<String>,

    /// Namespace prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default entry TTL in seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl: u64,

    /// Upper bound of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-command timeout in milliseconds.
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout: u64,

    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_socket_connect_timeout_ms")]
    pub socket_connect_timeout: u64,

    /// Allow one extra connection acquisition when acquiring a pooled
    /// connection times out. Commands themselves are never retried.
    #[serde(default = "default_retry_on_timeout")]
    pub retry_on_timeout: bool,
}

fn default_enabled() -> bool {
    true
}
fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    6379
}
fn default_key_prefix() -> String {
    "maimnp".into()
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_max_connections() -> usize {
    10
}
fn default_socket_timeout_ms() -> u64 {
    5000
}
fn default_socket_connect_timeout_ms() -> u64 {
    5000
}
fn default_retry_on_timeout() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
            key_prefix: default_key_prefix(),
            default_ttl: default_ttl_secs(),
            max_connections: default_max_connections(),
            socket_timeout: default_socket_timeout_ms(),
            socket_connect_timeout: default_socket_connect_timeout_ms(),
            retry_on_timeout: default_retry_on_timeout(),
        }
    }
}

impl CacheConfig {
    /// Configuration with caching switched off. Useful for tests and for
    /// deployments without a backend.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.key_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyKeyPrefix);
        }
        if self.default_ttl == 0 {
            return Err(ConfigError::NonPositive {
                field: "cache.default_ttl",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NonPositive {
                field: "cache.max_connections",
            });
        }
        if self.socket_timeout == 0 || self.socket_connect_timeout == 0 {
            return Err(ConfigError::NonPositive {
                field: "cache socket timeouts",
            });
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("cache.host must not be empty".into()));
        }
        if url::Url::parse(&format!("redis://{}:{}", self.host, self.port)).is_err() {
            return Err(ConfigError::Invalid(format!(
                "cache.host `{}` is not a valid host name",
                self.host
            )));
        }
        Ok(())
    }

    /// Returns the backend connection URL, `redis://[:password@]host:port/db`.
    ///
    /// The password is percent-encoded, so reserved characters survive.
    pub fn connection_url(&self) -> String {
        let base = format!("redis://{}:{}/{}", self.host, self.port, self.db);
        let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) else {
            return base;
        };
        match url::Url::parse(&base) {
            Ok(mut url) => {
                if url.set_password(Some(password)).is_ok() {
                    url.into()
                } else {
                    base
                }
            }
            Err(_) => base,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout)
    }

    pub fn socket_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_connect_timeout)
    }
}

/// HTTP response caching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCacheConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    /// TTL in seconds used when the response carries no `max-age`.
    #[serde(default = "default_http_ttl_secs")]
    pub default_ttl: u64,

    /// Path prefixes that are never cached.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Include the query string in the request fingerprint.
    #[serde(default = "default_cache_query_params")]
    pub cache_query_params: bool,

    /// Responses larger than this are forwarded without being stored.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_http_enabled() -> bool {
    true
}
fn default_http_ttl_secs() -> u64 {
    300
}
fn default_excluded_paths() -> Vec<String> {
    vec!["/metrics".into(), "/health".into(), "/cache/".into()]
}
fn default_cache_query_params() -> bool {
    true
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            default_ttl: default_http_ttl_secs(),
            excluded_paths: default_excluded_paths(),
            cache_query_params: default_cache_query_params(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl HttpCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl == 0 {
            return Err(ConfigError::NonPositive {
                field: "http_cache.default_ttl",
            });
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::NonPositive {
                field: "http_cache.max_body_bytes",
            });
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CacheConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.key_prefix, "maimnp");
        assert_eq!(cfg.default_ttl, 3600);
        assert_eq!(cfg.max_connections, 10);
        assert!(cfg.validate().is_ok());
        assert!(HttpCacheConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_values() {
        let cfg = CacheConfig {
            port: 0,
            ..CacheConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidPort));

        let cfg = CacheConfig {
            key_prefix: "  ".into(),
            ..CacheConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyKeyPrefix));

        let cfg = CacheConfig {
            default_ttl: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NonPositive { .. })));

        let cfg = CacheConfig {
            max_connections: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NonPositive { .. })));
    }

    #[test]
    fn connection_url_includes_password_and_db() {
        let cfg = CacheConfig {
            host: "cache.internal".into(),
            port: 6380,
            db: 2,
            password: Some("s3cret".into()),
            ..CacheConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://:s3cret@cache.internal:6380/2");

        let cfg = CacheConfig::default();
        assert_eq!(cfg.connection_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn connection_url_escapes_reserved_password_characters() {
        use redis::IntoConnectionInfo;

        let cfg = CacheConfig {
            password: Some("p@ss/w#rd?%".into()),
            ..CacheConfig::default()
        };
        let url = cfg.connection_url();
        assert_eq!(url, "redis://:p%40ss%2Fw%23rd%3F%25@localhost:6379/0");

        let info = url.into_connection_info().unwrap();
        assert_eq!(info.addr, redis::ConnectionAddr::Tcp("localhost".into(), 6379));
        assert_eq!(info.redis.db, 0);
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w#rd?%"));
    }

    #[test]
    fn rejects_unparseable_host() {
        let cfg = CacheConfig {
            host: "cache internal".into(),
            ..CacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: CacheConfig = serde_json::from_str(r#"{"enabled": false, "port": 7000}"#).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.key_prefix, "maimnp");
    }
}
