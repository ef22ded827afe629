use maimnp_cache::{CacheConfig, ConfigError, HttpCacheConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend connection and cache-aside defaults
    #[serde(default)]
    pub cache: CacheConfig,
    /// HTTP response caching middleware
    #[serde(default)]
    pub http_cache: HttpCacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".into()));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        self.cache.validate()?;
        self.http_cache.validate()?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use maimnp_cache::ConfigError;
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "maimnp.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., MAIMNP__CACHE__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("MAIMNP")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("config build error: {e}")))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Invalid(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

/// Process-wide configuration, loaded once.
pub mod shared {
    use super::AppConfig;
    use maimnp_cache::ConfigError;
    use std::sync::{Arc, RwLock};

    static SHARED: RwLock<Option<Arc<AppConfig>>> = RwLock::new(None);

    /// Returns the loaded configuration, loading it on first call.
    pub fn load_once(path: Option<&str>) -> Result<Arc<AppConfig>, ConfigError> {
        if let Some(cfg) = get() {
            return Ok(cfg);
        }
        let mut guard = SHARED
            .write()
            .map_err(|_| ConfigError::Invalid("shared config lock poisoned".into()))?;
        if let Some(cfg) = guard.as_ref() {
            return Ok(Arc::clone(cfg));
        }
        let cfg = Arc::new(super::loader::load_config(path)?);
        *guard = Some(Arc::clone(&cfg));
        Ok(cfg)
    }

    pub fn get() -> Option<Arc<AppConfig>> {
        SHARED.read().ok().and_then(|g| g.clone())
    }

    /// Forgets the loaded configuration so the next [`load_once`] reads again.
    pub fn reset() {
        if let Ok(mut guard) = SHARED.write() {
            *guard = None;
        }
    }
}
