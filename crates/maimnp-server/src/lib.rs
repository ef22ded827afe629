pub mod config;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use handlers::AppState;
pub use observability::{apply_logging_level, init_tracing};
pub use server::{CacheServer, ServerBuilder, build_app};
