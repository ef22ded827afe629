use std::{env, fs};

use maimnp_cache::ConfigError;
use maimnp_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("maimnp.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081

[cache]
enabled = true
host = "redis.internal"
port = 6380
db = 2
key_prefix = "shop"
default_ttl = 600

[http_cache]
default_ttl = 30
excluded_paths = ["/admin"]
cache_query_params = false

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses; unspecified keys keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.cache.key_prefix, "shop");
    assert_eq!(cfg.cache.connection_url(), "redis://redis.internal:6380/2");
    assert_eq!(cfg.cache.max_connections, 10);
    assert_eq!(cfg.http_cache.default_ttl, 30);
    assert_eq!(cfg.http_cache.excluded_paths, vec!["/admin".to_string()]);
    assert!(!cfg.http_cache.cache_query_params);

    // 2) Env override should win over file
    unsafe {
        env::set_var("MAIMNP__CACHE__DEFAULT_TTL", "90");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.cache.default_ttl, 90);
    unsafe {
        env::remove_var("MAIMNP__CACHE__DEFAULT_TTL");
    }

    // 3) Invalid config is rejected
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(&invalid_path, "[cache]\nkey_prefix = \"\"\n").expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert_eq!(err, ConfigError::EmptyKeyPrefix);
}
