//! Tests for configuration loading and resolution
//!
//! Uses serial_test: these tests mutate process environment variables
//! (COMICVINE_API, CBRO_*), so they must not run in parallel.

use cbro_common::config::{
    load_engine_config, load_toml_config, resolve_config_path, EngineConfig, TomlConfig,
    API_KEY_ENV, CACHE_PATH_ENV, CONFIG_PATH_ENV, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(API_KEY_ENV);
    env::remove_var(ROOT_FOLDER_ENV);
    env::remove_var(CACHE_PATH_ENV);
    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_env();
    let missing = PathBuf::from("/nonexistent/cbro/config.toml");

    let config = load_toml_config(Some(&missing)).unwrap();
    assert!(config.comicvine_api_key.is_none());
    assert_eq!(config.workers.concurrency, 4);
}

#[test]
#[serial]
fn test_malformed_config_file_is_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[rate_limit\nmax_requests = ").unwrap();

    let err = load_toml_config(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
#[serial]
fn test_missing_api_key_is_fatal() {
    clear_env();
    let err = EngineConfig::from_toml(TomlConfig::default()).unwrap_err();
    assert!(err.to_string().contains(API_KEY_ENV));
}

#[test]
#[serial]
fn test_whitespace_api_key_is_rejected() {
    clear_env();
    let config = TomlConfig {
        comicvine_api_key: Some("   ".to_string()),
        ..Default::default()
    };
    assert!(EngineConfig::from_toml(config).is_err());
}

#[test]
#[serial]
fn test_env_api_key_overrides_toml() {
    clear_env();
    env::set_var(API_KEY_ENV, "from-env");
    let config = TomlConfig {
        comicvine_api_key: Some("from-toml".to_string()),
        ..Default::default()
    };

    let engine = EngineConfig::from_toml(config).unwrap();
    assert_eq!(engine.api_key, "from-env");
    clear_env();
}

#[test]
#[serial]
fn test_cache_path_defaults_under_root_folder() {
    clear_env();
    let dir = TempDir::new().unwrap();
    env::set_var(ROOT_FOLDER_ENV, dir.path());

    let config = TomlConfig {
        comicvine_api_key: Some("key".to_string()),
        ..Default::default()
    };
    let engine = EngineConfig::from_toml(config).unwrap();

    assert_eq!(engine.root_folder, dir.path());
    assert_eq!(engine.cache_path, dir.path().join("comicvine_cache.db"));
    clear_env();
}

#[test]
#[serial]
fn test_cache_path_env_wins() {
    clear_env();
    env::set_var(CACHE_PATH_ENV, "/tmp/cbro-explicit.db");
    let config = TomlConfig {
        comicvine_api_key: Some("key".to_string()),
        cache_path: Some(PathBuf::from("/tmp/from-toml.db")),
        ..Default::default()
    };

    let engine = EngineConfig::from_toml(config).unwrap();
    assert_eq!(engine.cache_path, PathBuf::from("/tmp/cbro-explicit.db"));
    clear_env();
}

#[test]
#[serial]
fn test_config_path_priority() {
    clear_env();
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.toml");

    let cli = PathBuf::from("/tmp/from-cli.toml");
    assert_eq!(resolve_config_path(Some(&cli)), Some(cli.clone()));
    assert_eq!(
        resolve_config_path(None),
        Some(PathBuf::from("/tmp/from-env.toml"))
    );
    clear_env();
}

#[test]
#[serial]
fn test_load_engine_config_from_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
            comicvine_api_key = "file-key"
            root_folder = "{}"

            [workers]
            concurrency = 2

            [matcher]
            ambiguity_delta = 8.0
            "#,
            dir.path().display()
        ),
    )
    .unwrap();

    let engine = load_engine_config(Some(&path)).unwrap();
    assert_eq!(engine.api_key, "file-key");
    assert_eq!(engine.workers.concurrency, 2);
    assert_eq!(engine.matcher.ambiguity_delta, 8.0);
    assert_eq!(engine.matcher.acceptance_threshold, 60.0);
}

#[test]
#[serial]
fn test_invalid_settings_are_fatal() {
    clear_env();
    let mut config = TomlConfig {
        comicvine_api_key: Some("key".to_string()),
        ..Default::default()
    };
    config.workers.concurrency = 0;

    let err = EngineConfig::from_toml(config).unwrap_err();
    assert!(err.to_string().contains("workers.concurrency"));
}
