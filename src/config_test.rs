use crate::config::*;
use crate::error::{ExpectedError, LastfmCacheError};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_minimal() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "").unwrap();

    let config = Config::parse(Some(&config_path)).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.cache_validity, Duration::from_secs(86400 * 28));
    assert!(config.cache_enabled);
    assert!(config.is_placeholder_image("https://img.example/i/u/300x300/2a96cbd8b46e442fc41c2b86b821562f.png"));
}

#[test]
fn test_config_full() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let cache_dir = temp_dir.path().join("cache");

    std::fs::write(
        &config_path,
        format!(
            r#"
            cache_dir = "{}"
            cache_enabled = false
            cache_validity_seconds = 3600
            placeholder_image_fingerprints = ["deadbeef", "cafebabe"]
            mirror_api_url = "http://localhost:8080/api/"
            web_base_url = "http://localhost:8081"
            http_timeout_seconds = 5
            max_page_retries = 2
            "#,
            cache_dir.display()
        ),
    )
    .unwrap();

    let config = Config::parse(Some(&config_path)).unwrap();
    assert_eq!(config.cache_dir, cache_dir);
    assert_eq!(config.cache_database_path(), cache_dir.join("cache.sqlite3"));
    assert!(!config.cache_enabled);
    assert_eq!(config.cache_validity, Duration::from_secs(3600));
    assert_eq!(config.mirror_api_url, "http://localhost:8080/api");
    assert_eq!(config.web_base_url, "http://localhost:8081");
    assert_eq!(config.http_timeout, Duration::from_secs(5));
    assert_eq!(config.max_page_retries, 2);
    assert!(config.is_placeholder_image("http://x/cafebabe.jpg"));
    assert!(!config.is_placeholder_image("http://x/2a96cbd8b46e442fc41c2b86b821562f.png"));
}

#[test]
fn test_config_tilde_expansion() {
    let config = Config::from_toml(std::path::Path::new("config.toml"), r#"cache_dir = "~/.lastfm""#).unwrap();
    assert!(!config.cache_dir.to_string_lossy().starts_with('~'));
    assert!(config.cache_dir.ends_with(".lastfm"));
}

#[test]
fn test_config_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nope.toml");
    match Config::parse(Some(&config_path)) {
        Err(LastfmCacheError::Expected(ExpectedError::ConfigNotFound { path })) => assert_eq!(path, config_path),
        other => panic!("expected ConfigNotFound, got {other:?}"),
    }
}

#[test]
fn test_config_unknown_key() {
    let result = Config::from_toml(std::path::Path::new("config.toml"), "cache_validty_seconds = 10");
    match result {
        Err(LastfmCacheError::Expected(ExpectedError::ConfigDecode { message, .. })) => {
            assert!(message.contains("cache_validty_seconds"), "{message}");
        }
        other => panic!("expected ConfigDecode, got {other:?}"),
    }
}

#[test]
fn test_config_value_validation() {
    let path = std::path::Path::new("config.toml");

    match Config::from_toml(path, "cache_validity_seconds = 0") {
        Err(LastfmCacheError::Expected(ExpectedError::InvalidConfigValue { key, .. })) => {
            assert_eq!(key, "cache_validity_seconds");
        }
        other => panic!("expected InvalidConfigValue, got {other:?}"),
    }

    match Config::from_toml(path, r#"placeholder_image_fingerprints = ["ok", " "]"#) {
        Err(LastfmCacheError::Expected(ExpectedError::InvalidConfigValue { key, .. })) => {
            assert_eq!(key, "placeholder_image_fingerprints");
        }
        other => panic!("expected InvalidConfigValue, got {other:?}"),
    }

    assert!(matches!(
        Config::from_toml(path, r#"cache_validity_seconds = "soon""#),
        Err(LastfmCacheError::Expected(ExpectedError::ConfigDecode { .. }))
    ));
}
