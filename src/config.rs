//! The config module provides the config spec and parsing logic.
//!
//! Every key is optional. Unknown keys are a decode error, so typos surface instead of being
//! silently ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ExpectedError, Result};

pub const DEFAULT_CACHE_VALIDITY_SECONDS: u64 = 86400 * 28;
pub const DEFAULT_MIRROR_API_URL: &str = "https://spiritualized.io/lastfmcache/api";
pub const DEFAULT_WEB_BASE_URL: &str = "https://www.last.fm";
/// The "star" image the site serves for artists without a picture.
pub const DEFAULT_PLACEHOLDER_IMAGE_FINGERPRINT: &str = "2a96cbd8b46e442fc41c2b86b821562f";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub cache_enabled: bool,
    pub cache_validity: Duration,
    /// Substrings identifying placeholder cover images. Matching URLs are treated as no image.
    pub placeholder_image_fingerprints: Vec<String>,
    pub mirror_api_url: String,
    pub web_base_url: String,
    pub http_timeout: Duration,
    /// How many times a list page answering with an unexpected status is refetched before giving up.
    pub max_page_retries: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    cache_dir: Option<String>,
    cache_enabled: Option<bool>,
    cache_validity_seconds: Option<u64>,
    placeholder_image_fingerprints: Option<Vec<String>>,
    mirror_api_url: Option<String>,
    web_base_url: Option<String>,
    http_timeout_seconds: Option<u64>,
    max_page_retries: Option<u32>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "lastfmcache")
}

pub fn default_config_path() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("lastfmcache.toml"),
    }
}

fn default_cache_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => PathBuf::from(".lastfmcache"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_enabled: true,
            cache_validity: Duration::from_secs(DEFAULT_CACHE_VALIDITY_SECONDS),
            placeholder_image_fingerprints: vec![DEFAULT_PLACEHOLDER_IMAGE_FINGERPRINT.to_string()],
            mirror_api_url: DEFAULT_MIRROR_API_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            max_page_retries: 5,
        }
    }
}

impl Config {
    /// Read the configuration from `config_path_override`, or from the default location.
    pub fn parse(config_path_override: Option<&Path>) -> Result<Config> {
        let path = config_path_override.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        debug!("reading configuration from {}", path.display());
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExpectedError::ConfigNotFound { path }.into());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_toml(&path, &contents)
    }

    pub fn from_toml(path: &Path, contents: &str) -> Result<Config> {
        let data: ConfigFile = toml::from_str(contents).map_err(|e| ExpectedError::ConfigDecode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let invalid = |key: &str, message: &str| ExpectedError::InvalidConfigValue {
            path: path.to_path_buf(),
            key: key.to_string(),
            message: message.to_string(),
        };

        let mut config = Config::default();
        if let Some(cache_dir) = data.cache_dir {
            let expanded = shellexpand::tilde(&cache_dir);
            config.cache_dir = PathBuf::from(expanded.as_ref());
        }
        if let Some(enabled) = data.cache_enabled {
            config.cache_enabled = enabled;
        }
        if let Some(seconds) = data.cache_validity_seconds {
            if seconds == 0 {
                return Err(invalid("cache_validity_seconds", "must be a positive number of seconds").into());
            }
            config.cache_validity = Duration::from_secs(seconds);
        }
        if let Some(fingerprints) = data.placeholder_image_fingerprints {
            if fingerprints.iter().any(|f| f.trim().is_empty()) {
                return Err(invalid("placeholder_image_fingerprints", "fingerprints must not be empty").into());
            }
            config.placeholder_image_fingerprints = fingerprints;
        }
        if let Some(url) = data.mirror_api_url {
            config.mirror_api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = data.web_base_url {
            config.web_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(seconds) = data.http_timeout_seconds {
            if seconds == 0 {
                return Err(invalid("http_timeout_seconds", "must be a positive number of seconds").into());
            }
            config.http_timeout = Duration::from_secs(seconds);
        }
        if let Some(retries) = data.max_page_retries {
            config.max_page_retries = retries;
        }
        Ok(config)
    }

    pub fn cache_database_path(&self) -> PathBuf {
        self.cache_dir.join("cache.sqlite3")
    }

    pub fn is_placeholder_image(&self, url: &str) -> bool {
        self.placeholder_image_fingerprints.iter().any(|f| url.contains(f.as_str()))
    }
}
