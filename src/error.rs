use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LastfmCacheError {
    #[error("lastfmcache error: {0}")]
    Generic(String),
    #[error(transparent)]
    Expected(#[from] ExpectedError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that are part of normal operation and are meant to be shown to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpectedError {
    #[error("Artist '{artist}' not found.")]
    ArtistNotFound { artist: String },
    #[error("Release '{release}' by {artist} not found.")]
    ReleaseNotFound { artist: String, release: String },
    #[error("Could not reach source: {message}")]
    ConnectionFailure { message: String },
    #[error("Malformed response from source: {message}")]
    SourceProtocol { message: String },
    #[error("Unexpected page structure: {message}")]
    Structural { message: String },
    #[error("Configuration file not found ({path})")]
    ConfigNotFound { path: PathBuf },
    #[error("Failed to decode configuration file ({path}): {message}")]
    ConfigDecode { path: PathBuf, message: String },
    #[error("Invalid value for {key} in configuration file ({path}): {message}")]
    InvalidConfigValue { path: PathBuf, key: String, message: String },
}

impl LastfmCacheError {
    pub fn artist_not_found(artist: &str) -> Self {
        ExpectedError::ArtistNotFound {
            artist: artist.to_string(),
        }
        .into()
    }

    pub fn release_not_found(artist: &str, release: &str) -> Self {
        ExpectedError::ReleaseNotFound {
            artist: artist.to_string(),
            release: release.to_string(),
        }
        .into()
    }

    pub fn connection(message: impl Into<String>) -> Self {
        ExpectedError::ConnectionFailure { message: message.into() }.into()
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ExpectedError::SourceProtocol { message: message.into() }.into()
    }

    pub fn structural(message: impl Into<String>) -> Self {
        ExpectedError::Structural { message: message.into() }.into()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LastfmCacheError::Expected(ExpectedError::ArtistNotFound { .. } | ExpectedError::ReleaseNotFound { .. })
        )
    }

    /// Only connectivity failures are worth retrying; everything else is either confirmed or malformed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LastfmCacheError::Expected(ExpectedError::ConnectionFailure { .. }))
    }
}

pub type Result<T> = std::result::Result<T, LastfmCacheError>;
