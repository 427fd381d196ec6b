/// The common module holds the resolved entities that the engine hands back to callers, plus the small
/// helpers (name folding, date handling, logging setup) that every other module leans on.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::sync::Mutex;

use chrono::NaiveDate;
use directories::ProjectDirs;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};
use unicode_normalization::UnicodeNormalization;

use crate::error::{LastfmCacheError, Result};
use crate::tags::TagList;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Folds a name into the key used for every case-insensitive comparison: trimmed, NFC, lowercased.
pub fn fold_name(name: &str) -> String {
    name.trim().nfc().collect::<String>().to_lowercase()
}

pub fn names_match(a: &str, b: &str) -> bool {
    fold_name(a) == fold_name(b)
}

/// True when the string has at least one cased character and none of them are uppercase.
pub fn is_all_lowercase(s: &str) -> bool {
    s.chars().any(|c| c.is_lowercase()) && !s.chars().any(|c| c.is_uppercase())
}

/// True when the string has at least one cased character and none of them are lowercase.
pub fn is_all_uppercase(s: &str) -> bool {
    s.chars().any(|c| c.is_uppercase()) && !s.chars().any(|c| c.is_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    pub listener_count: u64,
    pub play_count: u64,
    pub cover_image: Option<String>,
    pub biography: String,
    pub tags: TagList,
}

impl fmt::Display for Artist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Artist name: {}", self.name)?;
        writeln!(f, "Listener count: {}", self.listener_count)?;
        writeln!(f, "Play count: {}", self.play_count)?;
        writeln!(f, "Has cover image: {}", yes_no(self.cover_image.is_some()))?;
        writeln!(f, "Has biography: {}", yes_no(!self.biography.is_empty()))?;
        write!(f, "Tags: {}", self.tags.names().collect::<Vec<_>>().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub number: u32,
    pub name: String,
    /// Only set when the track's performer differs from the release artist, e.g. on compilations.
    pub artist: Option<String>,
    pub listener_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Release {
    pub artist_name: String,
    pub name: String,
    pub release_date: Option<ReleaseDate>,
    pub listener_count: u64,
    pub play_count: u64,
    pub cover_image: Option<String>,
    pub tags: TagList,
    /// Keyed by track number, so iteration is always in ascending track order.
    pub tracks: BTreeMap<u32, Track>,
}

impl Release {
    pub fn insert_track(&mut self, track: Track) {
        self.tracks.insert(track.number, track);
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Release name: {}", self.name)?;
        writeln!(f, "Artist name: {}", self.artist_name)?;
        writeln!(f, "Listener count: {}", self.listener_count)?;
        writeln!(f, "Play count: {}", self.play_count)?;
        writeln!(f, "Has cover image: {}", yes_no(self.cover_image.is_some()))?;
        match &self.release_date {
            Some(date) => writeln!(f, "Release date: {date}")?,
            None => writeln!(f, "Release date: unknown")?,
        }
        write!(f, "Tags: {}", self.tags.names().collect::<Vec<_>>().join(", "))
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// One row of a user's top releases chart. A user's rows are only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopRelease {
    pub index: u32,
    pub scrobbles: u64,
    pub artist: String,
    pub title: String,
}

/// A release date with partial precision: a year, a year and month, or a full date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

static STORED_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").unwrap());
static YEAR_ONLY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

impl ReleaseDate {
    pub fn year(year: i32) -> Self {
        Self { year, month: None, day: None }
    }

    /// Parses the normalized `YYYY`, `YYYY-MM` or `YYYY-MM-DD` form this type displays as.
    pub fn parse(value: &str) -> Option<Self> {
        let captures = STORED_DATE_REGEX.captures(value.trim())?;
        let year = captures.get(1)?.as_str().parse().ok()?;
        let month = match captures.get(2) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        let day = match captures.get(3) {
            Some(d) => Some(d.as_str().parse().ok()?),
            None => None,
        };
        Some(Self { year, month, day })
    }

    /// Parses the human form used on release pages. Formats are tried in order: `25 December 2023`,
    /// then `December 2023`, then `2023`. The first format that parses wins.
    pub fn from_page_text(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(date) = NaiveDate::parse_from_str(value, "%d %B %Y") {
            return Some(Self::from_naive(date, true));
        }
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {value}"), "%d %B %Y") {
            return Some(Self::from_naive(date, false));
        }
        if YEAR_ONLY_REGEX.is_match(value) {
            return value.parse().ok().map(Self::year);
        }
        None
    }

    fn from_naive(date: NaiveDate, with_day: bool) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: Some(date.month()),
            day: if with_day { Some(date.day()) } else { None },
        }
    }
}

impl fmt::Display for ReleaseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.month, self.day) {
            (Some(month), Some(day)) => write!(f, "{:04}-{:02}-{:02}", self.year, month, day),
            (Some(month), None) => write!(f, "{:04}-{:02}", self.year, month),
            _ => write!(f, "{:04}", self.year),
        }
    }
}

static LOGGING_INITIALIZED: Mutex<Option<HashSet<String>>> = Mutex::new(None);
static FILE_LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global tracing subscriber. `output` is either `stderr` or `file`; repeated calls with
/// the same output are no-ops.
pub fn initialize_logging(output: &str) -> Result<()> {
    {
        let mut initialized = LOGGING_INITIALIZED
            .lock()
            .map_err(|_| LastfmCacheError::Generic("logging state poisoned".to_string()))?;
        let seen = initialized.get_or_insert_with(HashSet::new);
        if !seen.insert(output.to_string()) {
            return Ok(());
        }
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match output {
        "stderr" => {
            let subscriber = tracing_fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| LastfmCacheError::Generic(e.to_string()))?;
        }
        "file" => {
            let proj_dirs = ProjectDirs::from("", "", "lastfmcache")
                .ok_or_else(|| LastfmCacheError::Generic("Failed to get project directories".to_string()))?;
            let log_dir = proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir()).to_path_buf();
            fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .max_log_files(10)
                .filename_prefix("lastfmcache")
                .filename_suffix("log")
                .build(&log_dir)
                .map_err(|e| LastfmCacheError::Generic(e.to_string()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_LOG_GUARD.set(guard);

            let subscriber = tracing_fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| LastfmCacheError::Generic(e.to_string()))?;
        }
        other => {
            return Err(LastfmCacheError::Generic(format!("Unknown log output: {other}")));
        }
    }

    Ok(())
}
