//! Interfaces to the sources the engine consults: the structured API ("authoritative"), the scraped
//! web pages ("secondary") and the paginated per-user top releases chart.

use crate::common::{ReleaseDate, TopRelease, Track};
use crate::error::{LastfmCacheError, Result};
use crate::tags::TagList;

/// The outcome of a single source fetch. A confirmed absence is kept apart from failures to reach
/// or understand the source, because only the former may be cached.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Found(T),
    NotFound,
    ConnectionFailure(String),
    ProtocolError(String),
}

impl<T> Fetch<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Fetch::Found(value) => Fetch::Found(f(value)),
            Fetch::NotFound => Fetch::NotFound,
            Fetch::ConnectionFailure(message) => Fetch::ConnectionFailure(message),
            Fetch::ProtocolError(message) => Fetch::ProtocolError(message),
        }
    }

    /// Turn a failure into an error. `NotFound` becomes `Ok(None)` so the caller decides how to
    /// record it.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Fetch::Found(value) => Ok(Some(value)),
            Fetch::NotFound => Ok(None),
            Fetch::ConnectionFailure(message) => Err(LastfmCacheError::connection(message)),
            Fetch::ProtocolError(message) => Err(LastfmCacheError::protocol(message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArtistData {
    pub name: String,
    pub listener_count: u64,
    pub play_count: u64,
    pub cover_image: Option<String>,
    /// May be empty; some sources omit the biography without reporting an error.
    pub biography: String,
    pub tags: TagList,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReleaseData {
    pub artist_name: String,
    pub name: String,
    pub listener_count: u64,
    pub play_count: u64,
    pub cover_image: Option<String>,
    pub tags: TagList,
    /// Plain API sources leave these empty; they usually only exist on the release page.
    pub release_date: Option<ReleaseDate>,
    pub tracks: Vec<Track>,
}

/// What the engine extracts from an artist or release page. Tags are unscored and listed most
/// relevant first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecondaryPage {
    pub title: Option<String>,
    pub cover_image: Option<String>,
    /// Raw date text as shown on the page, e.g. `25 December 2023`.
    pub release_date: Option<String>,
    pub tags: Vec<String>,
    pub tracks: Vec<Track>,
}

pub trait AuthoritativeSource: Send + Sync {
    fn get_artist(&self, name: &str) -> Fetch<ArtistData>;
    fn get_release(&self, artist: &str, release: &str) -> Fetch<ReleaseData>;
}

pub trait SecondarySource: Send + Sync {
    fn artist_page(&self, artist: &str) -> Fetch<SecondaryPage>;
    fn release_page(&self, artist: &str, release: &str) -> Fetch<SecondaryPage>;
}

/// One page of a user's top releases chart.
#[derive(Debug, Clone, PartialEq)]
pub enum TopReleasesPage {
    Rows(Vec<TopRelease>),
    /// The site redirected instead of serving the page: there are no more pages.
    NoMorePages,
    /// Any other status. The same page should be fetched again.
    UnexpectedStatus(u16),
    /// The page was served but the chart section is missing entirely.
    MissingSection,
    ConnectionFailure(String),
}

pub trait TopReleasesSource: Send + Sync {
    /// Pages are numbered from 1.
    fn top_releases_page(&self, username: &str, page: u32) -> TopReleasesPage;
}
