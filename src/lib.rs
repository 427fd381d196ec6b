pub mod alias;
pub mod cache;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod sources;
pub mod tags;
pub mod web;

pub use cache::{open_cache_store, CacheStore, Cached, NoCache, SqliteCache};
pub use common::{initialize_logging, Artist, Release, ReleaseDate, TopRelease, Track};
pub use config::Config;
pub use engine::{Clock, LastfmCache, SystemClock};
pub use error::{ExpectedError, LastfmCacheError, Result};
pub use sources::{
    ArtistData, AuthoritativeSource, Fetch, ReleaseData, SecondaryPage, SecondarySource, TopReleasesPage,
    TopReleasesSource,
};
pub use tags::{merge_tags, TagList};
pub use web::PageParser;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod alias_test;
#[cfg(test)]
mod config_test;
