//! The reconciliation engine. Every lookup runs one sequential pipeline:
//!
//! alias resolution -> fresh cache hit? -> fresh not-found marker? -> API fetch -> page enrichment
//! -> tag merge -> cache write -> alias write.
//!
//! Only source fetches can fail. Cache reads report absence instead of failing, and cache writes that
//! fail are logged without failing the lookup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::alias;
use crate::cache::{open_cache_store, CacheStore};
use crate::common::{is_all_lowercase, is_all_uppercase, Artist, Release, ReleaseDate, TopRelease, Track};
use crate::config::Config;
use crate::error::{LastfmCacheError, Result};
use crate::mirror::MirrorClient;
use crate::sources::{AuthoritativeSource, SecondarySource, TopReleasesPage, TopReleasesSource};
use crate::tags::{merge_tags, TagList};
use crate::web::{LastfmWeb, PageParser};

/// Tags with longer names are dropped from API results.
pub const MAX_TAG_LENGTH: usize = 100;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A record fetched at `fetched` is fresh strictly before `fetched + validity`.
pub fn is_fresh(fetched: DateTime<Utc>, now: DateTime<Utc>, validity: Duration) -> bool {
    let age_ms = i128::from(now.signed_duration_since(fetched).num_milliseconds());
    age_ms < validity.as_millis() as i128
}

/// Lower-cases API tag names and drops overlong ones. Scores and order are kept.
pub fn normalize_api_tags(tags: &TagList) -> TagList {
    tags.iter()
        .filter(|(tag, _)| tag.chars().count() <= MAX_TAG_LENGTH)
        .map(|(tag, score)| (tag.to_lowercase(), score))
        .collect()
}

/// The page title replaces the API title when the API returned it in all lowercase, the two agree
/// once case-folded, and the page title isn't shouting in all caps.
pub fn repaired_release_title(api_title: &str, page_title: &str) -> Option<String> {
    if !page_title.is_empty()
        && is_all_lowercase(api_title)
        && api_title == page_title.to_lowercase()
        && !is_all_uppercase(page_title)
    {
        Some(page_title.to_string())
    } else {
        None
    }
}

pub struct LastfmCache {
    store: Arc<dyn CacheStore>,
    authoritative: Arc<dyn AuthoritativeSource>,
    secondary: Option<Arc<dyn SecondarySource>>,
    top_releases: Option<Arc<dyn TopReleasesSource>>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl LastfmCache {
    /// An engine with no page source: API results are taken as final.
    pub fn new(c: &Config, store: Arc<dyn CacheStore>, authoritative: Arc<dyn AuthoritativeSource>) -> Self {
        Self {
            store,
            authoritative,
            secondary: None,
            top_releases: None,
            clock: Arc::new(SystemClock),
            config: c.clone(),
        }
    }

    /// Open the configured cache and resolve everything through the mirror API.
    pub fn open_mirror(c: &Config) -> Result<Self> {
        let store: Arc<dyn CacheStore> = Arc::from(open_cache_store(c)?);
        Ok(Self::new(c, store, Arc::new(MirrorClient::new(c))))
    }

    /// Open the configured cache, use `authoritative` for the API and the website for enrichment and
    /// top release charts.
    pub fn open_with_web<P: PageParser + 'static>(
        c: &Config,
        authoritative: Arc<dyn AuthoritativeSource>,
        parser: P,
    ) -> Result<Self> {
        let store: Arc<dyn CacheStore> = Arc::from(open_cache_store(c)?);
        let web = Arc::new(LastfmWeb::new(c, parser));
        Ok(Self::new(c, store, authoritative)
            .with_secondary(web.clone())
            .with_top_releases(web))
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn SecondarySource>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_top_releases(mut self, top_releases: Arc<dyn TopReleasesSource>) -> Self {
        self.top_releases = Some(top_releases);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    fn is_fresh(&self, fetched: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        is_fresh(fetched, now, self.config.cache_validity)
    }

    /// Drops empty and placeholder image references.
    fn usable_image(&self, image: Option<String>) -> Option<String> {
        image.filter(|url| !url.trim().is_empty() && !self.config.is_placeholder_image(url))
    }

    fn log_write_failure(what: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("failed to write {what} to the cache: {e}");
        }
    }

    fn artist_not_found(&self, name: &str, now: DateTime<Utc>) -> LastfmCacheError {
        info!("artist {name} not found, caching the negative result");
        Self::log_write_failure("not-found artist", self.store.upsert_negative_artist(name, now));
        LastfmCacheError::artist_not_found(name)
    }

    fn release_not_found(&self, artist: &str, release: &str, now: DateTime<Utc>) -> LastfmCacheError {
        info!("release {artist} - {release} not found, caching the negative result");
        Self::log_write_failure("not-found release", self.store.upsert_negative_release(artist, release, now));
        LastfmCacheError::release_not_found(artist, release)
    }

    pub fn get_artist(&self, name: &str) -> Result<Artist> {
        let resolved = alias::resolve_artist(self.store.as_ref(), name);
        let lookup = resolved.lookup.as_str();
        let now = self.clock.now();

        if let Some(cached) = self.store.get_artist(lookup) {
            if self.is_fresh(cached.fetched, now) {
                debug!("fresh cache hit for artist {lookup}");
                return Ok(cached.value);
            }
            debug!("stale cache entry for artist {lookup}, refreshing");
        }
        if let Some(fetched) = self.store.get_negative_artist(lookup) {
            if self.is_fresh(fetched, now) {
                debug!("fresh not-found entry for artist {lookup}");
                return Err(LastfmCacheError::artist_not_found(lookup));
            }
        }

        debug!("fetching artist {lookup} from the API");
        let data = match self.authoritative.get_artist(lookup).into_result()? {
            Some(data) => data,
            None => return Err(self.artist_not_found(lookup, now)),
        };
        let mut artist = Artist {
            name: if data.name.trim().is_empty() { lookup.to_string() } else { data.name },
            listener_count: data.listener_count,
            play_count: data.play_count,
            cover_image: self.usable_image(data.cover_image),
            biography: data.biography.trim().to_string(),
            tags: normalize_api_tags(&data.tags),
        };

        // The artist page is only worth fetching when the API had no usable picture.
        let mut page_tags = Vec::new();
        if artist.cover_image.is_none() {
            if let Some(secondary) = &self.secondary {
                debug!("fetching artist page for {lookup}");
                match secondary.artist_page(lookup).into_result()? {
                    Some(page) => {
                        artist.cover_image = self.usable_image(page.cover_image);
                        page_tags = page.tags;
                    }
                    None => return Err(self.artist_not_found(lookup, now)),
                }
            }
        }
        artist.tags = merge_tags(&artist.tags, &page_tags);

        Self::log_write_failure("artist", self.store.upsert_artist(&artist, now));
        self.record_artist_aliases(&resolved, &artist.name);
        info!("resolved artist {} ({} tags)", artist.name, artist.tags.len());
        Ok(artist)
    }

    fn record_artist_aliases(&self, resolved: &alias::ResolvedName, canonical: &str) {
        Self::log_write_failure(
            "artist alias",
            alias::record_artist_alias(self.store.as_ref(), &resolved.requested, canonical).map(|_| ()),
        );
        if resolved.was_aliased() {
            Self::log_write_failure(
                "artist alias",
                alias::record_artist_alias(self.store.as_ref(), &resolved.lookup, canonical).map(|_| ()),
            );
        }
    }

    pub fn get_release(&self, artist: &str, name: &str) -> Result<Release> {
        let artist = artist.trim();
        let resolved = alias::resolve_release(self.store.as_ref(), artist, name);
        let lookup = resolved.lookup.as_str();
        let now = self.clock.now();

        if let Some(cached) = self.store.get_release(artist, lookup) {
            if self.is_fresh(cached.fetched, now) {
                debug!("fresh cache hit for release {artist} - {lookup}");
                return Ok(cached.value);
            }
            debug!("stale cache entry for release {artist} - {lookup}, refreshing");
        }
        if let Some(fetched) = self.store.get_negative_release(artist, lookup) {
            if self.is_fresh(fetched, now) {
                debug!("fresh not-found entry for release {artist} - {lookup}");
                return Err(LastfmCacheError::release_not_found(artist, lookup));
            }
        }

        debug!("fetching release {artist} - {lookup} from the API");
        let data = match self.authoritative.get_release(artist, lookup).into_result()? {
            Some(data) => data,
            None => return Err(self.release_not_found(artist, lookup, now)),
        };
        let mut release = Release {
            artist_name: if data.artist_name.trim().is_empty() { artist.to_string() } else { data.artist_name },
            name: if data.name.trim().is_empty() { lookup.to_string() } else { data.name },
            release_date: data.release_date,
            listener_count: data.listener_count,
            play_count: data.play_count,
            cover_image: self.usable_image(data.cover_image),
            tags: normalize_api_tags(&data.tags),
            tracks: Default::default(),
        };
        add_tracks(&mut release, data.tracks);

        // Release dates and track lists usually only exist on the page, so it is always fetched.
        let mut page_tags = Vec::new();
        if let Some(secondary) = &self.secondary {
            debug!("fetching release page for {artist} - {lookup}");
            let page = match secondary.release_page(artist, lookup).into_result()? {
                Some(page) => page,
                None => return Err(self.release_not_found(artist, lookup, now)),
            };
            if let Some(title) = page.title.as_deref().and_then(|t| repaired_release_title(&release.name, t.trim())) {
                debug!("replacing lowercase API title {} with {}", release.name, title);
                release.name = title;
            }
            if release.cover_image.is_none() {
                release.cover_image = self.usable_image(page.cover_image);
            }
            if release.release_date.is_none() {
                if let Some(text) = page.release_date.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                    release.release_date = Some(ReleaseDate::from_page_text(text).ok_or_else(|| {
                        LastfmCacheError::protocol(format!("unrecognized release date {text:?}"))
                    })?);
                }
            }
            if release.tracks.is_empty() {
                add_tracks(&mut release, page.tracks);
            }
            page_tags = page.tags;
        }
        release.tags = merge_tags(&release.tags, &page_tags);

        Self::log_write_failure("release", self.store.upsert_release(&release, now));
        Self::log_write_failure(
            "release alias",
            alias::record_release_alias(self.store.as_ref(), artist, &resolved.requested, &release).map(|_| ()),
        );
        if resolved.was_aliased() {
            Self::log_write_failure(
                "release alias",
                alias::record_release_alias(self.store.as_ref(), artist, &resolved.lookup, &release).map(|_| ()),
            );
        }
        info!(
            "resolved release {} - {} ({} tags, {} tracks)",
            release.artist_name,
            release.name,
            release.tags.len(),
            release.tracks.len()
        );
        Ok(release)
    }

    /// A user's full top releases chart. Served from the cache while fresh and non-empty; otherwise
    /// every page is fetched and the cached chart is replaced as a whole.
    pub fn get_top_user_releases(&self, username: &str) -> Result<Vec<TopRelease>> {
        let username = username.trim();
        let now = self.clock.now();

        if let Some(cached) = self.store.get_top_releases(username) {
            if self.is_fresh(cached.fetched, now) && !cached.value.is_empty() {
                debug!("fresh cache hit for top releases of {username}");
                return Ok(cached.value);
            }
        }

        let source = self
            .top_releases
            .as_ref()
            .ok_or_else(|| LastfmCacheError::Generic("no top releases source configured".to_string()))?;

        let mut releases = Vec::new();
        let mut page = 1;
        let mut retries = 0;
        loop {
            debug!("fetching top releases page {page} for {username}");
            match source.top_releases_page(username, page) {
                TopReleasesPage::Rows(rows) => {
                    releases.extend(rows);
                    page += 1;
                    retries = 0;
                }
                TopReleasesPage::NoMorePages => break,
                TopReleasesPage::UnexpectedStatus(status) => {
                    retries += 1;
                    if retries > self.config.max_page_retries {
                        return Err(LastfmCacheError::connection(format!(
                            "top releases page {page} for {username} kept answering with status {status}"
                        )));
                    }
                    warn!("top releases page {page} for {username} answered with status {status}, retrying");
                }
                TopReleasesPage::MissingSection => {
                    return Err(LastfmCacheError::structural(format!(
                        "top releases page {page} for {username} has no chart section"
                    )));
                }
                TopReleasesPage::ConnectionFailure(message) => return Err(LastfmCacheError::connection(message)),
            }
        }

        Self::log_write_failure("top releases", self.store.replace_top_releases(username, &releases, now));
        info!("fetched {} top releases for {username} over {} pages", releases.len(), page - 1);
        Ok(releases)
    }
}

fn add_tracks(release: &mut Release, tracks: Vec<Track>) {
    for track in tracks {
        if track.number == 0 {
            warn!("dropping track {:?} without a valid track number", track.name);
            continue;
        }
        release.insert_track(track);
    }
}
