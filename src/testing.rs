use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::common::{fold_name, TopRelease};
use crate::config::Config;
use crate::engine::Clock;
use crate::sources::{
    ArtistData, AuthoritativeSource, Fetch, ReleaseData, SecondaryPage, SecondarySource, TopReleasesPage,
    TopReleasesSource,
};
use crate::tags::TagList;

static INIT: Once = Once::new();

pub fn init() -> TempDir {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
    TempDir::new().expect("failed to create temp dir")
}

// Creates a test config with a cache directory but no database
pub fn config() -> (Config, TempDir) {
    let temp_dir = init();
    let cache_dir = temp_dir.path().join("cache");
    fs::create_dir_all(&cache_dir).expect("failed to create cache dir");

    let config = Config {
        cache_dir,
        cache_validity: Duration::from_secs(3600),
        http_timeout: Duration::from_secs(1),
        max_page_retries: 3,
        ..Config::default()
    };
    (config, temp_dir)
}

pub fn ts(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).expect("timestamp out of range")
}

pub fn tags(entries: &[(&str, i64)]) -> TagList {
    entries.iter().map(|(tag, score)| (*tag, *score)).collect()
}

pub fn artist_data(name: &str, entries: &[(&str, i64)]) -> ArtistData {
    ArtistData {
        name: name.to_string(),
        listener_count: 1000,
        play_count: 5000,
        biography: format!("{name} is a band."),
        tags: tags(entries),
        ..Default::default()
    }
}

pub fn release_data(artist: &str, name: &str, entries: &[(&str, i64)]) -> ReleaseData {
    ReleaseData {
        artist_name: artist.to_string(),
        name: name.to_string(),
        listener_count: 100,
        play_count: 500,
        tags: tags(entries),
        ..Default::default()
    }
}

pub fn top_release(index: u32, artist: &str, title: &str, scrobbles: u64) -> TopRelease {
    TopRelease {
        index,
        scrobbles,
        artist: artist.to_string(),
        title: title.to_string(),
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(seconds: i64) -> Self {
        Self { now: Mutex::new(ts(seconds)) }
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

fn release_key(artist: &str, release: &str) -> (String, String) {
    (fold_name(artist), fold_name(release))
}

/// Answers from a scripted table keyed by folded name. Unscripted names are not found.
#[derive(Default)]
pub struct FakeAuthoritative {
    artists: Mutex<HashMap<String, Fetch<ArtistData>>>,
    releases: Mutex<HashMap<(String, String), Fetch<ReleaseData>>>,
    artist_calls: AtomicUsize,
    release_calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl FakeAuthoritative {
    pub fn set_artist(&self, name: &str, answer: Fetch<ArtistData>) {
        self.artists.lock().unwrap().insert(fold_name(name), answer);
    }

    pub fn set_release(&self, artist: &str, release: &str, answer: Fetch<ReleaseData>) {
        self.releases.lock().unwrap().insert(release_key(artist, release), answer);
    }

    pub fn artist_calls(&self) -> usize {
        self.artist_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Every name passed to the fake, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl AuthoritativeSource for FakeAuthoritative {
    fn get_artist(&self, name: &str) -> Fetch<ArtistData> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(name.to_string());
        self.artists.lock().unwrap().get(&fold_name(name)).cloned().unwrap_or(Fetch::NotFound)
    }

    fn get_release(&self, artist: &str, release: &str) -> Fetch<ReleaseData> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(format!("{artist} - {release}"));
        self.releases.lock().unwrap().get(&release_key(artist, release)).cloned().unwrap_or(Fetch::NotFound)
    }
}

#[derive(Default)]
pub struct FakeSecondary {
    artists: Mutex<HashMap<String, Fetch<SecondaryPage>>>,
    releases: Mutex<HashMap<(String, String), Fetch<SecondaryPage>>>,
    artist_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl FakeSecondary {
    pub fn set_artist_page(&self, artist: &str, answer: Fetch<SecondaryPage>) {
        self.artists.lock().unwrap().insert(fold_name(artist), answer);
    }

    pub fn set_release_page(&self, artist: &str, release: &str, answer: Fetch<SecondaryPage>) {
        self.releases.lock().unwrap().insert(release_key(artist, release), answer);
    }

    pub fn artist_calls(&self) -> usize {
        self.artist_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

impl SecondarySource for FakeSecondary {
    fn artist_page(&self, artist: &str) -> Fetch<SecondaryPage> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        self.artists.lock().unwrap().get(&fold_name(artist)).cloned().unwrap_or(Fetch::NotFound)
    }

    fn release_page(&self, artist: &str, release: &str) -> Fetch<SecondaryPage> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.releases.lock().unwrap().get(&release_key(artist, release)).cloned().unwrap_or(Fetch::NotFound)
    }
}

/// Hands out queued page answers in order. Once the queue runs dry every page is past the end.
#[derive(Default)]
pub struct FakeTopReleases {
    script: Mutex<VecDeque<TopReleasesPage>>,
    pages_requested: Mutex<Vec<u32>>,
}

impl FakeTopReleases {
    pub fn push(&self, page: TopReleasesPage) {
        self.script.lock().unwrap().push_back(page);
    }

    pub fn pages_requested(&self) -> Vec<u32> {
        self.pages_requested.lock().unwrap().clone()
    }
}

impl TopReleasesSource for FakeTopReleases {
    fn top_releases_page(&self, _username: &str, page: u32) -> TopReleasesPage {
        self.pages_requested.lock().unwrap().push(page);
        self.script.lock().unwrap().pop_front().unwrap_or(TopReleasesPage::NoMorePages)
    }
}
