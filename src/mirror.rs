//! The mirror API: a JSON service that fronts the Last.fm API and needs no API key. It serves
//! `/v1/artists/{artist}` and `/v1/artists/{artist}/releases/{release}`.

use std::collections::HashMap;
use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::common::{ReleaseDate, Track};
use crate::config::Config;
use crate::sources::{ArtistData, AuthoritativeSource, Fetch, ReleaseData};
use crate::tags::TagList;

const USER_AGENT: &str = concat!("lastfmcache-rs/", env!("CARGO_PKG_VERSION"));

/// Path segments can't contain a slash, so the mirror expects U+2215 DIVISION SLASH in its place.
pub fn escape_path_segment(name: &str) -> String {
    urlencoding::encode(&name.trim().replace('/', "\u{2215}")).into_owned()
}

pub fn artist_url(base_url: &str, artist: &str) -> String {
    format!("{}/v1/artists/{}", base_url, escape_path_segment(artist))
}

pub fn release_url(base_url: &str, artist: &str, release: &str) -> String {
    format!(
        "{}/v1/artists/{}/releases/{}",
        base_url,
        escape_path_segment(artist),
        escape_path_segment(release)
    )
}

/// How a failed mirror request is reported. 404 is the only answer that proves absence; any other
/// status means the mirror is misbehaving.
pub fn classify_failure<T>(error: ureq::Error) -> Fetch<T> {
    match error {
        ureq::Error::Status(404, _) => Fetch::NotFound,
        ureq::Error::Status(code, _) => Fetch::ProtocolError(format!("mirror answered with status {code}")),
        ureq::Error::Transport(transport) => Fetch::ConnectionFailure(transport.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct MirrorArtist {
    artist_name: String,
    #[serde(default)]
    listener_count: Option<u64>,
    #[serde(default)]
    play_count: Option<u64>,
    #[serde(default)]
    biography: Option<String>,
    #[serde(default)]
    cover_image: Option<String>,
    #[serde(default, deserialize_with = "ordered_tags")]
    tags: TagList,
}

#[derive(Debug, Deserialize)]
struct MirrorTrack {
    track_number: u32,
    track_name: String,
    #[serde(default)]
    artist_name: Option<String>,
    #[serde(default)]
    listener_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MirrorRelease {
    artist_name: String,
    release_name: String,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    listener_count: Option<u64>,
    #[serde(default)]
    play_count: Option<u64>,
    #[serde(default)]
    cover_image: Option<String>,
    #[serde(default, deserialize_with = "ordered_tags")]
    tags: TagList,
    #[serde(default)]
    tracks: HashMap<String, MirrorTrack>,
}

/// Tags arrive as a JSON object of `tag: score`, in rank order. A plain map type would lose that order,
/// so the entries are collected as they stream past.
fn ordered_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TagList, D::Error> {
    struct TagsVisitor;

    impl<'de> Visitor<'de> for TagsVisitor {
        type Value = TagList;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object of tag names to scores")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<TagList, E> {
            Ok(TagList::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<TagList, A::Error> {
            let mut tags = TagList::new();
            while let Some((tag, score)) = map.next_entry::<String, Option<i64>>()? {
                tags.insert(tag, score.unwrap_or(0));
            }
            Ok(tags)
        }
    }

    deserializer.deserialize_any(TagsVisitor)
}

impl From<MirrorArtist> for ArtistData {
    fn from(a: MirrorArtist) -> Self {
        ArtistData {
            name: a.artist_name,
            listener_count: a.listener_count.unwrap_or(0),
            play_count: a.play_count.unwrap_or(0),
            cover_image: a.cover_image.filter(|c| !c.is_empty()),
            biography: a.biography.unwrap_or_default(),
            tags: a.tags,
        }
    }
}

impl MirrorRelease {
    fn into_release_data(self) -> Fetch<ReleaseData> {
        let release_date = match self.release_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(text) => match ReleaseDate::parse(text).or_else(|| ReleaseDate::from_page_text(text)) {
                Some(date) => Some(date),
                None => return Fetch::ProtocolError(format!("mirror sent an unrecognized release date {text:?}")),
            },
            None => None,
        };
        let mut tracks: Vec<Track> = self
            .tracks
            .into_values()
            .map(|t| Track {
                number: t.track_number,
                name: t.track_name,
                artist: t.artist_name.filter(|a| !a.is_empty()),
                listener_count: t.listener_count.unwrap_or(0),
            })
            .collect();
        tracks.sort_by_key(|t| t.number);
        Fetch::Found(ReleaseData {
            artist_name: self.artist_name,
            name: self.release_name,
            listener_count: self.listener_count.unwrap_or(0),
            play_count: self.play_count.unwrap_or(0),
            cover_image: self.cover_image.filter(|c| !c.is_empty()),
            tags: self.tags,
            release_date,
            tracks,
        })
    }
}

pub struct MirrorClient {
    agent: ureq::Agent,
    base_url: String,
}

impl MirrorClient {
    pub fn new(c: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(c.http_timeout)
            .timeout_read(c.http_timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: c.mirror_api_url.clone(),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Fetch<T> {
        debug!("requesting {url}");
        match self.agent.get(url).call() {
            Ok(response) => match response.into_string() {
                Ok(body) => match serde_json::from_str::<T>(&body) {
                    Ok(value) => Fetch::Found(value),
                    Err(e) => Fetch::ProtocolError(format!("failed to decode mirror response from {url}: {e}")),
                },
                Err(e) => Fetch::ConnectionFailure(format!("failed to read mirror response from {url}: {e}")),
            },
            Err(e) => classify_failure(e),
        }
    }
}

impl AuthoritativeSource for MirrorClient {
    fn get_artist(&self, name: &str) -> Fetch<ArtistData> {
        self.get_json::<MirrorArtist>(&artist_url(&self.base_url, name)).map(ArtistData::from)
    }

    fn get_release(&self, artist: &str, release: &str) -> Fetch<ReleaseData> {
        match self.get_json::<MirrorRelease>(&release_url(&self.base_url, artist, release)) {
            Fetch::Found(r) => r.into_release_data(),
            other => other.map(|_| ReleaseData::default()),
        }
    }
}
