//! HTTP transport for the scraped Last.fm website. This module builds page URLs and maps response
//! statuses onto fetch outcomes. Extracting data from the HTML is delegated to a [`PageParser`].

use tracing::{debug, warn};

use crate::common::TopRelease;
use crate::config::Config;
use crate::sources::{Fetch, SecondaryPage, SecondarySource, TopReleasesPage, TopReleasesSource};

const USER_AGENT: &str = concat!("lastfmcache-rs/", env!("CARGO_PKG_VERSION"));

/// Extracts data from fetched pages. Errors are human-readable descriptions of what was missing.
pub trait PageParser: Send + Sync {
    fn parse_artist_page(&self, html: &str) -> Result<SecondaryPage, String>;
    fn parse_release_page(&self, html: &str) -> Result<SecondaryPage, String>;
    /// `None` when the page has no chart section at all. A chart section with no rows is `Some(vec![])`.
    fn parse_top_releases(&self, html: &str) -> Option<Vec<TopRelease>>;
}

/// The site's own path escaping. Only the characters that would otherwise split the path are escaped;
/// the HTTP client takes care of the rest.
pub fn lastfm_urlencode(name: &str) -> String {
    name.trim().replace('/', "%2F").replace('#', "%23").replace('?', "%3F")
}

pub fn artist_page_url(base_url: &str, artist: &str) -> String {
    format!("{}/music/{}", base_url, lastfm_urlencode(artist))
}

pub fn release_page_url(base_url: &str, artist: &str, release: &str) -> String {
    format!("{}/music/{}/{}", base_url, lastfm_urlencode(artist), lastfm_urlencode(release))
}

pub fn top_releases_page_url(base_url: &str, username: &str, page: u32) -> String {
    format!("{}/user/{}/library/albums?page={}", base_url, lastfm_urlencode(username), page)
}

/// Parses counts as the site prints them, e.g. `1,234`. An empty string is zero.
pub fn parse_count(value: &str) -> Option<u64> {
    let digits: String = value.trim().chars().filter(|c| *c != ',').collect();
    if digits.is_empty() {
        return Some(0);
    }
    digits.parse().ok()
}

/// A response as far as the page logic cares: the status, and the body when there is one to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: Option<String>,
}

/// Maps an artist or release page response onto a fetch outcome.
pub fn entity_page_outcome(response: PageResponse) -> Fetch<String> {
    match (response.status, response.body) {
        (200, Some(body)) => Fetch::Found(body),
        (404, _) => Fetch::NotFound,
        (status, _) => Fetch::ProtocolError(format!("page answered with status {status}")),
    }
}

/// Maps a top releases page response onto a page outcome. Past the last page the site redirects, and
/// that redirect is the only signal that ends pagination.
pub fn top_releases_page_outcome(response: PageResponse, parser: &dyn PageParser) -> TopReleasesPage {
    match (response.status, response.body) {
        (301 | 302 | 303 | 307 | 308, _) => TopReleasesPage::NoMorePages,
        (200, Some(body)) => match parser.parse_top_releases(&body) {
            Some(rows) => TopReleasesPage::Rows(rows),
            None => TopReleasesPage::MissingSection,
        },
        (status, _) => TopReleasesPage::UnexpectedStatus(status),
    }
}

pub struct LastfmWeb<P> {
    agent: ureq::Agent,
    base_url: String,
    parser: P,
}

impl<P: PageParser> LastfmWeb<P> {
    pub fn new(c: &Config, parser: P) -> Self {
        // Redirects are never followed; they carry meaning for the chart pages.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(c.http_timeout)
            .timeout_read(c.http_timeout)
            .redirects(0)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: c.web_base_url.clone(),
            parser,
        }
    }

    /// `Err` is a transport failure.
    fn get(&self, url: &str) -> Result<PageResponse, String> {
        debug!("requesting {url}");
        match self.agent.get(url).call() {
            Ok(response) => {
                let status = response.status();
                if status != 200 {
                    return Ok(PageResponse { status, body: None });
                }
                let body = response.into_string().map_err(|e| format!("failed to read {url}: {e}"))?;
                Ok(PageResponse {
                    status,
                    body: Some(body),
                })
            }
            Err(ureq::Error::Status(status, _)) => Ok(PageResponse { status, body: None }),
            Err(ureq::Error::Transport(transport)) => Err(transport.to_string()),
        }
    }

    fn fetch_page(&self, url: &str, parse: impl FnOnce(&str) -> Result<SecondaryPage, String>) -> Fetch<SecondaryPage> {
        let response = match self.get(url) {
            Ok(response) => response,
            Err(message) => return Fetch::ConnectionFailure(message),
        };
        match entity_page_outcome(response) {
            Fetch::Found(body) => match parse(&body) {
                Ok(page) => Fetch::Found(page),
                Err(message) => {
                    warn!("failed to parse {url}: {message}");
                    Fetch::ProtocolError(message)
                }
            },
            other => other.map(|_| SecondaryPage::default()),
        }
    }
}

impl<P: PageParser> SecondarySource for LastfmWeb<P> {
    fn artist_page(&self, artist: &str) -> Fetch<SecondaryPage> {
        self.fetch_page(&artist_page_url(&self.base_url, artist), |html| self.parser.parse_artist_page(html))
    }

    fn release_page(&self, artist: &str, release: &str) -> Fetch<SecondaryPage> {
        self.fetch_page(&release_page_url(&self.base_url, artist, release), |html| {
            self.parser.parse_release_page(html)
        })
    }
}

impl<P: PageParser> TopReleasesSource for LastfmWeb<P> {
    fn top_releases_page(&self, username: &str, page: u32) -> TopReleasesPage {
        match self.get(&top_releases_page_url(&self.base_url, username, page)) {
            Ok(response) => top_releases_page_outcome(response, &self.parser),
            Err(message) => TopReleasesPage::ConnectionFailure(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChartParser;

    impl PageParser for ChartParser {
        fn parse_artist_page(&self, _html: &str) -> Result<SecondaryPage, String> {
            Ok(SecondaryPage::default())
        }
        fn parse_release_page(&self, _html: &str) -> Result<SecondaryPage, String> {
            Ok(SecondaryPage::default())
        }
        fn parse_top_releases(&self, html: &str) -> Option<Vec<TopRelease>> {
            html.contains("top-albums-section").then(|| {
                vec![TopRelease {
                    index: 1,
                    scrobbles: 42,
                    artist: "Nirvana".to_string(),
                    title: "Nevermind".to_string(),
                }]
            })
        }
    }

    fn response(status: u16, body: Option<&str>) -> PageResponse {
        PageResponse {
            status,
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn test_lastfm_urlencode() {
        assert_eq!(lastfm_urlencode("AC/DC"), "AC%2FDC");
        assert_eq!(lastfm_urlencode("Sharp #9"), "Sharp %239");
        assert_eq!(lastfm_urlencode("Who?"), "Who%3F");
        assert_eq!(lastfm_urlencode(" Nirvana "), "Nirvana");
    }

    #[test]
    fn test_page_urls() {
        assert_eq!(artist_page_url("https://www.last.fm", "AC/DC"), "https://www.last.fm/music/AC%2FDC");
        assert_eq!(
            release_page_url("https://www.last.fm", "Nirvana", "Nevermind"),
            "https://www.last.fm/music/Nirvana/Nevermind"
        );
        assert_eq!(
            top_releases_page_url("https://www.last.fm", "alice", 3),
            "https://www.last.fm/user/alice/library/albums?page=3"
        );
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count(" 12 "), Some(12));
        assert_eq!(parse_count(""), Some(0));
        assert_eq!(parse_count("lots"), None);
    }

    #[test]
    fn test_entity_page_outcome() {
        assert_eq!(entity_page_outcome(response(200, Some("<html>"))), Fetch::Found("<html>".to_string()));
        assert_eq!(entity_page_outcome(response(404, None)), Fetch::NotFound);
        assert!(matches!(entity_page_outcome(response(500, None)), Fetch::ProtocolError(_)));
        assert!(matches!(entity_page_outcome(response(302, None)), Fetch::ProtocolError(_)));
    }

    #[test]
    fn test_top_releases_page_outcome() {
        let parser = ChartParser;
        assert_eq!(top_releases_page_outcome(response(302, None), &parser), TopReleasesPage::NoMorePages);
        assert_eq!(top_releases_page_outcome(response(503, None), &parser), TopReleasesPage::UnexpectedStatus(503));
        assert_eq!(
            top_releases_page_outcome(response(200, Some("<div>nothing</div>")), &parser),
            TopReleasesPage::MissingSection
        );
        match top_releases_page_outcome(response(200, Some("<section id=top-albums-section>")), &parser) {
            TopReleasesPage::Rows(rows) => assert_eq!(rows[0].scrobbles, 42),
            other => panic!("expected rows, got {other:?}"),
        }
    }
}
