//! Name aliases: remembered divergences between the name a caller asked for and the canonical name a
//! source answered with. Resolution is a single hop; aliases are never chained at read time.

use tracing::debug;

use crate::cache::CacheStore;
use crate::common::{fold_name, names_match, Release};
use crate::error::Result;

/// The outcome of alias resolution. `lookup` is used for every subsequent cache read, source fetch
/// and negative entry. `requested` is kept only to decide whether a new alias must be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub requested: String,
    pub lookup: String,
}

impl ResolvedName {
    pub fn was_aliased(&self) -> bool {
        self.requested != self.lookup
    }
}

pub fn resolve_artist(store: &dyn CacheStore, requested: &str) -> ResolvedName {
    let requested = requested.trim().to_string();
    match store.get_artist_alias(&requested) {
        Some(canonical) => {
            debug!("artist alias hit: {requested} -> {canonical}");
            ResolvedName { requested, lookup: canonical }
        }
        None => ResolvedName {
            lookup: requested.clone(),
            requested,
        },
    }
}

/// Release aliases are scoped by the artist name as requested.
pub fn resolve_release(store: &dyn CacheStore, artist: &str, requested: &str) -> ResolvedName {
    let requested = requested.trim().to_string();
    match store.get_release_alias(artist.trim(), &requested) {
        Some(canonical) => {
            debug!("release alias hit: {artist} - {requested} -> {canonical}");
            ResolvedName { requested, lookup: canonical }
        }
        None => ResolvedName {
            lookup: requested.clone(),
            requested,
        },
    }
}

/// An alias is only worth recording when the names differ after trimming and case folding.
pub fn alias_needed(requested: &str, canonical: &str) -> bool {
    fold_name(requested) != fold_name(canonical)
}

/// Records `requested -> canonical` for an artist if they differ. Returns whether an alias was written.
pub fn record_artist_alias(store: &dyn CacheStore, requested: &str, canonical: &str) -> Result<bool> {
    if !alias_needed(requested, canonical) {
        return Ok(false);
    }
    debug!("recording artist alias {} -> {}", requested.trim(), canonical);
    store.upsert_artist_alias(requested.trim(), canonical)?;
    Ok(true)
}

/// Records a release alias under the canonical artist. Nothing is recorded when the artist itself
/// was renamed by the source, since a release alias must never silently change the artist.
pub fn record_release_alias(
    store: &dyn CacheStore,
    requested_artist: &str,
    requested_release: &str,
    release: &Release,
) -> Result<bool> {
    if !names_match(requested_artist, &release.artist_name) || !alias_needed(requested_release, &release.name) {
        return Ok(false);
    }
    debug!(
        "recording release alias {} - {} -> {}",
        release.artist_name,
        requested_release.trim(),
        release.name
    );
    store.upsert_release_alias(&release.artist_name, requested_release.trim(), &release.name)?;
    Ok(true)
}
