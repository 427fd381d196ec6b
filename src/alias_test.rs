use crate::alias::*;
use crate::cache::{CacheStore, NoCache, SqliteCache};
use crate::common::Release;
use crate::testing::*;

fn release(artist: &str, name: &str) -> Release {
    Release {
        artist_name: artist.to_string(),
        name: name.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_resolve_without_alias() {
    let resolved = resolve_artist(&NoCache, "  Nirvana ");
    assert_eq!(resolved.requested, "Nirvana");
    assert_eq!(resolved.lookup, "Nirvana");
    assert!(!resolved.was_aliased());
}

#[test]
fn test_resolve_single_hop() {
    let (c, _temp_dir) = config();
    let store = SqliteCache::open(&c).unwrap();
    store.upsert_artist_alias("Beatles", "The Beatles").unwrap();
    store.upsert_artist_alias("The Beatles", "The Beatles (band)").unwrap();

    let resolved = resolve_artist(&store, "beatles");
    assert_eq!(resolved.requested, "beatles");
    assert_eq!(resolved.lookup, "The Beatles");
    assert!(resolved.was_aliased());
}

#[test]
fn test_resolve_release_is_scoped_by_artist() {
    let (c, _temp_dir) = config();
    let store = SqliteCache::open(&c).unwrap();
    store.upsert_release_alias("Nirvana", "Unplugged", "MTV Unplugged in New York").unwrap();

    assert_eq!(resolve_release(&store, "nirvana", "unplugged").lookup, "MTV Unplugged in New York");
    assert_eq!(resolve_release(&store, "Alice in Chains", "Unplugged").lookup, "Unplugged");
}

#[test]
fn test_alias_needed() {
    assert!(!alias_needed("nirvana", "Nirvana"));
    assert!(!alias_needed(" Nirvana ", "Nirvana"));
    assert!(alias_needed("Beatles", "The Beatles"));
}

#[test]
fn test_record_artist_alias() {
    let (c, _temp_dir) = config();
    let store = SqliteCache::open(&c).unwrap();

    assert!(!record_artist_alias(&store, "the beatles", "The Beatles").unwrap());
    assert_eq!(store.get_artist_alias("the beatles"), None);

    assert!(record_artist_alias(&store, " Beatles ", "The Beatles").unwrap());
    assert_eq!(store.get_artist_alias("beatles"), Some("The Beatles".to_string()));
}

#[test]
fn test_record_release_alias() {
    let (c, _temp_dir) = config();
    let store = SqliteCache::open(&c).unwrap();

    assert!(record_release_alias(&store, "nirvana", "Unplugged", &release("Nirvana", "MTV Unplugged in New York")).unwrap());
    assert_eq!(
        store.get_release_alias("Nirvana", "unplugged"),
        Some("MTV Unplugged in New York".to_string())
    );

    // Case-only differences in the release name are not aliases.
    assert!(!record_release_alias(&store, "Nirvana", "nevermind", &release("Nirvana", "Nevermind")).unwrap());
    // A renamed artist suppresses the release alias entirely.
    assert!(!record_release_alias(&store, "Beatles", "Abbey Rd", &release("The Beatles", "Abbey Road")).unwrap());
    assert_eq!(store.get_release_alias("The Beatles", "Abbey Rd"), None);
}
