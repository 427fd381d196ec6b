/// The cache module encapsulates the read cache: resolved artists and releases, name aliases,
/// not-found markers and per-user top release charts, each stamped with the time it was fetched.
///
/// The SQLite database is only a cache. It is never the source of truth for any of its data, so
/// on schema change it is simply thrown away and recreated.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::common::{fold_name, Artist, Release, ReleaseDate, TopRelease, Track, VERSION};
use crate::config::Config;
use crate::error::Result;
use crate::tags::TagList;

static CACHE_SCHEMA: &str = include_str!("cache.sql");

/// A cached value together with the time it was fetched from its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub fetched: DateTime<Utc>,
    pub value: T,
}

/// Storage for resolved entities. Names are compared case-insensitively everywhere.
///
/// Reads never fail: anything that can't be read is reported as absent. Writes are durable once they
/// return, and each write is a single atomic unit.
pub trait CacheStore: Send + Sync {
    fn get_artist(&self, name: &str) -> Option<Cached<Artist>>;
    fn get_release(&self, artist: &str, release: &str) -> Option<Cached<Release>>;
    fn get_negative_artist(&self, name: &str) -> Option<DateTime<Utc>>;
    fn get_negative_release(&self, artist: &str, release: &str) -> Option<DateTime<Utc>>;
    fn get_artist_alias(&self, name: &str) -> Option<String>;
    fn get_release_alias(&self, artist: &str, release: &str) -> Option<String>;
    fn get_top_releases(&self, username: &str) -> Option<Cached<Vec<TopRelease>>>;

    /// Replaces the artist's scalar fields and its whole tag list.
    fn upsert_artist(&self, artist: &Artist, fetched: DateTime<Utc>) -> Result<()>;
    /// Replaces the release's scalar fields, its whole tag list and its whole track list.
    fn upsert_release(&self, release: &Release, fetched: DateTime<Utc>) -> Result<()>;
    fn upsert_negative_artist(&self, name: &str, fetched: DateTime<Utc>) -> Result<()>;
    fn upsert_negative_release(&self, artist: &str, release: &str, fetched: DateTime<Utc>) -> Result<()>;
    fn upsert_artist_alias(&self, src_name: &str, dest_name: &str) -> Result<()>;
    fn upsert_release_alias(&self, artist: &str, src_name: &str, dest_name: &str) -> Result<()>;
    /// Deletes every row for `username` and inserts `releases` in one transaction.
    fn replace_top_releases(&self, username: &str, releases: &[TopRelease], fetched: DateTime<Utc>) -> Result<()>;
}

/// Open the cache store described by the config. A disabled cache yields a store that remembers
/// nothing.
pub fn open_cache_store(c: &Config) -> Result<Box<dyn CacheStore>> {
    if !c.cache_enabled {
        info!("cache disabled, all lookups will go to the sources");
        return Ok(Box::new(NoCache));
    }
    Ok(Box::new(SqliteCache::open(c)?))
}

/// Connect to the SQLite database with appropriate settings
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 15000;
        ",
    )?;
    Ok(conn)
}

/// "Migrate" the database. If the schema in the database does not match the compiled-in schema, then
/// nuke the database and recreate it from scratch. Otherwise, no op.
pub fn maybe_invalidate_cache_database(db_path: &Path) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_SCHEMA.as_bytes());
    let schema_hash = format!("{:x}", hasher.finalize());

    if db_path.exists() {
        let conn = connect(db_path)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT * FROM sqlite_master
                WHERE type = 'table' AND name = '_schema_hash'
            )",
            [],
            |row| row.get(0),
        )?;

        if exists {
            let result: Option<(String, String)> = conn
                .query_row("SELECT schema_hash, version FROM _schema_hash", [], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            if let Some((db_schema_hash, db_version)) = result {
                if db_schema_hash == schema_hash && db_version == VERSION {
                    return Ok(());
                }
            }
        }
    }

    if db_path.exists() {
        info!("cache schema changed, recreating {}", db_path.display());
        fs::remove_file(db_path)?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
    }

    let conn = connect(db_path)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    conn.execute_batch(
        "
        CREATE TABLE _schema_hash (
            schema_hash TEXT
          , version TEXT
          , PRIMARY KEY (schema_hash, version)
        )
        ",
    )?;
    conn.execute("INSERT INTO _schema_hash (schema_hash, version) VALUES (?1, ?2)", params![schema_hash, VERSION])?;
    Ok(())
}

/// A cache that stores nothing and never has anything. Lets the engine run without persistence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn get_artist(&self, _name: &str) -> Option<Cached<Artist>> {
        None
    }
    fn get_release(&self, _artist: &str, _release: &str) -> Option<Cached<Release>> {
        None
    }
    fn get_negative_artist(&self, _name: &str) -> Option<DateTime<Utc>> {
        None
    }
    fn get_negative_release(&self, _artist: &str, _release: &str) -> Option<DateTime<Utc>> {
        None
    }
    fn get_artist_alias(&self, _name: &str) -> Option<String> {
        None
    }
    fn get_release_alias(&self, _artist: &str, _release: &str) -> Option<String> {
        None
    }
    fn get_top_releases(&self, _username: &str) -> Option<Cached<Vec<TopRelease>>> {
        None
    }
    fn upsert_artist(&self, _artist: &Artist, _fetched: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
    fn upsert_release(&self, _release: &Release, _fetched: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
    fn upsert_negative_artist(&self, _name: &str, _fetched: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
    fn upsert_negative_release(&self, _artist: &str, _release: &str, _fetched: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
    fn upsert_artist_alias(&self, _src_name: &str, _dest_name: &str) -> Result<()> {
        Ok(())
    }
    fn upsert_release_alias(&self, _artist: &str, _src_name: &str, _dest_name: &str) -> Result<()> {
        Ok(())
    }
    fn replace_top_releases(&self, _username: &str, _releases: &[TopRelease], _fetched: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// The SQLite-backed cache. A fresh connection is opened per operation, so one `SqliteCache` can be
/// shared between threads; SQLite's own locking serializes the writers.
#[derive(Debug, Clone)]
pub struct SqliteCache {
    db_path: PathBuf,
}

impl SqliteCache {
    pub fn open(c: &Config) -> Result<Self> {
        fs::create_dir_all(&c.cache_dir)?;
        let db_path = c.cache_database_path();
        maybe_invalidate_cache_database(&db_path)?;
        debug!("opened cache database at {}", db_path.display());
        Ok(Self { db_path })
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    /// The parent row and its tags are read inside one transaction so they come from the same
    /// snapshot as a concurrent upsert.
    fn read_artist(&self, name: &str) -> Result<Option<Cached<Artist>>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let key = fold_name(name);
        let row = tx
            .query_row(
                "SELECT name, fetched, listener_count, play_count, cover_image, biography FROM artists WHERE name_key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, fetched, listener_count, play_count, cover_image, biography)) = row else {
            return Ok(None);
        };

        let mut stmt = tx.prepare("SELECT tag, score FROM artist_tags WHERE artist_key = ?1 ORDER BY position")?;
        let tags = stmt
            .query_map(params![key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<TagList, _>>()?;

        Ok(Some(Cached {
            fetched: from_unix_millis(fetched),
            value: Artist {
                name,
                listener_count: to_count(listener_count),
                play_count: to_count(play_count),
                cover_image,
                biography,
                tags,
            },
        }))
    }

    fn read_release(&self, artist: &str, release: &str) -> Result<Option<Cached<Release>>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let artist_key = fold_name(artist);
        let release_key = fold_name(release);
        let row = tx
            .query_row(
                "SELECT artist_name, name, release_date, fetched, listener_count, play_count, cover_image
                 FROM releases WHERE artist_key = ?1 AND release_key = ?2",
                params![artist_key, release_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((artist_name, name, release_date, fetched, listener_count, play_count, cover_image)) = row else {
            return Ok(None);
        };

        let mut stmt = tx.prepare(
            "SELECT tag, score FROM release_tags WHERE artist_key = ?1 AND release_key = ?2 ORDER BY position",
        )?;
        let tags = stmt
            .query_map(params![artist_key, release_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<TagList, _>>()?;

        let mut value = Release {
            artist_name,
            name,
            release_date: release_date.as_deref().and_then(ReleaseDate::parse),
            listener_count: to_count(listener_count),
            play_count: to_count(play_count),
            cover_image,
            tags,
            ..Default::default()
        };

        let mut stmt = tx.prepare(
            "SELECT track_number, track_name, track_artist, listener_count FROM release_tracks
             WHERE artist_key = ?1 AND release_key = ?2 ORDER BY track_number",
        )?;
        let tracks = stmt.query_map(params![artist_key, release_key], |row| {
            Ok(Track {
                number: row.get(0)?,
                name: row.get(1)?,
                artist: row.get(2)?,
                listener_count: to_count(row.get(3)?),
            })
        })?;
        for track in tracks {
            value.insert_track(track?);
        }

        Ok(Some(Cached {
            fetched: from_unix_millis(fetched),
            value,
        }))
    }

    fn read_negative_artist(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.connect()?;
        let fetched: Option<i64> = conn
            .query_row("SELECT fetched FROM not_found_artists WHERE name_key = ?1", params![fold_name(name)], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(fetched.map(from_unix_millis))
    }

    fn read_negative_release(&self, artist: &str, release: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.connect()?;
        let fetched: Option<i64> = conn
            .query_row(
                "SELECT fetched FROM not_found_releases WHERE artist_key = ?1 AND release_key = ?2",
                params![fold_name(artist), fold_name(release)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fetched.map(from_unix_millis))
    }

    fn read_artist_alias(&self, name: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row("SELECT dest_name FROM artist_aliases WHERE src_key = ?1", params![fold_name(name)], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn read_release_alias(&self, artist: &str, release: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                "SELECT dest_name FROM release_aliases WHERE artist_key = ?1 AND src_key = ?2",
                params![fold_name(artist), fold_name(release)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn read_top_releases(&self, username: &str) -> Result<Option<Cached<Vec<TopRelease>>>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT idx, scrobbles, artist, title, fetched FROM top_user_releases WHERE username_key = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![fold_name(username)], |row| {
                Ok((
                    TopRelease {
                        index: row.get(0)?,
                        scrobbles: to_count(row.get(1)?),
                        artist: row.get(2)?,
                        title: row.get(3)?,
                    },
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Rows are always written together, but take the oldest stamp in case a writer was interrupted.
        let Some(fetched) = rows.iter().map(|(_, fetched)| *fetched).min() else {
            return Ok(None);
        };
        Ok(Some(Cached {
            fetched: from_unix_millis(fetched),
            value: rows.into_iter().map(|(release, _)| release).collect(),
        }))
    }
}

impl CacheStore for SqliteCache {
    fn get_artist(&self, name: &str) -> Option<Cached<Artist>> {
        absent_on_error("artist", self.read_artist(name))
    }

    fn get_release(&self, artist: &str, release: &str) -> Option<Cached<Release>> {
        absent_on_error("release", self.read_release(artist, release))
    }

    fn get_negative_artist(&self, name: &str) -> Option<DateTime<Utc>> {
        absent_on_error("not-found artist", self.read_negative_artist(name))
    }

    fn get_negative_release(&self, artist: &str, release: &str) -> Option<DateTime<Utc>> {
        absent_on_error("not-found release", self.read_negative_release(artist, release))
    }

    fn get_artist_alias(&self, name: &str) -> Option<String> {
        absent_on_error("artist alias", self.read_artist_alias(name))
    }

    fn get_release_alias(&self, artist: &str, release: &str) -> Option<String> {
        absent_on_error("release alias", self.read_release_alias(artist, release))
    }

    fn get_top_releases(&self, username: &str) -> Option<Cached<Vec<TopRelease>>> {
        absent_on_error("top releases", self.read_top_releases(username))
    }

    fn upsert_artist(&self, artist: &Artist, fetched: DateTime<Utc>) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let key = fold_name(&artist.name);
        tx.execute(
            "INSERT INTO artists (name_key, name, fetched, listener_count, play_count, cover_image, biography)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (name_key) DO UPDATE SET
                 name = excluded.name
               , fetched = excluded.fetched
               , listener_count = excluded.listener_count
               , play_count = excluded.play_count
               , cover_image = excluded.cover_image
               , biography = excluded.biography",
            params![
                key,
                artist.name,
                fetched.timestamp_millis(),
                from_count(artist.listener_count),
                from_count(artist.play_count),
                artist.cover_image,
                artist.biography,
            ],
        )?;
        tx.execute("DELETE FROM artist_tags WHERE artist_key = ?1", params![key])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO artist_tags (artist_key, tag, score, position) VALUES (?1, ?2, ?3, ?4)")?;
            for (position, (tag, score)) in artist.tags.iter().enumerate() {
                stmt.execute(params![key, tag, score, position as i64])?;
            }
        }
        tx.commit()?;
        debug!("cached artist {} with {} tags", artist.name, artist.tags.len());
        Ok(())
    }

    fn upsert_release(&self, release: &Release, fetched: DateTime<Utc>) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let artist_key = fold_name(&release.artist_name);
        let release_key = fold_name(&release.name);
        tx.execute(
            "INSERT INTO releases
                 (artist_key, release_key, artist_name, name, release_date, fetched, listener_count, play_count, cover_image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (artist_key, release_key) DO UPDATE SET
                 artist_name = excluded.artist_name
               , name = excluded.name
               , release_date = excluded.release_date
               , fetched = excluded.fetched
               , listener_count = excluded.listener_count
               , play_count = excluded.play_count
               , cover_image = excluded.cover_image",
            params![
                artist_key,
                release_key,
                release.artist_name,
                release.name,
                release.release_date.map(|d| d.to_string()),
                fetched.timestamp_millis(),
                from_count(release.listener_count),
                from_count(release.play_count),
                release.cover_image,
            ],
        )?;
        tx.execute(
            "DELETE FROM release_tags WHERE artist_key = ?1 AND release_key = ?2",
            params![artist_key, release_key],
        )?;
        tx.execute(
            "DELETE FROM release_tracks WHERE artist_key = ?1 AND release_key = ?2",
            params![artist_key, release_key],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO release_tags (artist_key, release_key, tag, score, position) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, (tag, score)) in release.tags.iter().enumerate() {
                stmt.execute(params![artist_key, release_key, tag, score, position as i64])?;
            }
            let mut stmt = tx.prepare(
                "INSERT INTO release_tracks (artist_key, release_key, track_number, track_name, track_artist, listener_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for track in release.tracks.values() {
                stmt.execute(params![
                    artist_key,
                    release_key,
                    track.number,
                    track.name,
                    track.artist,
                    from_count(track.listener_count),
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            "cached release {} - {} with {} tags and {} tracks",
            release.artist_name,
            release.name,
            release.tags.len(),
            release.tracks.len()
        );
        Ok(())
    }

    fn upsert_negative_artist(&self, name: &str, fetched: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO not_found_artists (name_key, name, fetched) VALUES (?1, ?2, ?3)
             ON CONFLICT (name_key) DO UPDATE SET fetched = excluded.fetched",
            params![fold_name(name), name.trim(), fetched.timestamp_millis()],
        )?;
        Ok(())
    }

    fn upsert_negative_release(&self, artist: &str, release: &str, fetched: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO not_found_releases (artist_key, release_key, artist_name, release_name, fetched)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (artist_key, release_key) DO UPDATE SET fetched = excluded.fetched",
            params![fold_name(artist), fold_name(release), artist.trim(), release.trim(), fetched.timestamp_millis()],
        )?;
        Ok(())
    }

    fn upsert_artist_alias(&self, src_name: &str, dest_name: &str) -> Result<()> {
        if src_name.trim() == dest_name.trim() {
            return Ok(());
        }
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO artist_aliases (src_key, src_name, dest_name) VALUES (?1, ?2, ?3)
             ON CONFLICT (src_key) DO UPDATE SET src_name = excluded.src_name, dest_name = excluded.dest_name",
            params![fold_name(src_name), src_name.trim(), dest_name],
        )?;
        Ok(())
    }

    fn upsert_release_alias(&self, artist: &str, src_name: &str, dest_name: &str) -> Result<()> {
        if src_name.trim() == dest_name.trim() {
            return Ok(());
        }
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO release_aliases (artist_key, src_key, src_name, dest_name) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (artist_key, src_key) DO UPDATE SET src_name = excluded.src_name, dest_name = excluded.dest_name",
            params![fold_name(artist), fold_name(src_name), src_name.trim(), dest_name],
        )?;
        Ok(())
    }

    fn replace_top_releases(&self, username: &str, releases: &[TopRelease], fetched: DateTime<Utc>) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let key = fold_name(username);
        tx.execute("DELETE FROM top_user_releases WHERE username_key = ?1", params![key])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO top_user_releases (username_key, username, idx, fetched, scrobbles, artist, title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for release in releases {
                stmt.execute(params![
                    key,
                    username.trim(),
                    release.index,
                    fetched.timestamp_millis(),
                    from_count(release.scrobbles),
                    release.artist,
                    release.title,
                ])?;
            }
        }
        tx.commit()?;
        debug!("cached {} top releases for {}", releases.len(), username);
        Ok(())
    }
}

fn absent_on_error<T>(what: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("failed to read cached {what}, treating it as absent: {e}");
            None
        }
    }
}

fn from_unix_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn from_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
