// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The persistent track catalog.
//!
//! A single SQLite database holds every indexed track, the registered
//! sources and a trigram full-text index. All writes for one logical
//! operation (a source scan, an incremental upsert batch) commit in a
//! single transaction.

mod scan;

pub use scan::ScanOutcome;

use crate::track::FileInfo;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Schema applied on open. The `search` table shadows the display columns
/// unindexed so hits can be rendered without a join.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    added_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    mtime INTEGER NOT NULL,
    artist TEXT NOT NULL,
    album_artist TEXT NOT NULL DEFAULT '',
    album TEXT NOT NULL,
    title TEXT NOT NULL,
    disc_number INTEGER NOT NULL DEFAULT 0,
    track_number INTEGER NOT NULL DEFAULT 0,
    year INTEGER NOT NULL DEFAULT 0,
    genre TEXT NOT NULL DEFAULT '',
    original_date TEXT NOT NULL DEFAULT '',
    release_date TEXT NOT NULL DEFAULT '',
    label TEXT NOT NULL DEFAULT '',
    added_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tracks_artist_album ON tracks(artist, album);
CREATE VIRTUAL TABLE IF NOT EXISTS search USING fts5(
    content,
    result_type UNINDEXED,
    artist UNINDEXED,
    album UNINDEXED,
    title UNINDEXED,
    track_id UNINDEXED,
    tokenize = 'trigram'
);
";

/// A registered scan source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Row ID.
    pub id: i64,
    /// Directory path; unique among sources.
    pub path: PathBuf,
    /// When the source was registered.
    pub added_at: DateTime<Utc>,
}

/// A denormalized track row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    /// Row ID.
    pub id: i64,
    /// File path; the natural key across scans.
    pub path: PathBuf,
    /// Filesystem modification time (Unix seconds) at index time.
    pub mtime: i64,
    /// Track artist (never empty; falls back to "Unknown").
    pub artist: String,
    /// Album artist, may be empty.
    pub album_artist: String,
    /// Album title (never empty; falls back to "Unknown").
    pub album: String,
    /// Track title (never empty; falls back to the file stem).
    pub title: String,
    /// Disc number, 0 when unknown.
    pub disc_number: u32,
    /// Track number, 0 when unknown.
    pub track_number: u32,
    /// Release year, 0 when unknown.
    pub year: u32,
    /// Genre, may be empty.
    pub genre: String,
    /// Original release date, may be empty.
    pub original_date: String,
    /// Release date, may be empty.
    pub release_date: String,
    /// Record label, may be empty.
    pub label: String,
}

/// An album of one artist, as returned by [`Catalog::albums`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumEntry {
    /// Album title.
    pub name: String,
    /// Release year, 0 when unknown.
    pub year: u32,
}

/// Kind of a full-text search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResultType {
    /// An artist name matched.
    Artist,
    /// An album title matched.
    Album,
    /// A track matched.
    Track,
}

impl SearchResultType {
    /// Database representation.
    fn as_str(self) -> &'static str {
        match self {
            SearchResultType::Artist => "artist",
            SearchResultType::Album => "album",
            SearchResultType::Track => "track",
        }
    }

    /// Parse the database representation.
    fn from_str(value: &str) -> Option<Self> {
        match value {
            "artist" => Some(SearchResultType::Artist),
            "album" => Some(SearchResultType::Album),
            "track" => Some(SearchResultType::Track),
            _ => None,
        }
    }
}

/// A full-text search hit with its display attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// What kind of entity matched.
    pub result_type: SearchResultType,
    /// Artist name.
    pub artist: String,
    /// Album title (empty for artist hits).
    pub album: String,
    /// Track title (empty for artist and album hits).
    pub title: String,
    /// Row ID of the track for track hits.
    pub track_id: Option<i64>,
}

/// The persistent store of tracks and sources.
pub struct Catalog {
    /// Database connection. SQLite serializes statements; the mutex makes
    /// the catalog shareable between tasks.
    conn: Mutex<Connection>,
    /// Per-source scan locks; scans of distinct sources run in parallel,
    /// the same source is serialized.
    scan_locks: tokio::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    /// Open (or create) the catalog database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory catalog, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Apply the schema and wrap the connection.
    fn from_connection(conn: Connection) -> crate::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            scan_locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` with the locked connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let mut conn = self.conn.lock().expect("catalog connection poisoned");
        f(&mut conn)
    }

    /// Acquire the scan lock for a source.
    pub(crate) async fn scan_lock(&self, source: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.scan_locks.lock().await;
        locks
            .entry(source.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Register a directory as a scan source.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is already registered or the database
    /// write fails.
    pub fn add_source(&self, path: &Path) -> crate::Result<()> {
        self.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO sources (path, added_at) VALUES (?1, ?2)",
                params![path_to_db(path), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Remove a registered source.
    ///
    /// Its track rows stay behind until the next scan of a source that
    /// covers them; removal only unregisters the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn remove_source(&self, path: &Path) -> crate::Result<()> {
        self.with_conn(|conn| {
            let _ = conn.execute(
                "DELETE FROM sources WHERE path = ?1",
                params![path_to_db(path)],
            )?;
            Ok(())
        })
    }

    /// All registered sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sources(&self) -> crate::Result<Vec<Source>> {
        self.with_conn(|conn| {
            let mut statement =
                conn.prepare("SELECT id, path, added_at FROM sources ORDER BY path")?;
            let sources = statement
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .filter_map(std::result::Result::ok)
                .map(|(id, path, added_at)| Source {
                    id,
                    path: PathBuf::from(path),
                    added_at: added_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                })
                .collect();
            Ok(sources)
        })
    }

    /// The source a path belongs to: the one with the longest path prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the source query fails.
    pub fn source_for_path(&self, path: &Path) -> crate::Result<Option<Source>> {
        let mut best: Option<Source> = None;
        for source in self.sources()? {
            if path.starts_with(&source.path) {
                let is_longer = best
                    .as_ref()
                    .is_none_or(|current| {
                        source.path.as_os_str().len() > current.path.as_os_str().len()
                    });
                if is_longer {
                    best = Some(source);
                }
            }
        }
        Ok(best)
    }

    /// Incrementally index the given paths.
    ///
    /// Equivalent to the added/updated arm of a scan without the directory
    /// walk: each file is read, upserted by path and its search rows
    /// refreshed. Per-file read failures skip that file. All writes commit
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn upsert_many(&self, paths: &[PathBuf]) -> crate::Result<usize> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match crate::tag::read_file_info(path) {
                Ok(info) => {
                    let mtime = file_mtime(path)?;
                    files.push((info, mtime));
                }
                Err(err) => {
                    log::warn!("Skipping {}: {}", path.display(), err);
                }
            }
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (info, mtime) in &files {
                upsert_track(&tx, info, *mtime)?;
            }
            collect_search_garbage(&tx)?;
            tx.commit()?;
            Ok(files.len())
        })
    }

    /// Distinct artists, case-aware, sorted by a language-neutral
    /// lowercasing rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn artists(&self) -> crate::Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare("SELECT DISTINCT artist FROM tracks")?;
            let mut artists: Vec<String> = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(std::result::Result::ok)
                .collect();
            artists.sort_by_key(|artist| artist.to_lowercase());
            Ok(artists)
        })
    }

    /// Albums of one artist, sorted by year ascending (unknown years last),
    /// then name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn albums(&self, artist: &str) -> crate::Result<Vec<AlbumEntry>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT album, COALESCE(MIN(CASE WHEN year > 0 THEN year END), 0)
                 FROM tracks WHERE artist = ?1 GROUP BY album",
            )?;
            let mut albums: Vec<AlbumEntry> = statement
                .query_map(params![artist], |row| {
                    Ok(AlbumEntry {
                        name: row.get(0)?,
                        year: row.get(1)?,
                    })
                })?
                .filter_map(std::result::Result::ok)
                .collect();
            albums.sort_by(|a, b| {
                (a.year == 0, a.year, &a.name).cmp(&(b.year == 0, b.year, &b.name))
            });
            Ok(albums)
        })
    }

    /// Tracks of one album, sorted by disc, track number and title.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tracks(&self, artist: &str, album: &str) -> crate::Result<Vec<CatalogTrack>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT id, path, mtime, artist, album_artist, album, title,
                        disc_number, track_number, year, genre, original_date,
                        release_date, label
                 FROM tracks WHERE artist = ?1 AND album = ?2
                 ORDER BY disc_number, track_number, title",
            )?;
            let tracks = statement
                .query_map(params![artist, album], row_to_track)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(tracks)
        })
    }

    /// Look up a single track by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn track_by_path(&self, path: &Path) -> crate::Result<Option<CatalogTrack>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT id, path, mtime, artist, album_artist, album, title,
                        disc_number, track_number, year, genre, original_date,
                        release_date, label
                 FROM tracks WHERE path = ?1",
            )?;
            let mut rows = statement
                .query_map(params![path_to_db(path)], row_to_track)?
                .filter_map(std::result::Result::ok);
            Ok(rows.next())
        })
    }

    /// Full-text search over artists, albums and tracks.
    ///
    /// The query string is opaque to callers; the catalog quotes it for the
    /// trigram tokenizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search(&self, query: &str) -> crate::Result<Vec<SearchHit>> {
        let quoted = format!("\"{}\"", query.replace('"', "\"\""));
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT result_type, artist, album, title, track_id
                 FROM search WHERE search MATCH ?1 ORDER BY rank",
            )?;
            let hits = statement
                .query_map(params![quoted], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                })?
                .filter_map(std::result::Result::ok)
                .filter_map(|(result_type, artist, album, title, track_id)| {
                    SearchResultType::from_str(&result_type).map(|result_type| SearchHit {
                        result_type,
                        artist,
                        album,
                        title,
                        track_id,
                    })
                })
                .collect();
            Ok(hits)
        })
    }
}

/// Database representation of a path.
fn path_to_db(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Filesystem modification time as Unix seconds.
pub(crate) fn file_mtime(path: &Path) -> crate::Result<i64> {
    let modified = std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|err| crate::Error::io(path, err))?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(0)))
}

/// Map a statement row to a [`CatalogTrack`].
fn row_to_track(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogTrack> {
    Ok(CatalogTrack {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        mtime: row.get(2)?,
        artist: row.get(3)?,
        album_artist: row.get(4)?,
        album: row.get(5)?,
        title: row.get(6)?,
        disc_number: row.get(7)?,
        track_number: row.get(8)?,
        year: row.get(9)?,
        genre: row.get(10)?,
        original_date: row.get(11)?,
        release_date: row.get(12)?,
        label: row.get(13)?,
    })
}

/// Display values for a row, with the documented fallbacks: artist and
/// album fall back to "Unknown", the title to the file stem.
fn row_fallbacks(info: &FileInfo) -> (String, String, String) {
    let artist = [&info.tags.artist, &info.tags.album_artist]
        .into_iter()
        .find(|value| !value.is_empty())
        .map_or_else(|| "Unknown".to_string(), Clone::clone);
    let album = if info.tags.album.is_empty() {
        "Unknown".to_string()
    } else {
        info.tags.album.clone()
    };
    let title = if info.tags.title.is_empty() {
        info.path
            .file_stem()
            .and_then(std::ffi::OsStr::to_str)
            .map_or_else(|| "Unknown".to_string(), ToString::to_string)
    } else {
        info.tags.title.clone()
    };
    (artist, album, title)
}

/// Upsert one track row by path and refresh its search rows.
pub(crate) fn upsert_track(
    tx: &Transaction<'_>,
    info: &FileInfo,
    mtime: i64,
) -> crate::Result<()> {
    let (artist, album, title) = row_fallbacks(info);
    let now = Utc::now().to_rfc3339();
    let _ = tx.execute(
        "INSERT INTO tracks (path, mtime, artist, album_artist, album, title,
                             disc_number, track_number, year, genre,
                             original_date, release_date, label, added_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(path) DO UPDATE SET
             mtime = excluded.mtime,
             artist = excluded.artist,
             album_artist = excluded.album_artist,
             album = excluded.album,
             title = excluded.title,
             disc_number = excluded.disc_number,
             track_number = excluded.track_number,
             year = excluded.year,
             genre = excluded.genre,
             original_date = excluded.original_date,
             release_date = excluded.release_date,
             label = excluded.label,
             updated_at = excluded.updated_at",
        params![
            path_to_db(&info.path),
            mtime,
            artist,
            info.tags.album_artist,
            album,
            title,
            info.tags.disc_number,
            info.tags.track_number,
            info.tags.year(),
            info.tags.genre,
            info.tags.original_date,
            info.tags.date,
            info.tags.label,
            now,
        ],
    )?;
    let track_id: i64 = tx.query_row(
        "SELECT id FROM tracks WHERE path = ?1",
        params![path_to_db(&info.path)],
        |row| row.get(0),
    )?;

    // Refresh the track's search row and make sure artist and album rows
    // exist. Orphans are collected at the end of the transaction.
    let _ = tx.execute(
        "DELETE FROM search WHERE result_type = 'track' AND track_id = ?1",
        params![track_id],
    )?;
    let _ = tx.execute(
        "INSERT INTO search (content, result_type, artist, album, title, track_id)
         VALUES (?1, 'track', ?2, ?3, ?4, ?5)",
        params![
            format!("{artist} {album} {title}"),
            artist,
            album,
            title,
            track_id
        ],
    )?;
    let _ = tx.execute(
        "INSERT INTO search (content, result_type, artist, album, title, track_id)
         SELECT ?1, 'artist', ?1, '', '', NULL
         WHERE NOT EXISTS (
             SELECT 1 FROM search WHERE result_type = 'artist' AND artist = ?1
         )",
        params![artist],
    )?;
    let _ = tx.execute(
        "INSERT INTO search (content, result_type, artist, album, title, track_id)
         SELECT ?1 || ' ' || ?2, 'album', ?1, ?2, '', NULL
         WHERE NOT EXISTS (
             SELECT 1 FROM search
             WHERE result_type = 'album' AND artist = ?1 AND album = ?2
         )",
        params![artist, album],
    )?;
    Ok(())
}

/// Delete one track row and its track-type search row.
pub(crate) fn delete_track(tx: &Transaction<'_>, path: &Path) -> crate::Result<()> {
    let _ = tx.execute(
        "DELETE FROM search WHERE result_type = 'track' AND track_id IN (
             SELECT id FROM tracks WHERE path = ?1
         )",
        params![path_to_db(path)],
    )?;
    let _ = tx.execute(
        "DELETE FROM tracks WHERE path = ?1",
        params![path_to_db(path)],
    )?;
    Ok(())
}

/// Drop artist and album search rows that no longer have any tracks.
pub(crate) fn collect_search_garbage(tx: &Transaction<'_>) -> crate::Result<()> {
    let _ = tx.execute(
        "DELETE FROM search WHERE result_type = 'artist' AND artist NOT IN (
             SELECT DISTINCT artist FROM tracks
         )",
        [],
    )?;
    let _ = tx.execute(
        "DELETE FROM search WHERE result_type = 'album' AND NOT EXISTS (
             SELECT 1 FROM tracks
             WHERE tracks.artist = search.artist AND tracks.album = search.album
         )",
        [],
    )?;
    Ok(())
}
