// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Differential re-scanning of sources.

use super::{collect_search_garbage, delete_track, file_mtime, upsert_track, Catalog};
use crate::events::{ProgressEvent, ScanStats};
use crate::track::FileInfo;
use crate::util::walk_files;
use itertools::Itertools;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Result of scanning one source: the differential stats plus the number of
/// files that failed to read and were skipped.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// The differential scan statistics.
    pub stats: ScanStats,
    /// Files that were part of the differential but could not be read.
    pub skipped: usize,
}

impl Catalog {
    /// Scan one source directory and commit the differential.
    ///
    /// Computes `added` (observed but not indexed), `removed` (indexed but
    /// no longer observed) and `updated` (indexed with a newer filesystem
    /// mtime), reads the added and updated files, and commits all row
    /// changes in a single transaction. Per-file read failures skip that
    /// file; only transaction failures abort the scan.
    ///
    /// Scans of distinct sources may run concurrently; scans of the same
    /// source are serialized through a per-source lock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Canceled`] if the token fires, an I/O error
    /// if the source cannot be enumerated, or a database error if the
    /// commit fails.
    pub async fn scan_source(
        &self,
        source: &Path,
        events: Option<&Sender<ProgressEvent>>,
        ctx: &CancellationToken,
    ) -> crate::Result<ScanOutcome> {
        let lock = self.scan_lock(source).await;
        let _guard = lock.lock().await;
        log::info!("Starting scan of {}", source.display());

        let observed = observe_files(source)?;
        let indexed = self.indexed_under(source)?;

        let added: Vec<PathBuf> = observed
            .keys()
            .filter(|path| !indexed.contains_key(*path))
            .cloned()
            .sorted()
            .collect();
        let removed: Vec<PathBuf> = indexed
            .keys()
            .filter(|path| !observed.contains_key(*path))
            .cloned()
            .sorted()
            .collect();
        let updated: Vec<PathBuf> = observed
            .iter()
            .filter(|(path, mtime)| {
                indexed
                    .get(*path)
                    .is_some_and(|indexed_mtime| **mtime > *indexed_mtime)
            })
            .map(|(path, _)| path.clone())
            .sorted()
            .collect();

        // Read everything before touching the database so the transaction
        // stays short.
        let mut files: Vec<(FileInfo, i64)> = Vec::with_capacity(added.len() + updated.len());
        let mut skipped = 0;
        for (scanned, path) in added.iter().chain(updated.iter()).enumerate() {
            if ctx.is_cancelled() {
                return Err(crate::Error::Canceled);
            }
            match crate::tag::read_file_info(path) {
                Ok(info) => files.push((info, observed[path])),
                Err(err) => {
                    log::warn!("Failed to read {}: {}", path.display(), err);
                    skipped += 1;
                }
            }
            if let Some(events) = events {
                let _ = events
                    .send(ProgressEvent::ScanProgress {
                        source: source.to_path_buf(),
                        path: path.clone(),
                        scanned: scanned + 1,
                    })
                    .await;
            }
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (info, mtime) in &files {
                upsert_track(&tx, info, *mtime)?;
            }
            for path in &removed {
                delete_track(&tx, path)?;
            }
            collect_search_garbage(&tx)?;
            tx.commit()?;
            Ok(())
        })?;

        let stats = ScanStats {
            source: source.to_path_buf(),
            added,
            removed,
            updated,
        };
        log::info!(
            "Scan of {} complete: {} added, {} removed, {} updated, {} skipped",
            source.display(),
            stats.added.len(),
            stats.removed.len(),
            stats.updated.len(),
            skipped,
        );
        if let Some(events) = events {
            let _ = events.send(ProgressEvent::ScanComplete(stats.clone())).await;
        }
        Ok(ScanOutcome { stats, skipped })
    }

    /// Indexed paths under the source, with their stored mtimes.
    fn indexed_under(&self, source: &Path) -> crate::Result<HashMap<PathBuf, i64>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare("SELECT path, mtime FROM tracks")?;
            let rows = statement
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .filter_map(std::result::Result::ok)
                .map(|(path, mtime)| (PathBuf::from(path), mtime))
                .filter(|(path, _)| path.starts_with(source))
                .collect();
            Ok(rows)
        })
    }
}

/// Enumerate the supported files under a source with their mtimes.
fn observe_files(source: &Path) -> crate::Result<HashMap<PathBuf, i64>> {
    if !source.is_dir() {
        return Err(crate::Error::io(
            source,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
        ));
    }

    let walk = walk_files(source)?;
    for (directory, err) in &walk.failures {
        log::warn!("Skipping unreadable directory {}: {err}", directory.display());
    }

    let mut observed = HashMap::new();
    for path in walk.files {
        if !crate::tag::is_supported_path(&path) {
            continue;
        }
        match file_mtime(&path) {
            Ok(mtime) => {
                let _ = observed.insert(path, mtime);
            }
            Err(err) => {
                log::warn!("Failed to stat {}: {err}", path.display());
            }
        }
    }
    Ok(observed)
}
