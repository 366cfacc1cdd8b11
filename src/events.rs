// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Typed progress events for the UI collaborator.
//!
//! Every payload carries enough data to render progress without touching the
//! catalog. Within one batch, `FileDone` events are observed in strictly
//! increasing index order; scan statistics arrive as a single event at scan
//! completion.

use std::path::PathBuf;

/// Differential result of scanning one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// The source directory the scan covered.
    pub source: PathBuf,
    /// Paths that were observed for the first time.
    pub added: Vec<PathBuf>,
    /// Paths that are no longer observed.
    pub removed: Vec<PathBuf>,
    /// Paths whose modification time is newer than the indexed one.
    pub updated: Vec<PathBuf>,
}

impl ScanStats {
    /// Returns `true` if the scan changed nothing.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Outcome summary of an import, retag or export batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of files that were processed.
    pub total: usize,
    /// Number of files that failed.
    pub failed: usize,
    /// Number of files that were skipped (e.g. destination existed).
    pub skipped: usize,
}

/// Progress events emitted to the UI collaborator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A scan visited another file.
    ScanProgress {
        /// The source being scanned.
        source: PathBuf,
        /// The file that was just visited.
        path: PathBuf,
        /// Number of files visited so far.
        scanned: usize,
    },
    /// A source scan finished; stats are atomic per source.
    ScanComplete(ScanStats),
    /// Tags of a local file were read.
    TagsRead {
        /// The file that was read.
        path: PathBuf,
        /// Its artist, for display.
        artist: String,
        /// Its title, for display.
        title: String,
    },
    /// The reconciler settled on a release.
    ReleaseSelected {
        /// MusicBrainz release ID.
        release_id: String,
        /// Release title.
        title: String,
        /// Release artist.
        artist: String,
        /// Human-readable description of how the match was found.
        search_method: String,
    },
    /// Cover art arrived from the external fetcher.
    CoverArtFetched {
        /// MusicBrainz release ID the art belongs to.
        release_id: String,
        /// Size of the image in bytes.
        bytes: usize,
    },
    /// One file of a batch finished, successfully or not.
    FileDone {
        /// Zero-based index of the file in the batch.
        index: usize,
        /// The file's (destination) path.
        path: PathBuf,
        /// The error message if the file failed.
        error: Option<String>,
    },
    /// All files of a batch are done.
    BatchComplete(BatchSummary),
}
