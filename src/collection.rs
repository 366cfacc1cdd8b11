// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! A collection of local files that together form one album.

use crate::release::ReleaseLike;
use crate::track::{FileInfo, TrackMetadata};
use crate::util::walk_files;
use std::borrow::Cow;
use std::path::PathBuf;

/// The agreement of all files in a collection on a single tag field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldConsensus {
    /// All files that have a value agree on it.
    Agreed(String),
    /// At least two files carry different values.
    Divergent,
    /// No file has a value for this field.
    Empty,
}

/// A collection of tracks on the local disk that form one album.
#[derive(Debug, Default)]
pub struct Collection {
    /// The files of the album, ordered by disc, track number and path.
    files: Vec<FileInfo>,
}

impl Collection {
    /// Creates a new collection from a `Vec` of [`FileInfo`] instances.
    #[must_use]
    pub fn new(mut files: Vec<FileInfo>) -> Self {
        files.sort_by(|a, b| {
            (a.tags.disc_number, a.tags.track_number, &a.path).cmp(&(
                b.tags.disc_number,
                b.tags.track_number,
                &b.path,
            ))
        });
        Self { files }
    }

    /// Read every supported file directly inside the given directory into a
    /// collection.
    ///
    /// Files that fail to read are skipped with a warning, matching the
    /// per-file error policy of the scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be enumerated.
    pub fn from_dir(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = path.into();
        let walk = walk_files(&root)?;
        for (directory, err) in &walk.failures {
            log::warn!("Skipping unreadable directory {}: {err}", directory.display());
        }

        let mut files = Vec::new();
        for file_path in walk.files {
            if !crate::tag::is_supported_path(&file_path) {
                continue;
            }
            match crate::tag::read_file_info(&file_path) {
                Ok(info) => files.push(info),
                Err(err) => {
                    log::warn!("Failed to read {}: {}", file_path.display(), err);
                }
            }
        }
        Ok(Self::new(files))
    }

    /// The files in this collection.
    #[must_use]
    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    /// Number of files in this collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the collection contains no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Determine the agreement of all files on the value selected by `field`.
    ///
    /// Files with an empty value are ignored; the consensus is over the files
    /// that carry one.
    pub fn field_consensus<'a>(
        &'a self,
        field: impl Fn(&'a TrackMetadata) -> &'a str,
    ) -> FieldConsensus {
        match self.scan_for_consensus(field) {
            ConsensusScan::NoValues => FieldConsensus::Empty,
            ConsensusScan::Unanimous(value) => FieldConsensus::Agreed(value.to_string()),
            ConsensusScan::Conflicting => FieldConsensus::Divergent,
        }
    }

    /// Finds the consensual value for the field, if there is one.
    fn find_consensual_value<'a>(
        &'a self,
        field: impl Fn(&'a TrackMetadata) -> &'a str,
    ) -> Option<&'a str> {
        match self.scan_for_consensus(field) {
            ConsensusScan::Unanimous(value) => Some(value),
            ConsensusScan::NoValues | ConsensusScan::Conflicting => None,
        }
    }

    /// Single pass over the files: does every non-empty value agree?
    ///
    /// Stops at the first conflicting value.
    fn scan_for_consensus<'a>(
        &'a self,
        field: impl Fn(&'a TrackMetadata) -> &'a str,
    ) -> ConsensusScan<'a> {
        let mut seen: Option<&str> = None;
        for file in &self.files {
            let value = field(&file.tags);
            if value.is_empty() {
                continue;
            }
            match seen {
                None => seen = Some(value),
                Some(existing) if existing == value => {}
                Some(_) => return ConsensusScan::Conflicting,
            }
        }
        seen.map_or(ConsensusScan::NoValues, ConsensusScan::Unanimous)
    }

    /// The first non-empty value for the field, in collection order.
    pub fn first_value<'a>(
        &'a self,
        field: impl Fn(&'a TrackMetadata) -> &'a str,
    ) -> Option<&'a str> {
        self.files
            .iter()
            .map(|file| field(&file.tags))
            .find(|value| !value.is_empty())
    }

    fn into_files(self) -> Vec<FileInfo> {
        self.files
    }
}

/// Result of one consensus pass over a collection's files.
enum ConsensusScan<'a> {
    /// No file carries a value for the field.
    NoValues,
    /// Every file that carries a value carries this one.
    Unanimous(&'a str),
    /// At least two files disagree.
    Conflicting,
}

impl IntoIterator for Collection {
    type Item = FileInfo;
    type IntoIter = std::vec::IntoIter<FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_files().into_iter()
    }
}

impl FromIterator<FileInfo> for Collection {
    fn from_iter<I: IntoIterator<Item = FileInfo>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect::<Vec<FileInfo>>())
    }
}

impl ReleaseLike for Collection {
    fn release_title(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.album).map(Cow::from)
    }

    fn release_artist(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.album_artist)
            .or_else(|| self.find_consensual_value(|tags| &tags.artist))
            .map(Cow::from)
    }

    fn release_track_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn release_date(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.date).map(Cow::from)
    }

    fn record_label(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.label).map(Cow::from)
    }

    fn catalog_number(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.catalog_number)
            .map(Cow::from)
    }

    fn barcode(&self) -> Option<Cow<'_, str>> {
        self.find_consensual_value(|tags| &tags.barcode)
            .map(Cow::from)
    }

    fn musicbrainz_artist_id(&self) -> Option<Cow<'_, str>> {
        self.first_value(|tags| &tags.mb_artist_id).map(Cow::from)
    }

    fn musicbrainz_release_id(&self) -> Option<Cow<'_, str>> {
        self.first_value(|tags| &tags.mb_release_id).map(Cow::from)
    }

    fn musicbrainz_release_group_id(&self) -> Option<Cow<'_, str>> {
        self.first_value(|tags| &tags.mb_release_group_id)
            .map(Cow::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{AudioFormat, AudioInfo};
    use chrono::TimeDelta;

    fn file(path: &str, tags: TrackMetadata) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            tags,
            audio: AudioInfo {
                duration: TimeDelta::seconds(180),
                format: AudioFormat::Flac,
                sample_rate: 44_100,
                bit_depth: Some(16),
            },
        }
    }

    fn tagged(artist: &str, album: &str, title: &str) -> TrackMetadata {
        TrackMetadata {
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            ..TrackMetadata::default()
        }
    }

    #[test]
    fn test_consensus_of_empty_collection() {
        let collection = Collection::new(Vec::new());
        assert_eq!(
            collection.field_consensus(|tags| &tags.artist),
            FieldConsensus::Empty
        );
        assert_eq!(collection.release_artist(), None);
    }

    #[test]
    fn test_consensus_ignores_files_without_a_value() {
        // Only one file carries a genre; the collection still agrees on it.
        let mut first = tagged("A", "Al", "T1");
        first.genre = "Jazz".to_string();
        let collection = Collection::new(vec![
            file("/music/a.flac", first),
            file("/music/b.flac", tagged("A", "Al", "T2")),
        ]);
        assert_eq!(
            collection.field_consensus(|tags| &tags.genre),
            FieldConsensus::Agreed("Jazz".to_string())
        );
    }

    #[test]
    fn test_collection_consensus() {
        let collection = Collection::new(vec![
            file("/music/a.flac", tagged("A", "Al", "T1")),
            file("/music/b.flac", tagged("A", "Al", "T2")),
        ]);
        assert_eq!(collection.release_artist().as_deref(), Some("A"));
        assert_eq!(collection.release_title().as_deref(), Some("Al"));
        assert_eq!(collection.release_track_count(), Some(2));
    }

    #[test]
    fn test_collection_divergent_album() {
        let collection = Collection::new(vec![
            file("/music/a.flac", tagged("A", "Al", "T1")),
            file("/music/b.flac", tagged("A", "Other", "T2")),
        ]);
        assert_eq!(collection.release_title(), None);
        assert_eq!(
            collection.field_consensus(|tags| &tags.album),
            FieldConsensus::Divergent
        );
    }

    #[test]
    fn test_collection_empty_field() {
        let collection = Collection::new(vec![
            file("/music/a.flac", tagged("A", "Al", "T1")),
            file("/music/b.flac", tagged("A", "Al", "T2")),
        ]);
        assert_eq!(
            collection.field_consensus(|tags| &tags.genre),
            FieldConsensus::Empty
        );
    }

    #[test]
    fn test_collection_orders_by_disc_and_track() {
        let mut first = tagged("A", "Al", "T1");
        first.disc_number = 2;
        first.track_number = 1;
        let mut second = tagged("A", "Al", "T2");
        second.disc_number = 1;
        second.track_number = 2;
        let collection = Collection::new(vec![
            file("/music/a.flac", first),
            file("/music/b.flac", second),
        ]);
        assert_eq!(collection.files()[0].tags.title, "T2");
        assert_eq!(collection.files()[1].tags.title, "T1");
    }
}
