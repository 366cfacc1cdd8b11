// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Types and traits for the MusicBrainz-style metadata service.
//!
//! The HTTP client itself is an external collaborator. This module only
//! defines the entity shapes the engine consumes and the [`MetadataService`]
//! trait the reconciler talks to. All entities are (de)serializable so an
//! external caching layer can persist them as-is.

use crate::release::ReleaseLike;
use crate::track::TrackLike;
use chrono::TimeDelta;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::OnceLock;

/// A single track on a release medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// MusicBrainz release track ID.
    pub id: String,
    /// MusicBrainz recording ID.
    pub recording_id: String,
    /// Position of the track on its medium (1-based).
    pub position: u32,
    /// Track title.
    pub title: String,
    /// Track artist credit.
    pub artist: String,
    /// Track length in milliseconds, if known.
    pub length_ms: Option<u64>,
    /// Disc the track is on (copied from the containing medium).
    pub disc_number: u32,
}

impl TrackLike for Track {
    fn track_title(&self) -> Option<Cow<'_, str>> {
        (!self.title.is_empty()).then(|| Cow::from(self.title.as_str()))
    }

    fn track_artist(&self) -> Option<Cow<'_, str>> {
        (!self.artist.is_empty()).then(|| Cow::from(self.artist.as_str()))
    }

    fn track_number(&self) -> Option<u32> {
        (self.position > 0).then_some(self.position)
    }

    fn disc_number(&self) -> Option<u32> {
        (self.disc_number > 0).then_some(self.disc_number)
    }

    fn musicbrainz_recording_id(&self) -> Option<Cow<'_, str>> {
        (!self.recording_id.is_empty()).then(|| Cow::from(self.recording_id.as_str()))
    }

    fn track_length(&self) -> Option<TimeDelta> {
        self.length_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .map(TimeDelta::milliseconds)
    }
}

/// A medium (disc) of a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    /// Position of the medium within the release (1-based).
    pub position: u32,
    /// Medium format (e.g. "CD").
    pub format: String,
    /// Tracks on this medium.
    pub tracks: Vec<Track>,
}

/// Full release details, as returned by `get_release`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// MusicBrainz release ID.
    pub id: String,
    /// Release title.
    pub title: String,
    /// Release artist credit.
    pub artist: String,
    /// MusicBrainz ID of the release artist.
    pub artist_id: String,
    /// Artist sort name.
    pub artist_sort: String,
    /// Release date (`YYYY[-MM[-DD]]` or empty).
    pub date: String,
    /// Country the release was issued in.
    pub country: String,
    /// Record label name.
    pub label: String,
    /// Label catalog number.
    pub catalog_number: String,
    /// Release barcode.
    pub barcode: String,
    /// ISO 15924 script of the track list.
    pub script: String,
    /// Release status (e.g. "official").
    pub status: String,
    /// Genres the service associates with the release, if any.
    pub genres: Vec<String>,
    /// The media (discs) of the release.
    pub media: Vec<Medium>,
    /// The release group this release belongs to.
    pub release_group: Option<ReleaseGroup>,
}

impl Release {
    /// Total number of tracks across all media.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.media.iter().map(|medium| medium.tracks.len()).sum()
    }

    /// Yields all tracks across all media, in disc and position order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.media.iter().flat_map(|medium| medium.tracks.iter())
    }
}

impl ReleaseLike for Release {
    fn release_title(&self) -> Option<Cow<'_, str>> {
        (!self.title.is_empty()).then(|| Cow::from(self.title.as_str()))
    }

    fn release_artist(&self) -> Option<Cow<'_, str>> {
        (!self.artist.is_empty()).then(|| Cow::from(self.artist.as_str()))
    }

    fn release_track_count(&self) -> Option<usize> {
        Some(self.track_count())
    }

    fn release_date(&self) -> Option<Cow<'_, str>> {
        (!self.date.is_empty()).then(|| Cow::from(self.date.as_str()))
    }

    fn record_label(&self) -> Option<Cow<'_, str>> {
        (!self.label.is_empty()).then(|| Cow::from(self.label.as_str()))
    }

    fn catalog_number(&self) -> Option<Cow<'_, str>> {
        (!self.catalog_number.is_empty()).then(|| Cow::from(self.catalog_number.as_str()))
    }

    fn barcode(&self) -> Option<Cow<'_, str>> {
        (!self.barcode.is_empty()).then(|| Cow::from(self.barcode.as_str()))
    }

    fn musicbrainz_artist_id(&self) -> Option<Cow<'_, str>> {
        (!self.artist_id.is_empty()).then(|| Cow::from(self.artist_id.as_str()))
    }

    fn musicbrainz_release_id(&self) -> Option<Cow<'_, str>> {
        (!self.id.is_empty()).then(|| Cow::from(self.id.as_str()))
    }

    fn musicbrainz_release_group_id(&self) -> Option<Cow<'_, str>> {
        self.release_group
            .as_ref()
            .filter(|group| !group.id.is_empty())
            .map(|group| Cow::from(group.id.as_str()))
    }
}

/// Light release shape returned when browsing a release group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    /// MusicBrainz release ID.
    pub id: String,
    /// Release title.
    pub title: String,
    /// Release date (`YYYY[-MM[-DD]]` or empty).
    pub date: String,
    /// Country the release was issued in.
    pub country: String,
    /// Total number of tracks on the release.
    pub track_count: usize,
    /// Media formats (e.g. `["CD", "CD"]`).
    pub formats: Vec<String>,
}

/// A release group (the abstract album identity).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseGroup {
    /// MusicBrainz release group ID.
    pub id: String,
    /// Release group title.
    pub title: String,
    /// Release group artist credit.
    pub artist: String,
    /// Primary type (e.g. "Album", "Single").
    pub primary_type: String,
    /// Secondary types (e.g. "Live", "Compilation").
    pub secondary_types: Vec<String>,
    /// Date of the earliest release in the group.
    pub first_release_date: String,
}

/// The metadata service the reconciler consumes.
///
/// Implementations wrap an HTTP client with rate limiting and caching; both
/// concerns stay outside this crate. Methods return [`crate::Error::NotFound`]
/// when the service has no record, except for [`Self::get_cover_art`] which
/// treats a missing image as `None`.
pub trait MetadataService: Send + Sync {
    /// Fetch full release details by release ID.
    fn get_release(
        &self,
        release_id: &str,
    ) -> impl std::future::Future<Output = crate::Result<Release>> + Send;

    /// Fetch the releases of a release group.
    fn get_release_group_releases(
        &self,
        release_group_id: &str,
    ) -> impl std::future::Future<Output = crate::Result<Vec<ReleaseSummary>>> + Send;

    /// Search release groups by artist and album name.
    fn search_release_groups(
        &self,
        artist: &str,
        album: &str,
    ) -> impl std::future::Future<Output = crate::Result<Vec<ReleaseGroup>>> + Send;

    /// Browse the release groups of an artist.
    fn get_artist_release_groups(
        &self,
        artist_id: &str,
    ) -> impl std::future::Future<Output = crate::Result<Vec<ReleaseGroup>>> + Send;

    /// Fetch the front cover art for a release. `None` if the release has no
    /// cover art (this is not an error).
    fn get_cover_art(
        &self,
        release_id: &str,
    ) -> impl std::future::Future<Output = crate::Result<Option<Vec<u8>>>> + Send;
}

/// Returns `true` if the value is a well-formed MBID (a UUID string).
fn is_mbid(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[0-9a-fA-F]{8}(-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12}$")
                .expect("MBID pattern is valid")
        })
        .is_match(value)
}

/// A MusicBrainz Identifier.
///
/// See <https://musicbrainz.org/doc/MusicBrainz_Identifier> for details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicBrainzId<'a> {
    /// An artist ID.
    Artist(Cow<'a, str>),
    /// A recording ID.
    Recording(Cow<'a, str>),
    /// A release ID.
    Release(Cow<'a, str>),
    /// A release group ID.
    ReleaseGroup(Cow<'a, str>),
}

impl<'a> MusicBrainzId<'a> {
    /// The URL path segment that names this entity kind.
    #[must_use]
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Artist(_) => "artist",
            Self::Recording(_) => "recording",
            Self::Release(_) => "release",
            Self::ReleaseGroup(_) => "release-group",
        }
    }

    /// Construct an ID from an entity path segment and its MBID.
    fn from_entity(entity: &str, id: &'a str) -> Option<Self> {
        match entity {
            "artist" => Some(Self::Artist(id.into())),
            "recording" => Some(Self::Recording(id.into())),
            "release" => Some(Self::Release(id.into())),
            "release-group" => Some(Self::ReleaseGroup(id.into())),
            _ => None,
        }
    }

    /// Extract a MusicBrainz ID from user-supplied input.
    ///
    /// Accepts either a bare MBID, which is assumed to be a release ID, or
    /// a musicbrainz.org URL (website or `ws/2` API form), whose path names
    /// the entity kind. Anything else yields `None`.
    #[must_use]
    pub fn find(input: &'a str) -> Option<Self> {
        let input = input.trim();
        if is_mbid(input) {
            return Some(Self::Release(input.into()));
        }

        // Peel the URL down to its path: scheme, host, optional API prefix.
        let path = input
            .strip_prefix("https://")
            .or_else(|| input.strip_prefix("http://"))?
            .strip_prefix("musicbrainz.org/")?;
        let path = path.strip_prefix("ws/2/").unwrap_or(path);

        let (entity, remainder) = path.split_once('/')?;
        // The MBID may be followed by a query string or fragment.
        let id = remainder.split(['?', '#', '/']).next()?;
        if !is_mbid(id) {
            return None;
        }
        Self::from_entity(entity, id)
    }
}
