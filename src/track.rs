// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Canonical track metadata and audio stream information.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Canonical, format-independent representation of a track's tag metadata.
///
/// String fields use the empty string for "unknown/absent", ordinal fields
/// use `0`. This mirrors how the supported containers treat missing values
/// and keeps the per-format mapping tables free of `Option` noise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Artist credited for the whole release.
    pub album_artist: String,
    /// Release title.
    pub album: String,
    /// Genre name.
    pub genre: String,
    /// Artist sort name (e.g. "Beatles, The").
    pub artist_sort: String,
    /// Track number on the disc (0 = unknown).
    pub track_number: u32,
    /// Total tracks on the disc (0 = unknown).
    pub total_tracks: u32,
    /// Disc number (0 = unknown).
    pub disc_number: u32,
    /// Total number of discs (0 = unknown).
    pub total_discs: u32,
    /// Release date: empty, a 4-digit year, or `YYYY[-MM[-DD]]`.
    pub date: String,
    /// Date of the earliest release in the release group, same format.
    pub original_date: String,
    /// Record label name.
    pub label: String,
    /// Label catalog number.
    pub catalog_number: String,
    /// Release barcode.
    pub barcode: String,
    /// Media format (e.g. "CD", "12\" Vinyl").
    pub media: String,
    /// Release status (e.g. "official").
    pub release_status: String,
    /// Release group primary type (e.g. "album").
    pub release_type: String,
    /// ISO 15924 script of the track list.
    pub script: String,
    /// Country the release was issued in.
    pub country: String,
    /// International Standard Recording Code.
    pub isrc: String,
    /// MusicBrainz artist ID.
    pub mb_artist_id: String,
    /// MusicBrainz release ID.
    pub mb_release_id: String,
    /// MusicBrainz release group ID.
    pub mb_release_group_id: String,
    /// MusicBrainz recording ID.
    pub mb_recording_id: String,
    /// MusicBrainz release track ID.
    pub mb_track_id: String,
    /// Cover art to embed on the next write. Write-only: codecs never fill
    /// this on read, embedded art is extracted as a separate stream.
    #[serde(skip)]
    pub cover_art: Option<Vec<u8>>,
}

impl TrackMetadata {
    /// The release year, derived from the integer prefix of [`Self::date`].
    ///
    /// Returns `0` if the date is empty or does not start with digits.
    #[must_use]
    pub fn year(&self) -> u32 {
        parse_year(&self.date)
    }

    /// Canonical display form of the track number.
    ///
    /// Yields `"D-TT"` on multi-disc releases (`total_discs > 1` and a known
    /// disc number), otherwise the zero-padded track number `"TT"`.
    #[must_use]
    pub fn display_track_number(&self) -> String {
        if self.total_discs > 1 && self.disc_number > 0 {
            format!("{}-{:02}", self.disc_number, self.track_number)
        } else {
            format!("{:02}", self.track_number)
        }
    }
}

/// Parse the integer prefix of a date string (`"1958-01-01"` -> `1958`).
pub(crate) fn parse_year(date: &str) -> u32 {
    let digits: &str = date
        .split_once(|c: char| !c.is_ascii_digit())
        .map_or(date, |(prefix, _)| prefix);
    digits.parse().unwrap_or(0)
}

/// Audio stream format, as determined by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// MPEG-1/2 Audio Layer III.
    Mp3,
    /// Free Lossless Audio Codec.
    Flac,
    /// Opus in an Ogg container.
    Opus,
    /// Vorbis in an Ogg container.
    Vorbis,
    /// MPEG-4 audio with an unidentified codec.
    M4a,
    /// Advanced Audio Coding in an MPEG-4 container.
    Aac,
    /// Apple Lossless in an MPEG-4 container.
    Alac,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Flac => "FLAC",
            AudioFormat::Opus => "OPUS",
            AudioFormat::Vorbis => "VORBIS",
            AudioFormat::M4a => "M4A",
            AudioFormat::Aac => "AAC",
            AudioFormat::Alac => "ALAC",
        };
        f.write_str(name)
    }
}

/// Properties of the audio stream, read without decoding frames.
///
/// Always fully populated or not at all: the probe never returns a partially
/// filled result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    /// Playing time of the stream.
    pub duration: TimeDelta,
    /// Stream format.
    pub format: AudioFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample, for formats that declare one.
    pub bit_depth: Option<u8>,
}

/// Combined read-only view of a file's tags and stream properties.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path of the file.
    pub path: PathBuf,
    /// Tag metadata.
    pub tags: TrackMetadata,
    /// Audio stream properties.
    pub audio: AudioInfo,
}

/// Read surface shared by local files and remote release tracks.
///
/// The reconciler aligns and diffs values through this trait so that it does
/// not care which side of the comparison a track came from.
pub trait TrackLike {
    /// Track title.
    fn track_title(&self) -> Option<Cow<'_, str>>;
    /// Track artist.
    fn track_artist(&self) -> Option<Cow<'_, str>>;
    /// Position of the track on its disc.
    fn track_number(&self) -> Option<u32>;
    /// Disc the track is on.
    fn disc_number(&self) -> Option<u32>;
    /// MusicBrainz recording ID.
    fn musicbrainz_recording_id(&self) -> Option<Cow<'_, str>>;
    /// Track length.
    fn track_length(&self) -> Option<TimeDelta>;
}

impl TrackLike for TrackMetadata {
    fn track_title(&self) -> Option<Cow<'_, str>> {
        (!self.title.is_empty()).then(|| Cow::from(self.title.as_str()))
    }

    fn track_artist(&self) -> Option<Cow<'_, str>> {
        [&self.artist, &self.album_artist]
            .into_iter()
            .find(|value| !value.is_empty())
            .map(|value| Cow::from(value.as_str()))
    }

    fn track_number(&self) -> Option<u32> {
        (self.track_number > 0).then_some(self.track_number)
    }

    fn disc_number(&self) -> Option<u32> {
        (self.disc_number > 0).then_some(self.disc_number)
    }

    fn musicbrainz_recording_id(&self) -> Option<Cow<'_, str>> {
        (!self.mb_recording_id.is_empty()).then(|| Cow::from(self.mb_recording_id.as_str()))
    }

    fn track_length(&self) -> Option<TimeDelta> {
        None
    }
}

impl TrackLike for FileInfo {
    fn track_title(&self) -> Option<Cow<'_, str>> {
        self.tags.track_title()
    }

    fn track_artist(&self) -> Option<Cow<'_, str>> {
        self.tags.track_artist()
    }

    fn track_number(&self) -> Option<u32> {
        TrackLike::track_number(&self.tags)
    }

    fn disc_number(&self) -> Option<u32> {
        TrackLike::disc_number(&self.tags)
    }

    fn musicbrainz_recording_id(&self) -> Option<Cow<'_, str>> {
        self.tags.musicbrainz_recording_id()
    }

    fn track_length(&self) -> Option<TimeDelta> {
        Some(self.audio.duration)
    }
}
