// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Tags and tag-related functions.
//!
//! One codec per container format. Each codec maps between the canonical
//! [`TrackMetadata`] record and its container's native tag representation
//! through an explicit per-format mapping table, so that adding a container
//! stays a local change.

#[cfg(feature = "flac")]
pub mod flac;
#[cfg(feature = "id3")]
pub mod id3;
#[cfg(feature = "mp4")]
pub mod mp4;
pub mod ogg;

use crate::track::{AudioInfo, FileInfo, TrackMetadata};
use std::path::Path;

/// File extensions (lowercase) that have a codec.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "flac", "opus", "ogg", "oga", "m4a", "mp4"];

/// A piece of cover art together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// The raw image bytes.
    pub data: Vec<u8>,
    /// MIME type of the image.
    pub mime: String,
}

/// A tag field in a generic, format-independent way.
///
/// Each codec's mapping table is keyed by this enum. The MusicBrainz
/// recording ID is absent here on purpose: ID3 stores it in a `UFID` frame
/// rather than a text frame, so every codec handles it separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagField {
    /// Track title.
    Title,
    /// Track artist.
    Artist,
    /// Release artist.
    AlbumArtist,
    /// Release title.
    Album,
    /// Genre name.
    Genre,
    /// Artist sort name.
    ArtistSort,
    /// Release date.
    Date,
    /// Original release date.
    OriginalDate,
    /// Record label.
    Label,
    /// Catalog number.
    CatalogNumber,
    /// Barcode.
    Barcode,
    /// Media format.
    Media,
    /// Release status.
    ReleaseStatus,
    /// Release group primary type.
    ReleaseType,
    /// Track list script.
    Script,
    /// Release country.
    Country,
    /// ISRC.
    Isrc,
    /// MusicBrainz artist ID.
    MusicBrainzArtistId,
    /// MusicBrainz release ID.
    MusicBrainzReleaseId,
    /// MusicBrainz release group ID.
    MusicBrainzReleaseGroupId,
    /// MusicBrainz release track ID.
    MusicBrainzTrackId,
}

impl TagField {
    /// All text fields, in write order.
    pub(crate) const ALL: [TagField; 21] = [
        TagField::Title,
        TagField::Artist,
        TagField::AlbumArtist,
        TagField::Album,
        TagField::Genre,
        TagField::ArtistSort,
        TagField::Date,
        TagField::OriginalDate,
        TagField::Label,
        TagField::CatalogNumber,
        TagField::Barcode,
        TagField::Media,
        TagField::ReleaseStatus,
        TagField::ReleaseType,
        TagField::Script,
        TagField::Country,
        TagField::Isrc,
        TagField::MusicBrainzArtistId,
        TagField::MusicBrainzReleaseId,
        TagField::MusicBrainzReleaseGroupId,
        TagField::MusicBrainzTrackId,
    ];
}

impl TrackMetadata {
    /// Borrow the value of a text field.
    pub(crate) fn text_field(&self, field: TagField) -> &str {
        match field {
            TagField::Title => &self.title,
            TagField::Artist => &self.artist,
            TagField::AlbumArtist => &self.album_artist,
            TagField::Album => &self.album,
            TagField::Genre => &self.genre,
            TagField::ArtistSort => &self.artist_sort,
            TagField::Date => &self.date,
            TagField::OriginalDate => &self.original_date,
            TagField::Label => &self.label,
            TagField::CatalogNumber => &self.catalog_number,
            TagField::Barcode => &self.barcode,
            TagField::Media => &self.media,
            TagField::ReleaseStatus => &self.release_status,
            TagField::ReleaseType => &self.release_type,
            TagField::Script => &self.script,
            TagField::Country => &self.country,
            TagField::Isrc => &self.isrc,
            TagField::MusicBrainzArtistId => &self.mb_artist_id,
            TagField::MusicBrainzReleaseId => &self.mb_release_id,
            TagField::MusicBrainzReleaseGroupId => &self.mb_release_group_id,
            TagField::MusicBrainzTrackId => &self.mb_track_id,
        }
    }

    /// Replace the value of a text field.
    pub(crate) fn set_text_field(&mut self, field: TagField, value: String) {
        let slot = match field {
            TagField::Title => &mut self.title,
            TagField::Artist => &mut self.artist,
            TagField::AlbumArtist => &mut self.album_artist,
            TagField::Album => &mut self.album,
            TagField::Genre => &mut self.genre,
            TagField::ArtistSort => &mut self.artist_sort,
            TagField::Date => &mut self.date,
            TagField::OriginalDate => &mut self.original_date,
            TagField::Label => &mut self.label,
            TagField::CatalogNumber => &mut self.catalog_number,
            TagField::Barcode => &mut self.barcode,
            TagField::Media => &mut self.media,
            TagField::ReleaseStatus => &mut self.release_status,
            TagField::ReleaseType => &mut self.release_type,
            TagField::Script => &mut self.script,
            TagField::Country => &mut self.country,
            TagField::Isrc => &mut self.isrc,
            TagField::MusicBrainzArtistId => &mut self.mb_artist_id,
            TagField::MusicBrainzReleaseId => &mut self.mb_release_id,
            TagField::MusicBrainzReleaseGroupId => &mut self.mb_release_group_id,
            TagField::MusicBrainzTrackId => &mut self.mb_track_id,
        };
        *slot = value;
    }
}

/// Get the Vorbis Comment key for a tag field.
///
/// Shared between the FLAC and Ogg codecs, which store the same key set in
/// their respective containers.
pub(crate) fn vorbis_key(field: TagField) -> &'static str {
    match field {
        TagField::Title => "TITLE",
        TagField::Artist => "ARTIST",
        TagField::AlbumArtist => "ALBUMARTIST",
        TagField::Album => "ALBUM",
        TagField::Genre => "GENRE",
        TagField::ArtistSort => "ARTISTSORT",
        TagField::Date => "DATE",
        TagField::OriginalDate => "ORIGINALDATE",
        TagField::Label => "LABEL",
        TagField::CatalogNumber => "CATALOGNUMBER",
        TagField::Barcode => "BARCODE",
        TagField::Media => "MEDIA",
        TagField::ReleaseStatus => "RELEASESTATUS",
        TagField::ReleaseType => "RELEASETYPE",
        TagField::Script => "SCRIPT",
        TagField::Country => "RELEASECOUNTRY",
        TagField::Isrc => "ISRC",
        TagField::MusicBrainzArtistId => "MUSICBRAINZ_ARTISTID",
        TagField::MusicBrainzReleaseId => "MUSICBRAINZ_ALBUMID",
        TagField::MusicBrainzReleaseGroupId => "MUSICBRAINZ_RELEASEGROUPID",
        TagField::MusicBrainzTrackId => "MUSICBRAINZ_RELEASETRACKID",
    }
}

/// Vorbis Comment key of the MusicBrainz recording ID.
pub(crate) const VORBIS_RECORDING_ID_KEY: &str = "MUSICBRAINZ_TRACKID";

/// A codec reads and writes one container format.
pub trait TagCodec {
    /// Read tag metadata from the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the container is
    /// malformed.
    fn read_tags(&self, path: &Path) -> crate::Result<TrackMetadata>;

    /// Read audio stream properties without decoding frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream headers are missing or malformed.
    fn read_audio_info(&self, path: &Path) -> crate::Result<AudioInfo>;

    /// Replace the file's tags with the given metadata.
    ///
    /// Existing tag data is cleared before writing so repeated writes never
    /// accumulate duplicate frames or comments. Empty string fields are
    /// omitted entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be rewritten.
    fn write_tags(&self, path: &Path, tags: &TrackMetadata) -> crate::Result<()>;

    /// Extract embedded cover art, if the file has any.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be parsed. A file without
    /// embedded art is `Ok(None)`.
    fn embedded_art(&self, path: &Path) -> crate::Result<Option<Artwork>>;
}

/// Lowercase extension of the path, or [`crate::Error::Unsupported`].
pub(crate) fn extension_of(path: &Path) -> crate::Result<String> {
    path.extension()
        .map(std::ffi::OsStr::to_ascii_lowercase)
        .and_then(|extension| extension.to_str().map(ToString::to_string))
        .ok_or_else(|| crate::Error::Unsupported(path.display().to_string()))
}

/// Returns `true` if a codec exists for the path's extension.
#[must_use]
pub fn is_supported_path(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Look up the codec for the given path.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] if no codec covers the extension.
pub fn codec_for_path(path: &Path) -> crate::Result<&'static dyn TagCodec> {
    let extension = extension_of(path)?;
    match extension.as_str() {
        #[cfg(feature = "id3")]
        "mp3" => Ok(&self::id3::Id3Codec),
        #[cfg(feature = "flac")]
        "flac" => Ok(&self::flac::FlacCodec),
        "opus" | "ogg" | "oga" => Ok(&self::ogg::OggCodec),
        #[cfg(feature = "mp4")]
        "m4a" | "mp4" => Ok(&self::mp4::Mp4Codec),
        other => {
            log::debug!("Unknown file extension {other:?}");
            Err(crate::Error::Unsupported(other.to_string()))
        }
    }
}

/// Read tag metadata from the file, dispatching on the extension.
///
/// # Errors
///
/// See [`TagCodec::read_tags`].
pub fn read_tags(path: &Path) -> crate::Result<TrackMetadata> {
    codec_for_path(path)?.read_tags(path)
}

/// Replace the file's tags, dispatching on the extension.
///
/// # Errors
///
/// See [`TagCodec::write_tags`].
pub fn write_tags(path: &Path, tags: &TrackMetadata) -> crate::Result<()> {
    codec_for_path(path)?.write_tags(path, tags)
}

/// Read the combined tag and stream view of a file.
///
/// # Errors
///
/// Returns an error if either the tags or the stream properties cannot be
/// read; the result is never partially filled.
pub fn read_file_info(path: &Path) -> crate::Result<FileInfo> {
    let codec = codec_for_path(path)?;
    let tags = codec.read_tags(path)?;
    let audio = codec.read_audio_info(path)?;
    Ok(FileInfo {
        path: path.to_path_buf(),
        tags,
        audio,
    })
}

/// Clamp a track or disc ordinal to the signed 16-bit range before writing.
///
/// Some container fields are stored as 16-bit integers; larger values would
/// wrap or fail downstream.
pub(crate) fn clamp_ordinal(value: u32) -> u32 {
    value.min(u32::from(i16::MAX as u16))
}

/// Decode a 4-byte synchsafe integer (the low 7 bits of each byte).
pub(crate) fn synchsafe_u32(bytes: [u8; 4]) -> u32 {
    (u32::from(bytes[0] & 0x7f) << 21)
        | (u32::from(bytes[1] & 0x7f) << 14)
        | (u32::from(bytes[2] & 0x7f) << 7)
        | u32::from(bytes[3] & 0x7f)
}

/// ID3v2 header flag: a footer is present after the frames.
pub(crate) const ID3_FLAG_FOOTER: u8 = 0x10;

/// ID3v2 header flag: an extended header follows the main header.
pub(crate) const ID3_FLAG_EXTENDED_HEADER: u8 = 0x40;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchsafe_u32() {
        assert_eq!(synchsafe_u32([0, 0, 0, 0]), 0);
        assert_eq!(synchsafe_u32([0, 0, 0, 0x7f]), 127);
        assert_eq!(synchsafe_u32([0, 0, 0x01, 0x00]), 128);
        assert_eq!(synchsafe_u32([0x7f, 0x7f, 0x7f, 0x7f]), 0x0fff_ffff);
        // High bits must be masked off.
        assert_eq!(synchsafe_u32([0x80, 0x80, 0x80, 0xff]), 127);
    }

    #[test]
    fn test_is_supported_path() {
        assert!(is_supported_path(Path::new("/music/a.flac")));
        assert!(is_supported_path(Path::new("/music/a.MP3")));
        assert!(is_supported_path(Path::new("/music/a.oga")));
        assert!(!is_supported_path(Path::new("/music/a.wav")));
        assert!(!is_supported_path(Path::new("/music/noext")));
    }
}
