// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for ID3 tags.

#![cfg(feature = "id3")]

use crate::tag::{
    clamp_ordinal, synchsafe_u32, Artwork, TagCodec, TagField, ID3_FLAG_FOOTER,
};
use crate::track::{AudioInfo, TrackMetadata};
use id3::TagLike;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Owner identifier of the `UFID` frame that carries the MusicBrainz
/// recording ID.
const UFID_OWNER: &str = "http://musicbrainz.org";

/// ID3 frame ID.
enum FrameId {
    /// Text frame.
    Text(&'static str),
    /// Extended Text frame (`TXXX`), keyed by its description.
    ExtendedText(&'static str),
}

/// Get the ID3 frame for a tag field.
///
/// The `TXXX` descriptions are the exact strings other taggers register, so
/// files stay interoperable.
fn field_frame(field: TagField) -> FrameId {
    match field {
        TagField::Title => FrameId::Text("TIT2"),
        TagField::Artist => FrameId::Text("TPE1"),
        TagField::AlbumArtist => FrameId::Text("TPE2"),
        TagField::Album => FrameId::Text("TALB"),
        TagField::Genre => FrameId::Text("TCON"),
        TagField::ArtistSort => FrameId::Text("TSOP"),
        TagField::Date => FrameId::Text("TDRC"),
        TagField::OriginalDate => FrameId::Text("TDOR"),
        TagField::Label => FrameId::Text("TPUB"),
        TagField::CatalogNumber => FrameId::ExtendedText("CATALOGNUMBER"),
        TagField::Barcode => FrameId::ExtendedText("BARCODE"),
        TagField::Media => FrameId::Text("TMED"),
        TagField::ReleaseStatus => FrameId::ExtendedText("MusicBrainz Album Status"),
        TagField::ReleaseType => FrameId::ExtendedText("MusicBrainz Album Type"),
        TagField::Script => FrameId::ExtendedText("SCRIPT"),
        TagField::Country => FrameId::ExtendedText("MusicBrainz Album Release Country"),
        TagField::Isrc => FrameId::Text("TSRC"),
        TagField::MusicBrainzArtistId => FrameId::ExtendedText("MusicBrainz Artist Id"),
        TagField::MusicBrainzReleaseId => FrameId::ExtendedText("MusicBrainz Album Id"),
        TagField::MusicBrainzReleaseGroupId => {
            FrameId::ExtendedText("MusicBrainz Release Group Id")
        }
        TagField::MusicBrainzTrackId => FrameId::ExtendedText("MusicBrainz Release Track Id"),
    }
}

/// Codec for MP3 files carrying ID3v2 tags.
///
/// Writes are always ID3v2.4 with UTF-8 text encoding. Reads understand
/// v2.3's split date frames; v2.2 tags are stripped in place before the
/// first write because the underlying library cannot update them.
pub struct Id3Codec;

impl Id3Codec {
    /// Read an existing tag, treating "no tag" as an empty one.
    fn read_tag(path: &Path) -> crate::Result<id3::Tag> {
        match id3::Tag::read_from_path(path) {
            Ok(tag) => Ok(tag),
            Err(err) if matches!(err.kind, id3::ErrorKind::NoTag) => Ok(id3::Tag::new()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Get the content of a text frame as string.
fn frame_text<'a>(tag: &'a id3::Tag, frame_id: &str) -> Option<&'a str> {
    tag.get(frame_id).and_then(|frame| frame.content().text())
}

/// Get the content of an extended text frame as string.
///
/// Some writers NUL-terminate the value; the terminator is not part of it.
fn extended_text<'a>(tag: &'a id3::Tag, description: &str) -> Option<&'a str> {
    tag.extended_texts()
        .find(|t| t.description == description)
        .map(|t| t.value.strip_suffix('\0').unwrap_or(&t.value))
}

/// Synthesize an ISO-style date from the ID3v2.3 `TYER`/`TDAT` frame pair.
///
/// `TDAT` is `DDMM`; both components must be plausible, otherwise only the
/// year is kept.
fn date_from_v23_frames(year: &str, date: Option<&str>) -> String {
    let Ok(_) = year.parse::<u32>() else {
        return String::new();
    };
    if let Some(tdat) = date {
        if tdat.len() == 4 {
            let day = tdat[..2].parse::<u32>().ok();
            let month = tdat[2..].parse::<u32>().ok();
            if let (Some(day @ 1..=31), Some(month @ 1..=12)) = (day, month) {
                return format!("{year}-{month:02}-{day:02}");
            }
        }
    }
    year.to_string()
}

/// Compute the total byte span of an ID3v2 tag from its raw header.
///
/// Returns `None` if the buffer does not start with an ID3v2 header. The
/// span covers the 10-byte header, the synchsafe-sized body and, if the
/// footer flag (bit 4 of the flags byte) is set, the 10-byte footer.
fn id3_tag_span(header: &[u8; 10]) -> Option<u64> {
    if &header[..3] != b"ID3" {
        return None;
    }
    let size = u64::from(synchsafe_u32([header[6], header[7], header[8], header[9]]));
    let footer = if header[5] & ID3_FLAG_FOOTER != 0 {
        10
    } else {
        0
    };
    Some(10 + size + footer)
}

/// Strip an ID3v2.2 (or earlier) tag from the start of the file, in place.
///
/// The library cannot update these legacy versions, so the file is rewritten
/// without the tag bytes and the original file mode is preserved. Returns
/// `true` if a tag was removed.
///
/// # Errors
///
/// Returns an error if the file cannot be read or rewritten.
pub fn strip_legacy_tag(path: &Path) -> crate::Result<bool> {
    let mut file = fs::File::open(path).map_err(|err| crate::Error::io(path, err))?;
    let mut header = [0u8; 10];
    if file.read_exact(&mut header).is_err() {
        return Ok(false);
    }

    // Byte 3 is the major version; 3 (v2.3) and 4 (v2.4) are handled by the
    // library directly.
    if header[3] >= 3 {
        return Ok(false);
    }
    let Some(span) = id3_tag_span(&header) else {
        return Ok(false);
    };

    let metadata = file
        .metadata()
        .map_err(|err| crate::Error::io(path, err))?;
    if span >= metadata.len() {
        return Err(crate::Error::Format(format!(
            "ID3v2 tag size {span} exceeds file size {}",
            metadata.len()
        )));
    }
    let _ = file
        .seek(SeekFrom::Start(span))
        .map_err(|err| crate::Error::io(path, err))?;
    let mut remainder = Vec::new();
    let _ = file
        .read_to_end(&mut remainder)
        .map_err(|err| crate::Error::io(path, err))?;
    drop(file);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| crate::Error::io(path, err))?;
    temp.write_all(&remainder)
        .map_err(|err| crate::Error::io(path, err))?;
    temp.as_file()
        .set_permissions(metadata.permissions())
        .map_err(|err| crate::Error::io(path, err))?;
    let _ = temp
        .persist(path)
        .map_err(|err| crate::Error::io(path, err.error))?;
    log::info!(
        "Stripped unsupported ID3v2.{} tag ({span} bytes) from {}",
        header[3],
        path.display()
    );
    Ok(true)
}

impl TagCodec for Id3Codec {
    fn read_tags(&self, path: &Path) -> crate::Result<TrackMetadata> {
        let tag = Self::read_tag(path)?;
        let mut tags = TrackMetadata::default();

        for field in TagField::ALL {
            let value = match field_frame(field) {
                FrameId::Text(id) => frame_text(&tag, id),
                FrameId::ExtendedText(description) => extended_text(&tag, description),
            };
            if let Some(value) = value {
                tags.set_text_field(field, value.to_string());
            }
        }

        // Older v2.3 writers split the date over TYER/TDAT and store the
        // original release year in TORY.
        if tags.date.is_empty() {
            if let Some(year) = frame_text(&tag, "TYER") {
                tags.date = date_from_v23_frames(year, frame_text(&tag, "TDAT"));
            }
        }
        if tags.original_date.is_empty() {
            if let Some(year) = frame_text(&tag, "TORY") {
                if year.parse::<u32>().is_ok() {
                    tags.original_date = year.to_string();
                }
            }
        }

        tags.track_number = tag.track().unwrap_or(0);
        tags.total_tracks = tag.total_tracks().unwrap_or(0);
        tags.disc_number = tag.disc().unwrap_or(0);
        tags.total_discs = tag.total_discs().unwrap_or(0);

        if let Some(ufid) = tag
            .frames()
            .filter(|frame| frame.id() == "UFID")
            .find_map(|frame| match frame.content() {
                id3::Content::UniqueFileIdentifier(ufid) if ufid.owner_identifier == UFID_OWNER => {
                    Some(ufid)
                }
                _ => None,
            })
        {
            tags.mb_recording_id = String::from_utf8_lossy(&ufid.identifier).into_owned();
        }

        Ok(tags)
    }

    fn read_audio_info(&self, path: &Path) -> crate::Result<AudioInfo> {
        crate::probe::mp3_info(path)
    }

    fn write_tags(&self, path: &Path, tags: &TrackMetadata) -> crate::Result<()> {
        // The library reports v2.2 and earlier as unsupported on write, so
        // those tags are surgically removed first.
        let _ = strip_legacy_tag(path)?;

        // Start from a fresh tag so no stale frames survive the write.
        let mut tag = id3::Tag::new();

        for field in TagField::ALL {
            let value = tags.text_field(field);
            if value.is_empty() {
                continue;
            }
            match field_frame(field) {
                FrameId::Text(id) => {
                    let _ = tag.add_frame(id3::Frame::text(id, value));
                }
                FrameId::ExtendedText(description) => {
                    let _ = tag.add_frame(id3::frame::ExtendedText {
                        description: description.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        if tags.track_number > 0 {
            tag.set_track(clamp_ordinal(tags.track_number));
        }
        if tags.total_tracks > 0 {
            tag.set_total_tracks(clamp_ordinal(tags.total_tracks));
        }
        if tags.disc_number > 0 {
            tag.set_disc(clamp_ordinal(tags.disc_number));
        }
        if tags.total_discs > 0 {
            tag.set_total_discs(clamp_ordinal(tags.total_discs));
        }

        if !tags.mb_recording_id.is_empty() {
            let _ = tag.add_frame(id3::Frame::with_content(
                "UFID",
                id3::Content::UniqueFileIdentifier(id3::frame::UniqueFileIdentifier {
                    owner_identifier: UFID_OWNER.to_string(),
                    identifier: tags.mb_recording_id.clone().into_bytes(),
                }),
            ));
        }

        if let Some(data) = &tags.cover_art {
            let _ = tag.add_frame(id3::frame::Picture {
                mime_type: crate::coverart::sniff_mime(data).to_string(),
                picture_type: id3::frame::PictureType::CoverFront,
                description: "Front Cover".to_string(),
                data: data.clone(),
            });
        }

        tag.write_to_path(path, id3::Version::Id3v24)?;
        Ok(())
    }

    fn embedded_art(&self, path: &Path) -> crate::Result<Option<Artwork>> {
        let tag = Self::read_tag(path)?;
        let picture = tag
            .pictures()
            .find(|picture| picture.picture_type == id3::frame::PictureType::CoverFront)
            .or_else(|| tag.pictures().next());
        Ok(picture.map(|picture| Artwork {
            data: picture.data.clone(),
            mime: picture.mime_type.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{write_minimal_mp3, write_mp3_with_legacy_tag};

    #[test]
    fn test_date_from_v23_frames() {
        assert_eq!(date_from_v23_frames("1969", Some("2809")), "1969-09-28");
        assert_eq!(date_from_v23_frames("1969", None), "1969");
        // Implausible day/month components fall back to the bare year.
        assert_eq!(date_from_v23_frames("1969", Some("9913")), "1969");
        assert_eq!(date_from_v23_frames("1969", Some("28")), "1969");
        assert_eq!(date_from_v23_frames("not a year", Some("2809")), "");
    }

    #[test]
    fn test_id3_tag_span() {
        let mut header = *b"ID3\x02\x00\x00\x00\x00\x02\x01";
        assert_eq!(id3_tag_span(&header), Some(10 + 257));
        header[5] = ID3_FLAG_FOOTER;
        assert_eq!(id3_tag_span(&header), Some(10 + 257 + 10));
        assert_eq!(id3_tag_span(b"fLaC\x00\x00\x00\x00\x00\x00"), None);
    }

    #[test]
    fn test_strip_legacy_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.mp3");
        write_mp3_with_legacy_tag(&path).unwrap();

        assert!(strip_legacy_tag(&path).unwrap());
        let data = std::fs::read(&path).unwrap();
        assert_ne!(&data[..3], b"ID3");
        // The first two bytes form a valid MPEG sync.
        assert_eq!(data[0], 0xff);
        assert_eq!(data[1] & 0xe0, 0xe0);

        // A second pass is a no-op.
        assert!(!strip_legacy_tag(&path).unwrap());
    }

    #[test]
    fn test_strip_leaves_modern_tags_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modern.mp3");
        write_minimal_mp3(&path, 8).unwrap();
        let tags = TrackMetadata {
            title: "T".to_string(),
            ..TrackMetadata::default()
        };
        Id3Codec.write_tags(&path, &tags).unwrap();
        assert!(!strip_legacy_tag(&path).unwrap());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        write_minimal_mp3(&path, 8).unwrap();

        let tags = TrackMetadata {
            title: "Poinciana".to_string(),
            artist: "The Ahmad Jamal Trio".to_string(),
            album_artist: "The Ahmad Jamal Trio".to_string(),
            album: "Ahmad Jamal at the Pershing: But Not for Me".to_string(),
            genre: "Jazz".to_string(),
            date: "1958-01-01".to_string(),
            original_date: "1958".to_string(),
            label: "Argo".to_string(),
            catalog_number: "LP-628".to_string(),
            track_number: 6,
            total_tracks: 8,
            disc_number: 1,
            total_discs: 1,
            mb_artist_id: "9e7ca87b-4e3d-4d14-90f1-a74acb645fe2".to_string(),
            mb_release_id: "0008f765-032b-46cd-ab69-2220edab1837".to_string(),
            mb_recording_id: "9d444787-3f25-4c16-9261-597b9ab021cc".to_string(),
            ..TrackMetadata::default()
        };
        Id3Codec.write_tags(&path, &tags).unwrap();
        let read_back = Id3Codec.read_tags(&path).unwrap();
        assert_eq!(read_back.title, tags.title);
        assert_eq!(read_back.artist, tags.artist);
        assert_eq!(read_back.album, tags.album);
        assert_eq!(read_back.date, tags.date);
        assert_eq!(read_back.original_date, tags.original_date);
        assert_eq!(read_back.label, tags.label);
        assert_eq!(read_back.catalog_number, tags.catalog_number);
        assert_eq!(read_back.track_number, 6);
        assert_eq!(read_back.total_tracks, 8);
        assert_eq!(read_back.mb_artist_id, tags.mb_artist_id);
        assert_eq!(read_back.mb_release_id, tags.mb_release_id);
        assert_eq!(read_back.mb_recording_id, tags.mb_recording_id);
    }

    #[test]
    fn test_unicode_preservation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unicode.mp3");
        write_minimal_mp3(&path, 8).unwrap();

        for title in ["五輪の書", "Пётр Ильич Чайковский", "Noël"] {
            let tags = TrackMetadata {
                title: title.to_string(),
                ..TrackMetadata::default()
            };
            Id3Codec.write_tags(&path, &tags).unwrap();
            assert_eq!(Id3Codec.read_tags(&path).unwrap().title, title);
        }
    }

    #[test]
    fn test_write_clears_previous_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clear.mp3");
        write_minimal_mp3(&path, 8).unwrap();

        let first = TrackMetadata {
            title: "Old".to_string(),
            barcode: "12345".to_string(),
            ..TrackMetadata::default()
        };
        Id3Codec.write_tags(&path, &first).unwrap();
        let second = TrackMetadata {
            title: "New".to_string(),
            ..TrackMetadata::default()
        };
        Id3Codec.write_tags(&path, &second).unwrap();

        let read_back = Id3Codec.read_tags(&path).unwrap();
        assert_eq!(read_back.title, "New");
        assert_eq!(read_back.barcode, "");
    }

    #[test]
    fn test_ordinal_clamping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.mp3");
        write_minimal_mp3(&path, 8).unwrap();

        let tags = TrackMetadata {
            track_number: 100_000,
            ..TrackMetadata::default()
        };
        Id3Codec.write_tags(&path, &tags).unwrap();
        assert_eq!(Id3Codec.read_tags(&path).unwrap().track_number, 32_767);
    }
}
