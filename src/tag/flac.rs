// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for FLAC tags.

#![cfg(feature = "flac")]

use crate::tag::{
    clamp_ordinal, synchsafe_u32, vorbis_key, Artwork, TagCodec, TagField,
    ID3_FLAG_EXTENDED_HEADER, ID3_FLAG_FOOTER, VORBIS_RECORDING_ID_KEY,
};
use crate::track::{AudioInfo, TrackMetadata};
use metaflac::block::PictureType;
use metaflac::BlockType;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Vorbis keys for the track/disc totals.
///
/// The container has no native pair encoding, so the totals are written as
/// separate integer comments.
const TRACK_TOTAL_KEY: &str = "TRACKTOTAL";
/// See [`TRACK_TOTAL_KEY`].
const DISC_TOTAL_KEY: &str = "DISCTOTAL";

/// Codec for FLAC files carrying a Vorbis Comment block.
pub struct FlacCodec;

/// Compute the byte span of an ID3v2 tag prepended to a FLAC stream.
///
/// Returns `None` if the buffer does not start with `"ID3"`. Unlike the MP3
/// variant this honors the extended-header flag (bit 6 of the flags byte) by
/// reading its 4-byte synchsafe size and adding it to the span.
fn prepended_id3_span(header: &[u8; 10], extended_size: Option<[u8; 4]>) -> Option<u64> {
    if &header[..3] != b"ID3" {
        return None;
    }
    let mut span = 10 + u64::from(synchsafe_u32([header[6], header[7], header[8], header[9]]));
    if header[5] & ID3_FLAG_FOOTER != 0 {
        span += 10;
    }
    if header[5] & ID3_FLAG_EXTENDED_HEADER != 0 {
        span += u64::from(synchsafe_u32(extended_size?));
    }
    Some(span)
}

/// Find the offset of the `fLaC` marker in a file that may carry a
/// prepended ID3v2 tag.
///
/// Returns `Ok(0)` for a plain FLAC file. For a file starting with an ID3v2
/// header the marker must follow immediately after the computed tag span,
/// otherwise the file is malformed.
fn flac_marker_offset(path: &Path) -> crate::Result<u64> {
    let mut file = fs::File::open(path).map_err(|err| crate::Error::io(path, err))?;
    let mut header = [0u8; 10];
    file.read_exact(&mut header)
        .map_err(|err| crate::Error::io(path, err))?;
    if &header[..4] == b"fLaC" {
        return Ok(0);
    }

    let extended_size = if header[5] & ID3_FLAG_EXTENDED_HEADER != 0 {
        let mut size = [0u8; 4];
        file.read_exact(&mut size)
            .map_err(|err| crate::Error::io(path, err))?;
        Some(size)
    } else {
        None
    };
    let Some(span) = prepended_id3_span(&header, extended_size) else {
        return Err(crate::Error::Format(
            "file is neither FLAC nor ID3-prefixed FLAC".to_string(),
        ));
    };

    let _ = file
        .seek(SeekFrom::Start(span))
        .map_err(|err| crate::Error::io(path, err))?;
    let mut marker = [0u8; 4];
    file.read_exact(&mut marker)
        .map_err(|err| crate::Error::io(path, err))?;
    if &marker != b"fLaC" {
        return Err(crate::Error::Format(format!(
            "no fLaC marker after {span}-byte ID3 tag"
        )));
    }
    Ok(span)
}

/// Strip a prepended ID3v2 tag from a FLAC file, in place.
///
/// Returns `true` if a tag was removed. The original file mode is preserved.
///
/// # Errors
///
/// Returns an error if the file is malformed (no `fLaC` marker after the
/// tag) or cannot be rewritten.
pub fn strip_prepended_id3(path: &Path) -> crate::Result<bool> {
    let span = flac_marker_offset(path)?;
    if span == 0 {
        return Ok(false);
    }

    let mut file = fs::File::open(path).map_err(|err| crate::Error::io(path, err))?;
    let metadata = file
        .metadata()
        .map_err(|err| crate::Error::io(path, err))?;
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
        "Stripped {span}-byte prepended ID3 tag from {}",
        path.display()
    );
    Ok(true)
}

impl FlacCodec {
    /// Read the tag block, tolerating a prepended ID3v2 header.
    ///
    /// The ID3 bytes are only skipped here, not removed; removal happens on
    /// the first write.
    fn read_tag(path: &Path) -> crate::Result<metaflac::Tag> {
        let offset = flac_marker_offset(path)?;
        let file = fs::File::open(path).map_err(|err| crate::Error::io(path, err))?;
        let mut reader = BufReader::new(file);
        let _ = reader
            .seek(SeekFrom::Start(offset))
            .map_err(|err| crate::Error::io(path, err))?;
        Ok(metaflac::Tag::read_from(&mut reader)?)
    }

    /// First value of a Vorbis comment, if present.
    fn first_vorbis(tag: &metaflac::Tag, key: &str) -> Option<String> {
        tag.get_vorbis(key)
            .and_then(|mut values| values.next())
            .map(ToString::to_string)
    }
}

impl TagCodec for FlacCodec {
    fn read_tags(&self, path: &Path) -> crate::Result<TrackMetadata> {
        let tag = Self::read_tag(path)?;
        let mut tags = TrackMetadata::default();

        for field in TagField::ALL {
            if let Some(value) = Self::first_vorbis(&tag, vorbis_key(field)) {
                tags.set_text_field(field, value);
            }
        }
        if let Some(value) = Self::first_vorbis(&tag, VORBIS_RECORDING_ID_KEY) {
            tags.mb_recording_id = value;
        }

        tags.track_number = Self::first_vorbis(&tag, "TRACKNUMBER")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        tags.total_tracks = Self::first_vorbis(&tag, TRACK_TOTAL_KEY)
            .or_else(|| Self::first_vorbis(&tag, "TOTALTRACKS"))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        tags.disc_number = Self::first_vorbis(&tag, "DISCNUMBER")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        tags.total_discs = Self::first_vorbis(&tag, DISC_TOTAL_KEY)
            .or_else(|| Self::first_vorbis(&tag, "TOTALDISCS"))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        Ok(tags)
    }

    fn read_audio_info(&self, path: &Path) -> crate::Result<AudioInfo> {
        crate::probe::flac_info(path)
    }

    fn write_tags(&self, path: &Path, tags: &TrackMetadata) -> crate::Result<()> {
        // A prepended ID3 header makes the file unparseable for the library;
        // the first write removes it for good.
        let _ = strip_prepended_id3(path)?;

        let mut tag = metaflac::Tag::read_from_path(path)?;

        // Never merge into an existing comment block: drop it wholesale and
        // build a fresh one.
        tag.remove_blocks(BlockType::VorbisComment);

        for field in TagField::ALL {
            let value = tags.text_field(field);
            if !value.is_empty() {
                tag.set_vorbis(vorbis_key(field), vec![value]);
            }
        }
        if !tags.mb_recording_id.is_empty() {
            tag.set_vorbis(VORBIS_RECORDING_ID_KEY, vec![tags.mb_recording_id.as_str()]);
        }

        if tags.track_number > 0 {
            tag.set_vorbis(
                "TRACKNUMBER",
                vec![clamp_ordinal(tags.track_number).to_string()],
            );
        }
        if tags.total_tracks > 0 {
            tag.set_vorbis(
                TRACK_TOTAL_KEY,
                vec![clamp_ordinal(tags.total_tracks).to_string()],
            );
        }
        if tags.disc_number > 0 {
            tag.set_vorbis(
                "DISCNUMBER",
                vec![clamp_ordinal(tags.disc_number).to_string()],
            );
        }
        if tags.total_discs > 0 {
            tag.set_vorbis(
                DISC_TOTAL_KEY,
                vec![clamp_ordinal(tags.total_discs).to_string()],
            );
        }

        if let Some(data) = &tags.cover_art {
            // One Front Cover block; all previously embedded pictures go.
            let picture_types = tag
                .pictures()
                .map(|picture| picture.picture_type)
                .collect::<Vec<_>>();
            for picture_type in picture_types {
                tag.remove_picture_type(picture_type);
            }
            tag.add_picture(
                crate::coverart::sniff_mime(data),
                PictureType::CoverFront,
                data.clone(),
            );
        }

        tag.save()?;
        Ok(())
    }

    fn embedded_art(&self, path: &Path) -> crate::Result<Option<Artwork>> {
        let tag = Self::read_tag(path)?;
        let picture = tag
            .pictures()
            .find(|picture| picture.picture_type == PictureType::CoverFront)
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
    use crate::util::testing::{prepend_id3_header, write_minimal_flac};

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        write_minimal_flac(&path, 44_100, 16, 44_100 * 180).unwrap();

        let tags = TrackMetadata {
            title: "But Not for Me".to_string(),
            artist: "The Ahmad Jamal Trio".to_string(),
            album: "Ahmad Jamal at the Pershing: But Not for Me".to_string(),
            genre: "Jazz".to_string(),
            date: "1958".to_string(),
            track_number: 1,
            total_tracks: 8,
            disc_number: 1,
            total_discs: 1,
            media: "12\" Vinyl".to_string(),
            release_status: "official".to_string(),
            script: "Latn".to_string(),
            country: "US".to_string(),
            mb_release_group_id: "0a8e97fd-457c-30bc-938a-2fba79cb04e7".to_string(),
            mb_recording_id: "9d444787-3f25-4c16-9261-597b9ab021cc".to_string(),
            ..TrackMetadata::default()
        };
        FlacCodec.write_tags(&path, &tags).unwrap();
        let read_back = FlacCodec.read_tags(&path).unwrap();
        assert_eq!(read_back.title, tags.title);
        assert_eq!(read_back.media, tags.media);
        assert_eq!(read_back.release_status, tags.release_status);
        assert_eq!(read_back.total_tracks, 8);
        assert_eq!(read_back.total_discs, 1);
        assert_eq!(read_back.mb_release_group_id, tags.mb_release_group_id);
        assert_eq!(read_back.mb_recording_id, tags.mb_recording_id);
    }

    #[test]
    fn test_unicode_preservation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unicode.flac");
        write_minimal_flac(&path, 44_100, 16, 44_100).unwrap();

        for title in ["五輪の書", "Пётр Ильич Чайковский", "Noël"] {
            let tags = TrackMetadata {
                title: title.to_string(),
                ..TrackMetadata::default()
            };
            FlacCodec.write_tags(&path, &tags).unwrap();
            assert_eq!(FlacCodec.read_tags(&path).unwrap().title, title);
        }
    }

    #[test]
    fn test_read_tolerates_prepended_id3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefixed.flac");
        write_minimal_flac(&path, 44_100, 16, 44_100).unwrap();
        let tags = TrackMetadata {
            title: "T".to_string(),
            ..TrackMetadata::default()
        };
        FlacCodec.write_tags(&path, &tags).unwrap();
        prepend_id3_header(&path, 64).unwrap();

        // Read succeeds without modifying the file.
        assert_eq!(FlacCodec.read_tags(&path).unwrap().title, "T");
        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..3], b"ID3");
    }

    #[test]
    fn test_write_strips_prepended_id3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripme.flac");
        write_minimal_flac(&path, 44_100, 16, 44_100).unwrap();
        prepend_id3_header(&path, 64).unwrap();

        let tags = TrackMetadata {
            title: "T2".to_string(),
            ..TrackMetadata::default()
        };
        FlacCodec.write_tags(&path, &tags).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..4], b"fLaC");
        assert_eq!(FlacCodec.read_tags(&path).unwrap().title, "T2");
    }

    #[test]
    fn test_garbage_after_id3_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.flac");
        // An ID3 header followed by bytes that are not a FLAC stream.
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x0a".to_vec();
        data.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            FlacCodec.read_tags(&path),
            Err(crate::Error::Format(_))
        ));
    }

    #[test]
    fn test_write_replaces_comment_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replace.flac");
        write_minimal_flac(&path, 44_100, 16, 44_100).unwrap();

        let first = TrackMetadata {
            title: "Old".to_string(),
            barcode: "12345".to_string(),
            ..TrackMetadata::default()
        };
        FlacCodec.write_tags(&path, &first).unwrap();
        let second = TrackMetadata {
            title: "New".to_string(),
            ..TrackMetadata::default()
        };
        FlacCodec.write_tags(&path, &second).unwrap();

        let read_back = FlacCodec.read_tags(&path).unwrap();
        assert_eq!(read_back.title, "New");
        assert_eq!(read_back.barcode, "");
    }
}
