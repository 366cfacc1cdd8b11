// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for MP4 atoms (M4A files).

#![cfg(feature = "mp4")]

use crate::tag::{clamp_ordinal, Artwork, TagCodec, TagField};
use crate::track::{AudioInfo, TrackMetadata};
use mp4ameta::{Data, DataIdent, Fourcc, FreeformIdent, ImgFmt};
use std::path::Path;

/// Mean value of all freeform (`----`) atoms this codec writes.
const FREEFORM_MEAN: &str = "com.apple.iTunes";

/// Sort-artist atom.
const SOAR: Fourcc = Fourcc(*b"soar");

/// MP4 atom for a tag field.
enum Atom {
    /// A standard atom identified by its four-character code.
    Standard(Fourcc),
    /// A freeform `----` atom identified by its name.
    Freeform(&'static str),
}

/// Get the MP4 atom for a tag field.
///
/// The MusicBrainz IDs use the mixed-case space-separated freeform names,
/// extended release attributes the uppercased ones. Legacy writers produced
/// lowercase spellings of the same names; the reader tolerates those, the
/// writer replaces them.
fn field_atom(field: TagField) -> Atom {
    match field {
        TagField::Title => Atom::Standard(Fourcc(*b"\xa9nam")),
        TagField::Artist => Atom::Standard(Fourcc(*b"\xa9ART")),
        TagField::AlbumArtist => Atom::Standard(Fourcc(*b"aART")),
        TagField::Album => Atom::Standard(Fourcc(*b"\xa9alb")),
        TagField::Genre => Atom::Standard(Fourcc(*b"\xa9gen")),
        TagField::ArtistSort => Atom::Standard(SOAR),
        TagField::Date => Atom::Standard(Fourcc(*b"\xa9day")),
        TagField::OriginalDate => Atom::Freeform("ORIGINALDATE"),
        TagField::Label => Atom::Freeform("LABEL"),
        TagField::CatalogNumber => Atom::Freeform("CATALOGNUMBER"),
        TagField::Barcode => Atom::Freeform("BARCODE"),
        TagField::Media => Atom::Freeform("MEDIA"),
        TagField::ReleaseStatus => Atom::Freeform("MusicBrainz Album Status"),
        TagField::ReleaseType => Atom::Freeform("MusicBrainz Album Type"),
        TagField::Script => Atom::Freeform("SCRIPT"),
        TagField::Country => Atom::Freeform("MusicBrainz Album Release Country"),
        TagField::Isrc => Atom::Freeform("ISRC"),
        TagField::MusicBrainzArtistId => Atom::Freeform("MusicBrainz Artist Id"),
        TagField::MusicBrainzReleaseId => Atom::Freeform("MusicBrainz Album Id"),
        TagField::MusicBrainzReleaseGroupId => Atom::Freeform("MusicBrainz Release Group Id"),
        TagField::MusicBrainzTrackId => Atom::Freeform("MusicBrainz Release Track Id"),
    }
}

/// Freeform name of the MusicBrainz recording ID.
const RECORDING_ID_NAME: &str = "MusicBrainz Track Id";

/// First string value of a freeform atom, tolerating legacy lowercase names.
///
/// The modern spelling wins when both are present on the same file.
fn freeform_string(tag: &mp4ameta::Tag, name: &str) -> Option<String> {
    let ident = FreeformIdent::new(FREEFORM_MEAN, name);
    if let Some(value) = tag.strings_of(&ident).next() {
        return Some(value.to_string());
    }
    tag.data().find_map(|(ident, data)| match ident {
        DataIdent::Freeform {
            mean,
            name: data_name,
        } if mean == FREEFORM_MEAN && data_name.eq_ignore_ascii_case(name) => match data {
            Data::Utf8(value) | Data::Utf16(value) => Some(value.clone()),
            _ => None,
        },
        _ => None,
    })
}

/// Remove every freeform atom whose name matches case-insensitively.
///
/// Legacy writers leave lowercase spellings behind; dropping them here keeps
/// a single copy of each attribute on disk.
fn remove_freeform_any_case(tag: &mut mp4ameta::Tag, name: &str) {
    let legacy_names: Vec<String> = tag
        .data()
        .filter_map(|(ident, _data)| match ident {
            DataIdent::Freeform {
                mean,
                name: data_name,
            } if mean == FREEFORM_MEAN && data_name.eq_ignore_ascii_case(name) => {
                Some(data_name.clone())
            }
            _ => None,
        })
        .collect();
    for legacy_name in legacy_names {
        tag.remove_data_of(&FreeformIdent::new(FREEFORM_MEAN, &legacy_name));
    }
}

/// MIME type for an image format.
fn mime_of(fmt: ImgFmt) -> &'static str {
    match fmt {
        ImgFmt::Jpeg => "image/jpeg",
        ImgFmt::Png => "image/png",
        ImgFmt::Bmp => "image/bmp",
    }
}

/// Codec for MPEG-4 audio files.
pub struct Mp4Codec;

impl TagCodec for Mp4Codec {
    fn read_tags(&self, path: &Path) -> crate::Result<TrackMetadata> {
        let tag = mp4ameta::Tag::read_from_path(path)?;
        let mut tags = TrackMetadata::default();

        for field in TagField::ALL {
            let value = match field_atom(field) {
                Atom::Standard(fourcc) => tag.strings_of(&fourcc).next().map(ToString::to_string),
                Atom::Freeform(name) => freeform_string(&tag, name),
            };
            if let Some(value) = value {
                tags.set_text_field(field, value);
            }
        }
        if let Some(value) = freeform_string(&tag, RECORDING_ID_NAME) {
            tags.mb_recording_id = value;
        }

        tags.track_number = tag.track_number().map_or(0, u32::from);
        tags.total_tracks = tag.total_tracks().map_or(0, u32::from);
        tags.disc_number = tag.disc_number().map_or(0, u32::from);
        tags.total_discs = tag.total_discs().map_or(0, u32::from);

        Ok(tags)
    }

    fn read_audio_info(&self, path: &Path) -> crate::Result<AudioInfo> {
        crate::probe::mp4_info(path)
    }

    fn write_tags(&self, path: &Path, tags: &TrackMetadata) -> crate::Result<()> {
        let mut tag = mp4ameta::Tag::read_from_path(path)?;

        // Clear every atom this codec owns before writing, including stale
        // lowercase spellings from legacy tools.
        for field in TagField::ALL {
            match field_atom(field) {
                Atom::Standard(fourcc) => tag.remove_data_of(&fourcc),
                Atom::Freeform(name) => remove_freeform_any_case(&mut tag, name),
            }
        }
        remove_freeform_any_case(&mut tag, RECORDING_ID_NAME);
        tag.remove_data_of(&Fourcc(*b"trkn"));
        tag.remove_data_of(&Fourcc(*b"disk"));

        for field in TagField::ALL {
            let value = tags.text_field(field);
            if value.is_empty() {
                continue;
            }
            match field_atom(field) {
                Atom::Standard(fourcc) => {
                    tag.set_data(fourcc, Data::Utf8(value.to_string()));
                }
                Atom::Freeform(name) => {
                    tag.set_data(
                        FreeformIdent::new(FREEFORM_MEAN, name),
                        Data::Utf8(value.to_string()),
                    );
                }
            }
        }
        if !tags.mb_recording_id.is_empty() {
            tag.set_data(
                FreeformIdent::new(FREEFORM_MEAN, RECORDING_ID_NAME),
                Data::Utf8(tags.mb_recording_id.clone()),
            );
        }

        if tags.track_number > 0 {
            tag.set_track_number(u16::try_from(clamp_ordinal(tags.track_number)).expect("clamped"));
        }
        if tags.total_tracks > 0 {
            tag.set_total_tracks(u16::try_from(clamp_ordinal(tags.total_tracks)).expect("clamped"));
        }
        if tags.disc_number > 0 {
            tag.set_disc_number(u16::try_from(clamp_ordinal(tags.disc_number)).expect("clamped"));
        }
        if tags.total_discs > 0 {
            tag.set_total_discs(u16::try_from(clamp_ordinal(tags.total_discs)).expect("clamped"));
        }

        if let Some(data) = &tags.cover_art {
            let fmt = match crate::coverart::sniff_mime(data) {
                "image/png" => ImgFmt::Png,
                "image/bmp" => ImgFmt::Bmp,
                _ => ImgFmt::Jpeg,
            };
            tag.set_artwork(mp4ameta::Img {
                fmt,
                data: data.clone(),
            });
        }

        tag.write_to_path(path)?;
        Ok(())
    }

    fn embedded_art(&self, path: &Path) -> crate::Result<Option<Artwork>> {
        let tag = mp4ameta::Tag::read_from_path(path)?;
        Ok(tag.artwork().map(|img| Artwork {
            data: img.data.to_vec(),
            mime: mime_of(img.fmt).to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_of() {
        assert_eq!(mime_of(ImgFmt::Jpeg), "image/jpeg");
        assert_eq!(mime_of(ImgFmt::Png), "image/png");
    }

    #[test]
    fn test_atom_table_has_no_duplicates() {
        // Two fields mapped to the same atom would overwrite each other on
        // write.
        let mut seen = std::collections::HashSet::new();
        for field in TagField::ALL {
            let key = match field_atom(field) {
                Atom::Standard(fourcc) => format!("{fourcc:?}"),
                Atom::Freeform(name) => name.to_ascii_uppercase(),
            };
            assert!(seen.insert(key), "duplicate atom for {field:?}");
        }
    }
}
