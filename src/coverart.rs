// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Cover art extraction.

use crate::tag::{codec_for_path, Artwork};
use std::fs;
use std::path::Path;

/// Folder-file base names that count as cover art, in priority order.
const COVER_FILE_NAMES: [&str; 5] = ["cover", "folder", "album", "front", "artwork"];

/// Extensions that count as cover art, in priority order.
const COVER_FILE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Guess the MIME type of an image from its magic bytes.
///
/// Falls back to JPEG, which is what unidentified embedded art almost always
/// is.
#[must_use]
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        "image/png"
    } else if data.starts_with(b"BM") {
        "image/bmp"
    } else {
        "image/jpeg"
    }
}

/// MIME type for a cover file extension.
fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        _ => "image/jpeg",
    }
}

/// Extract cover art for the given audio file.
///
/// Embedded art wins; otherwise the containing directory is searched for the
/// conventional cover files (case-insensitive). A file without any art is
/// `Ok(None)`, not an error.
///
/// # Errors
///
/// Returns an error if the audio container cannot be parsed or the directory
/// cannot be listed.
pub fn extract(path: &Path) -> crate::Result<Option<Artwork>> {
    if let Some(artwork) = codec_for_path(path)?.embedded_art(path)? {
        return Ok(Some(artwork));
    }

    let Some(dir) = path.parent() else {
        return Ok(None);
    };
    let entries = fs::read_dir(dir)
        .map_err(|err| crate::Error::io(dir, err))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .collect::<Vec<_>>();

    for name in COVER_FILE_NAMES {
        for extension in COVER_FILE_EXTENSIONS {
            let candidate = entries.iter().find(|entry| {
                let stem_matches = entry
                    .file_stem()
                    .and_then(std::ffi::OsStr::to_str)
                    .is_some_and(|stem| stem.eq_ignore_ascii_case(name));
                let extension_matches = entry
                    .extension()
                    .and_then(std::ffi::OsStr::to_str)
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
                stem_matches && extension_matches
            });
            if let Some(cover_path) = candidate {
                let data =
                    fs::read(cover_path).map_err(|err| crate::Error::io(cover_path, err))?;
                log::debug!(
                    "Using folder cover art {} for {}",
                    cover_path.display(),
                    path.display()
                );
                return Ok(Some(Artwork {
                    data,
                    mime: mime_for_extension(extension).to_string(),
                }));
            }
        }
    }
    Ok(None)
}
