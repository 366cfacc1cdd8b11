// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Destination path formatting and templating.

use crate::track::TrackMetadata;
use handlebars::Handlebars;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Characters that are replaced by the sanitizer. Everything else, including
/// spaces and non-ASCII characters, is preserved.
const ILLEGAL_PATH_CHARS: &str = r#"/\:*?"<>|"#;

/// Maximum byte length of a single path segment, for FAT32 safety.
const MAX_SEGMENT_BYTES: usize = 200;

/// Layout of an album's files below a destination root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderStructure {
    /// `"{artist} - {album}/{track} - {title}"`.
    #[default]
    Flat,
    /// `"{artist}/{album}/{track} - {title}"`.
    Hierarchical,
    /// `"{artist} - {album} - {track} - {title}"`.
    Single,
}

impl FolderStructure {
    /// Template name registered for this structure.
    fn template_name(self) -> &'static str {
        match self {
            FolderStructure::Flat => "flat",
            FolderStructure::Hierarchical => "hierarchical",
            FolderStructure::Single => "single",
        }
    }

    /// Default template string for this structure.
    fn default_template(self) -> &'static str {
        match self {
            FolderStructure::Flat => "{{artist}} - {{album}}/{{track}} - {{title}}",
            FolderStructure::Hierarchical => "{{artist}}/{{album}}/{{track}} - {{title}}",
            FolderStructure::Single => "{{artist}} - {{album}} - {{track}} - {{title}}",
        }
    }
}

/// Template strings for the three folder structures.
///
/// `None` keeps the built-in default. Custom templates may additionally
/// reference `{{year}}`, `{{release_type}}` and `{{secondary_type}}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathTemplates {
    /// Template for [`FolderStructure::Flat`].
    pub flat: Option<String>,
    /// Template for [`FolderStructure::Hierarchical`].
    pub hierarchical: Option<String>,
    /// Template for [`FolderStructure::Single`].
    pub single: Option<String>,
}

impl PathTemplates {
    /// The configured template for the structure, or the default.
    fn template_for(&self, structure: FolderStructure) -> &str {
        let custom = match structure {
            FolderStructure::Flat => &self.flat,
            FolderStructure::Hierarchical => &self.hierarchical,
            FolderStructure::Single => &self.single,
        };
        custom
            .as_deref()
            .unwrap_or_else(|| structure.default_template())
    }
}

/// Replace filesystem-hostile characters with `-`.
///
/// Everything outside the replaced set is preserved byte for byte, spaces
/// and Unicode included.
#[must_use]
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if ILLEGAL_PATH_CHARS.contains(c) { '-' } else { c })
        .collect()
}

/// Truncate a path segment to [`MAX_SEGMENT_BYTES`] on a character boundary.
fn truncate_segment(segment: &str) -> &str {
    if segment.len() <= MAX_SEGMENT_BYTES {
        return segment;
    }
    let mut end = MAX_SEGMENT_BYTES;
    while !segment.is_char_boundary(end) {
        end -= 1;
    }
    &segment[..end]
}

/// Values available to path templates.
#[derive(Debug, Clone, Default, Serialize)]
struct PathValues {
    /// Artist component (album artist when available).
    artist: String,
    /// Album title.
    album: String,
    /// Track title.
    title: String,
    /// Preformatted track number (`"TT"` or `"D-TT"`).
    track: String,
    /// Release year, empty when unknown.
    year: String,
    /// Release group primary type.
    release_type: String,
    /// Secondary release type, when the caller supplies one.
    secondary_type: String,
}

impl PathValues {
    /// Build template values from track metadata.
    fn from_metadata(tags: &TrackMetadata, secondary_type: &str) -> Self {
        let artist = [&tags.album_artist, &tags.artist]
            .into_iter()
            .find(|value| !value.is_empty())
            .map_or_else(|| "Unknown".to_string(), Clone::clone);
        let fallback = |value: &str| {
            if value.is_empty() {
                "Unknown".to_string()
            } else {
                value.to_string()
            }
        };
        PathValues {
            artist,
            album: fallback(&tags.album),
            title: fallback(&tags.title),
            track: tags.display_track_number(),
            year: if tags.year() > 0 {
                tags.year().to_string()
            } else {
                String::new()
            },
            release_type: tags.release_type.clone(),
            secondary_type: secondary_type.to_string(),
        }
    }
}

/// Renders relative destination paths for tracks.
///
/// Every template value passes through the sanitizer via the template
/// engine's escape function, so path separators inside tag values can never
/// create extra directories.
#[derive(Debug)]
pub struct PathRenderer {
    /// Compiled templates, one per folder structure.
    handlebars: Handlebars<'static>,
}

impl PathRenderer {
    /// Create a renderer with the built-in templates.
    ///
    /// # Panics
    ///
    /// Never panics; the built-in templates always compile.
    #[must_use]
    pub fn new() -> Self {
        Self::with_templates(&PathTemplates::default()).expect("default templates must compile")
    }

    /// Create a renderer with custom template strings.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the templates does not compile.
    pub fn with_templates(templates: &PathTemplates) -> crate::Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(sanitize);
        for structure in [
            FolderStructure::Flat,
            FolderStructure::Hierarchical,
            FolderStructure::Single,
        ] {
            handlebars
                .register_template_string(
                    structure.template_name(),
                    templates.template_for(structure),
                )
                .map_err(Box::new)?;
        }
        Ok(Self { handlebars })
    }

    /// Render the relative destination path for a track.
    ///
    /// `extension` is the destination file extension without the leading
    /// dot. `secondary_type` may be empty; it is only referenced by custom
    /// templates.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render(
        &self,
        tags: &TrackMetadata,
        structure: FolderStructure,
        extension: &str,
        secondary_type: &str,
    ) -> crate::Result<PathBuf> {
        let values = PathValues::from_metadata(tags, secondary_type);
        let rendered = self
            .handlebars
            .render(structure.template_name(), &values)?;
        let sanitized = rendered.split('/').map(truncate_segment).join("/");
        Ok(PathBuf::from(format!("{sanitized}.{extension}")))
    }
}

impl Default for PathRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tags() -> TrackMetadata {
        TrackMetadata {
            artist: "A/B".to_string(),
            album: "X:Y".to_string(),
            title: "Z?".to_string(),
            track_number: 3,
            disc_number: 2,
            total_discs: 2,
            ..TrackMetadata::default()
        }
    }

    #[test]
    fn test_sanitize_replaces_reserved_characters() {
        let input = r#"a/b\c:d*e?f"g<h>i|j"#;
        let sanitized = sanitize(input);
        assert_eq!(sanitized, "a-b-c-d-e-f-g-h-i-j");
        for c in ILLEGAL_PATH_CHARS.chars() {
            assert!(!sanitized.contains(c));
        }
    }

    #[test]
    fn test_sanitize_preserves_unicode_and_spaces() {
        assert_eq!(sanitize("Sigur Rós — ágætis byrjun"), "Sigur Rós — ágætis byrjun");
    }

    #[test]
    fn test_segment_truncation() {
        let long = "ü".repeat(150);
        // 300 bytes of two-byte characters truncate to a clean boundary.
        let truncated = truncate_segment(&long);
        assert!(truncated.len() <= MAX_SEGMENT_BYTES);
        assert_eq!(truncated.len() % 2, 0);
        assert!(truncated.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn test_flat_render_with_disc_prefix() {
        let renderer = PathRenderer::new();
        let path = renderer
            .render(&sample_tags(), FolderStructure::Flat, "mp3", "")
            .unwrap();
        assert_eq!(path, PathBuf::from("A-B - X-Y/2-03 - Z-.mp3"));
    }

    #[test]
    fn test_hierarchical_render() {
        let renderer = PathRenderer::new();
        let mut tags = sample_tags();
        tags.artist = "A".to_string();
        tags.album = "Al".to_string();
        tags.title = "T".to_string();
        tags.total_discs = 1;
        tags.disc_number = 1;
        let path = renderer
            .render(&tags, FolderStructure::Hierarchical, "flac", "")
            .unwrap();
        assert_eq!(path, PathBuf::from("A/Al/03 - T.flac"));
    }

    #[test]
    fn test_single_render() {
        let renderer = PathRenderer::new();
        let mut tags = sample_tags();
        tags.artist = "A".to_string();
        tags.album = "Al".to_string();
        tags.title = "T".to_string();
        tags.total_discs = 0;
        tags.disc_number = 0;
        let path = renderer
            .render(&tags, FolderStructure::Single, "mp3", "")
            .unwrap();
        assert_eq!(path, PathBuf::from("A - Al - 03 - T.mp3"));
    }

    #[test]
    fn test_album_artist_outranks_track_artist() {
        let renderer = PathRenderer::new();
        let mut tags = sample_tags();
        tags.album_artist = "Album Artist".to_string();
        let path = renderer
            .render(&tags, FolderStructure::Hierarchical, "mp3", "")
            .unwrap();
        assert!(path.starts_with("Album Artist"));
    }

    #[test]
    fn test_custom_template_with_year() {
        let templates = PathTemplates {
            hierarchical: Some("{{artist}}/{{year}} - {{album}}/{{track}} - {{title}}".to_string()),
            ..PathTemplates::default()
        };
        let renderer = PathRenderer::with_templates(&templates).unwrap();
        let mut tags = sample_tags();
        tags.artist = "A".to_string();
        tags.album = "Al".to_string();
        tags.title = "T".to_string();
        tags.date = "1994-05-20".to_string();
        tags.total_discs = 1;
        let path = renderer
            .render(&tags, FolderStructure::Hierarchical, "mp3", "")
            .unwrap();
        assert_eq!(path, PathBuf::from("A/1994 - Al/03 - T.mp3"));
    }

    #[test]
    fn test_unknown_fields_fall_back() {
        let renderer = PathRenderer::new();
        let path = renderer
            .render(
                &TrackMetadata::default(),
                FolderStructure::Flat,
                "mp3",
                "",
            )
            .unwrap();
        assert_eq!(path, PathBuf::from("Unknown - Unknown/00 - Unknown.mp3"));
    }
}
