// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Matching local files against remote releases and computing tag diffs.

use crate::collection::{Collection, FieldConsensus};
use crate::musicbrainz::{
    MetadataService, Release, ReleaseGroup, ReleaseSummary, Track as RemoteTrack,
};
use crate::release::ReleaseLike;
use crate::track::{FileInfo, TrackMetadata};
use crate::util::normalize;
use futures::stream::{self, StreamExt};

/// Score awarded when the release group's artist matches the local album
/// artist.
const ARTIST_MATCH_SCORE: u32 = 100;

/// Score awarded when the release group's title matches the local album.
const ALBUM_MATCH_SCORE: u32 = 50;

/// Threshold for auto-selecting a release group (artist and album both
/// exact).
const AUTO_SELECT_SCORE: u32 = ARTIST_MATCH_SCORE + ALBUM_MATCH_SCORE;

/// Release group secondary types that are filtered out during ranking.
const EXCLUDED_SECONDARY_TYPES: [&str; 2] = ["Live", "Compilation"];

/// Sentinel for a field whose local values disagree.
const MULTIPLE: &str = "(multiple)";
/// Sentinel for a field no local file has a value for.
const EMPTY: &str = "(empty)";
/// Sentinel for per-track values that stay local.
const SEE_FILES: &str = "(see files)";
/// Sentinel for per-track values that will come from the remote release.
const FROM_REMOTE: &str = "(from MusicBrainz)";
/// Suffix marking a value that is kept because the release offers none.
const PRESERVED_SUFFIX: &str = " (preserved)";

/// How the reconciler arrived at a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// A local file carried a release ID.
    ReleaseIdTag,
    /// A local file carried a release group ID.
    ReleaseGroupIdTag,
    /// A local file carried an artist ID whose release groups were browsed.
    ArtistIdBrowse,
    /// Textual artist and album search.
    TextSearch,
}

impl SearchMethod {
    /// Human-readable description for progress events.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            SearchMethod::ReleaseIdTag => "release id in tags",
            SearchMethod::ReleaseGroupIdTag => "release group id in tags",
            SearchMethod::ArtistIdBrowse => "artist id in tags",
            SearchMethod::TextSearch => "artist and album search",
        }
    }
}

/// Result of the match-selection ladder.
#[derive(Debug, Clone)]
pub enum ReleaseMatch {
    /// A unique match was auto-selected.
    Selected {
        /// The selected release, fully fetched.
        release: Box<Release>,
        /// How it was found.
        method: SearchMethod,
    },
    /// Several release groups remain; the caller must pick one and continue
    /// with [`Reconciler::releases_for_group`].
    GroupCandidates {
        /// Ranked candidates, best first.
        groups: Vec<ReleaseGroup>,
        /// How they were found.
        method: SearchMethod,
    },
    /// Several releases of one group remain; the caller must pick one and
    /// fetch it with the service.
    ReleaseCandidates {
        /// Ranked candidates, best first.
        releases: Vec<ReleaseSummary>,
        /// How they were found.
        method: SearchMethod,
    },
}

/// One field of a tag diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    /// Field name, as shown to the user.
    pub field: &'static str,
    /// The current local value, or a sentinel.
    pub old: String,
    /// The value after retagging, or a sentinel.
    pub new: String,
    /// Whether writing would change the files.
    pub changed: bool,
}

/// The full diff between a local collection and a chosen release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Per-field rows, in display order.
    pub fields: Vec<FieldDiff>,
}

/// Rank release groups by artist and album match.
///
/// Groups are first filtered to primary type `"Album"` excluding the live
/// and compilation secondary types; if that empties the list, the
/// unfiltered list is kept. The sort is stable, so equal scores keep their
/// input order. The second return value is the index of the auto-selected
/// group: the single entry whose artist and album both match exactly.
fn rank_release_groups(
    groups: Vec<ReleaseGroup>,
    local_artist: Option<&str>,
    local_album: Option<&str>,
) -> (Vec<ReleaseGroup>, Option<usize>) {
    let filtered: Vec<ReleaseGroup> = {
        let subset: Vec<ReleaseGroup> = groups
            .iter()
            .filter(|group| {
                group.primary_type.eq_ignore_ascii_case("Album")
                    && !group.secondary_types.iter().any(|secondary| {
                        EXCLUDED_SECONDARY_TYPES
                            .iter()
                            .any(|excluded| secondary.eq_ignore_ascii_case(excluded))
                    })
            })
            .cloned()
            .collect();
        if subset.is_empty() {
            groups
        } else {
            subset
        }
    };

    let score_of = |group: &ReleaseGroup| {
        let mut score = 0;
        if let Some(artist) = local_artist {
            if normalize(&group.artist) == normalize(artist) {
                score += ARTIST_MATCH_SCORE;
            }
        }
        if let Some(album) = local_album {
            if normalize(&group.title) == normalize(album) {
                score += ALBUM_MATCH_SCORE;
            }
        }
        score
    };

    let mut scored: Vec<(u32, ReleaseGroup)> = filtered
        .into_iter()
        .map(|group| (score_of(&group), group))
        .collect();
    scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));

    let auto_selected = (scored
        .iter()
        .filter(|(score, _)| *score >= AUTO_SELECT_SCORE)
        .count()
        == 1)
        .then_some(0);
    let ranked = scored.into_iter().map(|(_, group)| group).collect();
    (ranked, auto_selected)
}

/// Rank the releases of a group against the local file count.
///
/// Sorted by date ascending (unknown dates last), then stably reordered so
/// that releases whose track count equals the local file count come first.
/// The second return value is the index of the auto-selected release: the
/// single one with a matching track count.
fn rank_releases(
    mut releases: Vec<ReleaseSummary>,
    local_track_count: usize,
) -> (Vec<ReleaseSummary>, Option<usize>) {
    releases.sort_by(|a, b| {
        (a.date.is_empty(), a.date.as_str()).cmp(&(b.date.is_empty(), b.date.as_str()))
    });
    releases.sort_by_key(|release| release.track_count != local_track_count);

    let matching = releases
        .iter()
        .filter(|release| release.track_count == local_track_count)
        .count();
    let auto_selected = (matching == 1).then_some(0);
    (releases, auto_selected)
}

/// Align local files to the tracks of a release.
///
/// Pairs are formed by `(disc number, position)` first; if any file stays
/// unmatched the alignment falls back to position only, and finally to the
/// plain positional index.
#[must_use]
pub fn align_tracks<'a>(
    files: &'a [FileInfo],
    release: &'a Release,
) -> Vec<(&'a FileInfo, &'a RemoteTrack)> {
    let tracks: Vec<&RemoteTrack> = release.tracks().collect();

    let by_disc_and_position: Option<Vec<(&FileInfo, &RemoteTrack)>> = files
        .iter()
        .map(|file| {
            tracks
                .iter()
                .find(|track| {
                    file.tags.disc_number == track.disc_number
                        && file.tags.track_number == track.position
                })
                .map(|track| (file, *track))
        })
        .collect();
    if let Some(aligned) = by_disc_and_position {
        return aligned;
    }

    let by_position: Option<Vec<(&FileInfo, &RemoteTrack)>> = files
        .iter()
        .map(|file| {
            tracks
                .iter()
                .find(|track| file.tags.track_number == track.position)
                .map(|track| (file, *track))
        })
        .collect();
    if let Some(aligned) = by_position {
        return aligned;
    }

    files.iter().zip(tracks).collect()
}

/// Build the target metadata for one file from the chosen release.
///
/// `existing` supplies the values that stay local: the genre is preserved
/// when the release contributes none, and the ISRC is never overwritten
/// from release data.
#[must_use]
pub fn build_track_metadata(
    release: &Release,
    track: &RemoteTrack,
    existing: &TrackMetadata,
) -> TrackMetadata {
    let medium = release
        .media
        .iter()
        .find(|medium| medium.position == track.disc_number)
        .or_else(|| release.media.first());
    let release_group = release.release_group.as_ref();

    TrackMetadata {
        title: track.title.clone(),
        artist: if track.artist.is_empty() {
            release.artist.clone()
        } else {
            track.artist.clone()
        },
        album_artist: release.artist.clone(),
        album: release.title.clone(),
        genre: release
            .genres
            .first()
            .cloned()
            .unwrap_or_else(|| existing.genre.clone()),
        artist_sort: release.artist_sort.clone(),
        track_number: track.position,
        total_tracks: medium.map_or(0, |medium| {
            u32::try_from(medium.tracks.len()).unwrap_or(u32::MAX)
        }),
        disc_number: if track.disc_number > 0 {
            track.disc_number
        } else {
            1
        },
        total_discs: u32::try_from(release.media.len()).unwrap_or(u32::MAX),
        date: release.date.clone(),
        original_date: release_group
            .map(|group| group.first_release_date.clone())
            .filter(|date| !date.is_empty())
            .unwrap_or_else(|| release.date.clone()),
        label: release.label.clone(),
        catalog_number: release.catalog_number.clone(),
        barcode: release.barcode.clone(),
        media: medium.map_or_else(String::new, |medium| medium.format.clone()),
        release_status: release.status.clone(),
        release_type: release_group.map_or_else(String::new, |group| group.primary_type.clone()),
        script: release.script.clone(),
        country: release.country.clone(),
        isrc: existing.isrc.clone(),
        mb_artist_id: release.artist_id.clone(),
        mb_release_id: release.id.clone(),
        mb_release_group_id: release_group.map_or_else(String::new, |group| group.id.clone()),
        mb_recording_id: track.recording_id.clone(),
        mb_track_id: track.id.clone(),
        cover_art: None,
    }
}

/// Matches a collection of local files against the metadata service.
#[derive(Debug)]
pub struct Reconciler<'a, S: MetadataService> {
    /// The metadata service to query.
    service: &'a S,
}

impl<'a, S: MetadataService> Reconciler<'a, S> {
    /// Create a reconciler for the given service.
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    /// Run the match-selection ladder for the collection.
    ///
    /// Embedded identifiers take strict priority over textual search: a
    /// release ID in the tags short-circuits everything else, then a release
    /// group ID, then an artist ID, and only then the artist/album search.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] when the service yields no
    /// candidates, or any error the service reports.
    pub async fn find_release(&self, collection: &Collection) -> crate::Result<ReleaseMatch> {
        if let Some(release_id) = collection.musicbrainz_release_id() {
            log::info!("Fetching release {release_id} directly (release id in tags)");
            let release = self.service.get_release(&release_id).await?;
            return Ok(ReleaseMatch::Selected {
                release: Box::new(release),
                method: SearchMethod::ReleaseIdTag,
            });
        }

        if let Some(release_group_id) = collection.musicbrainz_release_group_id() {
            let release_group_id = release_group_id.into_owned();
            return self
                .resolve_group(
                    &release_group_id,
                    collection.len(),
                    SearchMethod::ReleaseGroupIdTag,
                )
                .await;
        }

        let local_artist = collection
            .release_artist()
            .map(std::borrow::Cow::into_owned);
        let local_album = collection.release_title().map(std::borrow::Cow::into_owned);

        let (groups, method) = if let Some(artist_id) = collection.musicbrainz_artist_id() {
            (
                self.service.get_artist_release_groups(&artist_id).await?,
                SearchMethod::ArtistIdBrowse,
            )
        } else {
            (
                self.service
                    .search_release_groups(
                        local_artist.as_deref().unwrap_or_default(),
                        local_album.as_deref().unwrap_or_default(),
                    )
                    .await?,
                SearchMethod::TextSearch,
            )
        };
        if groups.is_empty() {
            return Err(crate::Error::NotFound("no matching release groups"));
        }

        let (ranked, auto_selected) =
            rank_release_groups(groups, local_artist.as_deref(), local_album.as_deref());
        match auto_selected {
            Some(index) => {
                let group_id = ranked[index].id.clone();
                self.resolve_group(&group_id, collection.len(), method).await
            }
            None => Ok(ReleaseMatch::GroupCandidates {
                groups: ranked,
                method,
            }),
        }
    }

    /// Rank the releases of a group and auto-select the unique track-count
    /// match.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] when the group has no releases, or
    /// any error the service reports.
    pub async fn releases_for_group(
        &self,
        release_group_id: &str,
        local_track_count: usize,
        method: SearchMethod,
    ) -> crate::Result<ReleaseMatch> {
        self.resolve_group(release_group_id, local_track_count, method)
            .await
    }

    /// Fetch full details for several candidate releases.
    ///
    /// Up to `connection_limit` requests run concurrently; results arrive in
    /// completion order, not input order.
    pub async fn fetch_releases(
        &self,
        release_ids: &[String],
        connection_limit: usize,
    ) -> Vec<crate::Result<Release>> {
        stream::iter(release_ids)
            .map(|release_id| self.service.get_release(release_id))
            .buffer_unordered(connection_limit.max(1))
            .collect()
            .await
    }

    /// Shared release-step logic of the ladder.
    async fn resolve_group(
        &self,
        release_group_id: &str,
        local_track_count: usize,
        method: SearchMethod,
    ) -> crate::Result<ReleaseMatch> {
        let releases = self
            .service
            .get_release_group_releases(release_group_id)
            .await?;
        if releases.is_empty() {
            return Err(crate::Error::NotFound("release group has no releases"));
        }

        let (ranked, auto_selected) = rank_releases(releases, local_track_count);
        match auto_selected {
            Some(index) => {
                let release = self.service.get_release(&ranked[index].id).await?;
                log::info!(
                    "Auto-selected release {} ({} tracks)",
                    release.id,
                    release.track_count()
                );
                Ok(ReleaseMatch::Selected {
                    release: Box::new(release),
                    method,
                })
            }
            None => Ok(ReleaseMatch::ReleaseCandidates {
                releases: ranked,
                method,
            }),
        }
    }
}

/// One row of the diff for a per-track field (track title, track artist).
///
/// These always carry the fixed sentinels; only a field nobody has a value
/// for shows the empty sentinel instead.
fn per_track_field(field: &'static str, consensus: &FieldConsensus) -> FieldDiff {
    FieldDiff {
        field,
        old: if *consensus == FieldConsensus::Empty {
            EMPTY.to_string()
        } else {
            SEE_FILES.to_string()
        },
        new: FROM_REMOTE.to_string(),
        changed: true,
    }
}

/// One row of the diff for a release-level field.
fn diff_field(
    field: &'static str,
    consensus: &FieldConsensus,
    new_value: &str,
) -> FieldDiff {
    let (old, changed) = match consensus {
        FieldConsensus::Agreed(value) => (value.clone(), value != new_value),
        FieldConsensus::Divergent => (MULTIPLE.to_string(), true),
        FieldConsensus::Empty => (EMPTY.to_string(), !new_value.is_empty()),
    };
    FieldDiff {
        field,
        old,
        new: new_value.to_string(),
        changed,
    }
}

/// Compute the tag diff between a local collection and a chosen release.
///
/// Release-level fields are diffed against the collection's consensus
/// values. Track titles and per-track artists are not reconciled here; they
/// emit fixed sentinels instead of being enumerated. A genre the release
/// does not provide keeps the local value, marked with a `" (preserved)"`
/// suffix.
#[must_use]
pub fn diff(collection: &Collection, release: &Release) -> TagDiff {
    let release_group = release.release_group.as_ref();
    let mut fields = Vec::new();

    fields.push(diff_field(
        "Album",
        &collection.field_consensus(|tags| &tags.album),
        &release.title,
    ));
    fields.push(diff_field(
        "Album Artist",
        &collection.field_consensus(|tags| &tags.album_artist),
        &release.artist,
    ));

    // Track titles and per-track artists are never reconciled at the
    // release level, whether or not the local values agree; both rows
    // signal intent with fixed sentinels instead of enumerating.
    fields.push(per_track_field("Title", &collection.field_consensus(|tags| &tags.title)));
    fields.push(per_track_field(
        "Artist",
        &collection.field_consensus(|tags| &tags.artist),
    ));

    let genre_consensus = collection.field_consensus(|tags| &tags.genre);
    let genre_new = release.genres.first().map_or_else(
        || match &genre_consensus {
            FieldConsensus::Agreed(value) => format!("{value}{PRESERVED_SUFFIX}"),
            _ => String::new(),
        },
        Clone::clone,
    );
    let genre_changed = match (&genre_consensus, release.genres.first()) {
        (FieldConsensus::Agreed(value), Some(new_genre)) => value != new_genre,
        (FieldConsensus::Agreed(_), None) => false,
        (_, Some(_)) => true,
        (_, None) => false,
    };
    fields.push(FieldDiff {
        field: "Genre",
        old: match &genre_consensus {
            FieldConsensus::Agreed(value) => value.clone(),
            FieldConsensus::Divergent => MULTIPLE.to_string(),
            FieldConsensus::Empty => EMPTY.to_string(),
        },
        new: genre_new,
        changed: genre_changed,
    });

    let original_date = release_group
        .map(|group| group.first_release_date.clone())
        .filter(|date| !date.is_empty())
        .unwrap_or_else(|| release.date.clone());
    let release_type =
        release_group.map_or_else(String::new, |group| group.primary_type.clone());
    let release_group_id = release_group.map_or_else(String::new, |group| group.id.clone());
    let media_format = release
        .media
        .first()
        .map_or_else(String::new, |medium| medium.format.clone());

    fields.push(diff_field(
        "Date",
        &collection.field_consensus(|tags| &tags.date),
        &release.date,
    ));
    fields.push(diff_field(
        "Original Date",
        &collection.field_consensus(|tags| &tags.original_date),
        &original_date,
    ));
    fields.push(diff_field(
        "Label",
        &collection.field_consensus(|tags| &tags.label),
        &release.label,
    ));
    fields.push(diff_field(
        "Catalog Number",
        &collection.field_consensus(|tags| &tags.catalog_number),
        &release.catalog_number,
    ));
    fields.push(diff_field(
        "Barcode",
        &collection.field_consensus(|tags| &tags.barcode),
        &release.barcode,
    ));
    fields.push(diff_field(
        "Media",
        &collection.field_consensus(|tags| &tags.media),
        &media_format,
    ));
    fields.push(diff_field(
        "Status",
        &collection.field_consensus(|tags| &tags.release_status),
        &release.status,
    ));
    fields.push(diff_field(
        "Type",
        &collection.field_consensus(|tags| &tags.release_type),
        &release_type,
    ));
    fields.push(diff_field(
        "Script",
        &collection.field_consensus(|tags| &tags.script),
        &release.script,
    ));
    fields.push(diff_field(
        "Country",
        &collection.field_consensus(|tags| &tags.country),
        &release.country,
    ));
    fields.push(diff_field(
        "MusicBrainz Artist Id",
        &collection.field_consensus(|tags| &tags.mb_artist_id),
        &release.artist_id,
    ));
    fields.push(diff_field(
        "MusicBrainz Release Id",
        &collection.field_consensus(|tags| &tags.mb_release_id),
        &release.id,
    ));
    fields.push(diff_field(
        "MusicBrainz Release Group Id",
        &collection.field_consensus(|tags| &tags.mb_release_group_id),
        &release_group_id,
    ));

    TagDiff { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{fake_file, fake_release, FakeMetadataService};

    fn collection_of(files: Vec<FileInfo>) -> Collection {
        Collection::new(files)
    }

    #[test]
    fn test_rank_release_groups_filters_live_and_compilation() {
        let groups = vec![
            ReleaseGroup {
                id: "live".to_string(),
                title: "Al".to_string(),
                artist: "A".to_string(),
                primary_type: "Album".to_string(),
                secondary_types: vec!["Live".to_string()],
                ..ReleaseGroup::default()
            },
            ReleaseGroup {
                id: "studio".to_string(),
                title: "Al".to_string(),
                artist: "A".to_string(),
                primary_type: "Album".to_string(),
                ..ReleaseGroup::default()
            },
        ];
        let (ranked, auto_selected) = rank_release_groups(groups, Some("A"), Some("Al"));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "studio");
        assert_eq!(auto_selected, Some(0));
    }

    #[test]
    fn test_rank_release_groups_keeps_all_when_filter_empties() {
        let groups = vec![ReleaseGroup {
            id: "single".to_string(),
            title: "Al".to_string(),
            artist: "A".to_string(),
            primary_type: "Single".to_string(),
            ..ReleaseGroup::default()
        }];
        let (ranked, _) = rank_release_groups(groups, Some("A"), Some("Al"));
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_rank_release_groups_scoring_is_stable() {
        let groups = vec![
            ReleaseGroup {
                id: "first".to_string(),
                title: "Other".to_string(),
                artist: "A".to_string(),
                primary_type: "Album".to_string(),
                ..ReleaseGroup::default()
            },
            ReleaseGroup {
                id: "second".to_string(),
                title: "Another".to_string(),
                artist: "A".to_string(),
                primary_type: "Album".to_string(),
                ..ReleaseGroup::default()
            },
            ReleaseGroup {
                id: "best".to_string(),
                title: "Al".to_string(),
                artist: "A".to_string(),
                primary_type: "Album".to_string(),
                ..ReleaseGroup::default()
            },
        ];
        let (ranked, auto_selected) = rank_release_groups(groups, Some("a"), Some("AL"));
        assert_eq!(ranked[0].id, "best");
        // Ties keep their input order.
        assert_eq!(ranked[1].id, "first");
        assert_eq!(ranked[2].id, "second");
        assert_eq!(auto_selected, Some(0));
    }

    #[test]
    fn test_no_auto_select_on_two_exact_matches() {
        let make = |id: &str| ReleaseGroup {
            id: id.to_string(),
            title: "Al".to_string(),
            artist: "A".to_string(),
            primary_type: "Album".to_string(),
            ..ReleaseGroup::default()
        };
        let (_, auto_selected) =
            rank_release_groups(vec![make("one"), make("two")], Some("A"), Some("Al"));
        assert_eq!(auto_selected, None);
    }

    #[test]
    fn test_rank_releases_prefers_matching_track_count() {
        let releases = vec![
            ReleaseSummary {
                id: "deluxe".to_string(),
                date: "1990".to_string(),
                track_count: 14,
                ..ReleaseSummary::default()
            },
            ReleaseSummary {
                id: "original".to_string(),
                date: "1994".to_string(),
                track_count: 10,
                ..ReleaseSummary::default()
            },
        ];
        let (ranked, auto_selected) = rank_releases(releases, 10);
        assert_eq!(ranked[0].id, "original");
        assert_eq!(auto_selected, Some(0));
    }

    #[test]
    fn test_rank_releases_sorts_by_date() {
        let releases = vec![
            ReleaseSummary {
                id: "reissue".to_string(),
                date: "2001".to_string(),
                track_count: 10,
                ..ReleaseSummary::default()
            },
            ReleaseSummary {
                id: "undated".to_string(),
                track_count: 10,
                ..ReleaseSummary::default()
            },
            ReleaseSummary {
                id: "first".to_string(),
                date: "1994-05-20".to_string(),
                track_count: 10,
                ..ReleaseSummary::default()
            },
        ];
        let (ranked, auto_selected) = rank_releases(releases, 10);
        assert_eq!(ranked[0].id, "first");
        assert_eq!(ranked[1].id, "reissue");
        assert_eq!(ranked[2].id, "undated");
        // Three releases match the track count; none is unique.
        assert_eq!(auto_selected, None);
    }

    #[tokio::test]
    async fn test_release_id_in_tags_short_circuits() {
        let release = fake_release("A", "Al", 2);
        let service = FakeMetadataService::with_release(release.clone());

        let files = vec![
            fake_file("/s/1.flac", "A", "Al", "T1", |tags| {
                tags.mb_release_id = release.id.clone();
            }),
            fake_file("/s/2.flac", "A", "Al", "T2", |tags| {
                tags.mb_release_id = release.id.clone();
            }),
        ];
        let reconciler = Reconciler::new(&service);
        let matched = reconciler
            .find_release(&collection_of(files))
            .await
            .unwrap();

        match matched {
            ReleaseMatch::Selected { release: selected, method } => {
                assert_eq!(selected.id, release.id);
                assert_eq!(method, SearchMethod::ReleaseIdTag);
                assert_eq!(method.describe(), "release id in tags");
            }
            other => panic!("expected a selected release, got {other:?}"),
        }
        // The ladder went straight to the release fetch.
        assert_eq!(service.calls(), vec![format!("get_release:{}", release.id)]);
    }

    #[tokio::test]
    async fn test_text_search_auto_selects_unique_group_and_release() {
        let release = fake_release("A", "Al", 2);
        let service = FakeMetadataService::with_release(release.clone());

        let files = vec![
            fake_file("/s/1.flac", "A", "Al", "T1", |_| {}),
            fake_file("/s/2.flac", "A", "Al", "T2", |_| {}),
        ];
        let reconciler = Reconciler::new(&service);
        let matched = reconciler
            .find_release(&collection_of(files))
            .await
            .unwrap();

        match matched {
            ReleaseMatch::Selected { release: selected, method } => {
                assert_eq!(selected.id, release.id);
                assert_eq!(method, SearchMethod::TextSearch);
            }
            other => panic!("expected a selected release, got {other:?}"),
        }
        let calls = service.calls();
        assert_eq!(calls[0], "search_release_groups:A:Al");
    }

    #[tokio::test]
    async fn test_match_is_idempotent() {
        let release = fake_release("A", "Al", 2);
        let service = FakeMetadataService::with_release(release.clone());
        let files = || {
            vec![
                fake_file("/s/1.flac", "A", "Al", "T1", |_| {}),
                fake_file("/s/2.flac", "A", "Al", "T2", |_| {}),
            ]
        };

        let reconciler = Reconciler::new(&service);
        let first = reconciler.find_release(&collection_of(files())).await.unwrap();
        let second = reconciler.find_release(&collection_of(files())).await.unwrap();
        match (first, second) {
            (
                ReleaseMatch::Selected { release: a, .. },
                ReleaseMatch::Selected { release: b, .. },
            ) => assert_eq!(a.id, b.id),
            other => panic!("expected two selected releases, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_releases_concurrently() {
        let first = fake_release("A", "Al", 2);
        let second = fake_release("B", "Bl", 3);
        let service = FakeMetadataService::with_releases(vec![first.clone(), second.clone()]);
        let reconciler = Reconciler::new(&service);

        let results = reconciler
            .fetch_releases(
                &[first.id.clone(), second.id.clone(), "missing".to_string()],
                4,
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 2);
        assert_eq!(results.iter().filter(|result| result.is_err()).count(), 1);
    }

    #[test]
    fn test_align_tracks_by_disc_and_position() {
        let mut release = fake_release("A", "Al", 2);
        release.media[0].tracks[0].disc_number = 1;
        release.media[0].tracks[1].disc_number = 1;

        let files = vec![
            fake_file("/s/2.flac", "A", "Al", "T2", |tags| {
                tags.disc_number = 1;
                tags.track_number = 2;
            }),
            fake_file("/s/1.flac", "A", "Al", "T1", |tags| {
                tags.disc_number = 1;
                tags.track_number = 1;
            }),
        ];
        let aligned = align_tracks(&files, &release);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].0.tags.track_number, aligned[0].1.position);
        assert_eq!(aligned[1].0.tags.track_number, aligned[1].1.position);
    }

    #[test]
    fn test_align_tracks_falls_back_to_index() {
        let release = fake_release("A", "Al", 2);
        // No usable track numbers at all.
        let files = vec![
            fake_file("/s/a.flac", "A", "Al", "T1", |_| {}),
            fake_file("/s/b.flac", "A", "Al", "T2", |_| {}),
        ];
        let aligned = align_tracks(&files, &release);
        assert_eq!(aligned[0].1.position, 1);
        assert_eq!(aligned[1].1.position, 2);
    }

    #[test]
    fn test_diff_sentinels() {
        let release = fake_release("A", "Al", 2);
        let files = vec![
            fake_file("/s/1.flac", "A", "Al", "T1", |tags| {
                tags.date = "1990".to_string();
            }),
            fake_file("/s/2.flac", "A", "Al", "T2", |tags| {
                tags.date = "1991".to_string();
            }),
        ];
        let collection = collection_of(files);
        let tag_diff = diff(&collection, &release);

        let field = |name: &str| {
            tag_diff
                .fields
                .iter()
                .find(|row| row.field == name)
                .unwrap_or_else(|| panic!("missing field {name}"))
                .clone()
        };
        // Divergent local dates show the multiple sentinel.
        assert_eq!(field("Date").old, "(multiple)");
        assert!(field("Date").changed);
        // No local label at all.
        assert_eq!(field("Label").old, "(empty)");
        // Titles are per-track.
        assert_eq!(field("Title").old, "(see files)");
        assert_eq!(field("Title").new, "(from MusicBrainz)");
        // The album agrees on both sides.
        assert_eq!(field("Album").old, "Al");
        assert!(!field("Album").changed);
    }

    #[test]
    fn test_diff_artist_always_uses_per_track_sentinels() {
        let release = fake_release("A", "Al", 2);
        // Every file agrees on the artist, and it even matches the release;
        // the row still signals per-track handling instead of a value diff.
        let files = vec![
            fake_file("/s/1.flac", "A", "Al", "T1", |_| {}),
            fake_file("/s/2.flac", "A", "Al", "T2", |_| {}),
        ];
        let tag_diff = diff(&collection_of(files), &release);
        let artist = tag_diff
            .fields
            .iter()
            .find(|row| row.field == "Artist")
            .unwrap();
        assert_eq!(artist.old, "(see files)");
        assert_eq!(artist.new, "(from MusicBrainz)");
        assert!(artist.changed);

        // Only a collection with no artist values at all shows the empty
        // sentinel instead.
        let files = vec![fake_file("/s/1.flac", "", "Al", "T1", |_| {})];
        let tag_diff = diff(&collection_of(files), &release);
        let artist = tag_diff
            .fields
            .iter()
            .find(|row| row.field == "Artist")
            .unwrap();
        assert_eq!(artist.old, "(empty)");
        assert_eq!(artist.new, "(from MusicBrainz)");
    }

    #[test]
    fn test_diff_preserves_genre_without_remote_genre() {
        let release = fake_release("A", "Al", 1);
        let files = vec![fake_file("/s/1.flac", "A", "Al", "T1", |tags| {
            tags.genre = "Jazz".to_string();
        })];
        let collection = collection_of(files);
        let tag_diff = diff(&collection, &release);

        let genre = tag_diff
            .fields
            .iter()
            .find(|row| row.field == "Genre")
            .unwrap();
        assert_eq!(genre.new, "Jazz (preserved)");
        assert!(!genre.changed);
    }

    #[test]
    fn test_diff_is_idempotent() {
        let release = fake_release("A", "Al", 2);
        let files = || {
            vec![
                fake_file("/s/1.flac", "A", "Al", "T1", |_| {}),
                fake_file("/s/2.flac", "A", "Al", "T2", |_| {}),
            ]
        };
        let first = diff(&collection_of(files()), &release);
        let second = diff(&collection_of(files()), &release);
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_track_metadata_preserves_genre() {
        let release = fake_release("A", "Al", 2);
        let existing = TrackMetadata {
            genre: "Jazz".to_string(),
            isrc: "USRC17607839".to_string(),
            ..TrackMetadata::default()
        };
        let track = release.tracks().next().unwrap();
        let built = build_track_metadata(&release, track, &existing);
        assert_eq!(built.genre, "Jazz");
        assert_eq!(built.isrc, "USRC17607839");
        assert_eq!(built.album, "Al");
        assert_eq!(built.album_artist, "A");
        assert_eq!(built.mb_release_id, release.id);
        assert_eq!(built.total_tracks, 2);
        assert_eq!(built.total_discs, 1);
    }
}
