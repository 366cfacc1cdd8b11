// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Generic release trait, independent of the underlying source.

use std::borrow::Cow;

/// Read surface shared by a local file collection and a remote release.
///
/// The reconciler's match ladder only needs these values, so both sides of a
/// comparison implement this trait.
pub trait ReleaseLike {
    /// Release title.
    fn release_title(&self) -> Option<Cow<'_, str>>;
    /// Release artist.
    fn release_artist(&self) -> Option<Cow<'_, str>>;
    /// Number of tracks.
    fn release_track_count(&self) -> Option<usize>;
    /// Release date.
    fn release_date(&self) -> Option<Cow<'_, str>>;
    /// Record label.
    fn record_label(&self) -> Option<Cow<'_, str>>;
    /// Catalog number.
    fn catalog_number(&self) -> Option<Cow<'_, str>>;
    /// Barcode.
    fn barcode(&self) -> Option<Cow<'_, str>>;
    /// MusicBrainz artist ID.
    fn musicbrainz_artist_id(&self) -> Option<Cow<'_, str>>;
    /// MusicBrainz release ID.
    fn musicbrainz_release_id(&self) -> Option<Cow<'_, str>>;
    /// MusicBrainz release group ID.
    fn musicbrainz_release_group_id(&self) -> Option<Cow<'_, str>>;
}
