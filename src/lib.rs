// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Tag pipeline and catalog engine for a local music library manager.
//!
//! The crate ingests audio files from source directories, reads and
//! normalizes tag metadata across MP3, FLAC, Ogg and MP4 containers,
//! matches albums against a MusicBrainz-style metadata service, rewrites
//! tags in place and maintains a queryable catalog that supports
//! differential re-scans. The interactive UI, the playback engine and the
//! HTTP client for the metadata service are external collaborators: the
//! engine talks to them through the [`MetadataService`] trait and the
//! [`ProgressEvent`] channel.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::missing_docs_in_private_items)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![deny(absolute_paths_not_starting_with_crate)]
#![deny(keyword_idents)]
#![deny(macro_use_extern_crate)]
#![deny(missing_abi)]
#![deny(non_ascii_idents)]
#![deny(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unstable_features)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(elided_lifetimes_in_paths)]
#![warn(explicit_outlives_requirements)]
#![warn(let_underscore_drop)]
#![warn(meta_variable_misuse)]
#![warn(noop_method_call)]
#![warn(single_use_lifetimes)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_macro_rules)]
#![warn(unused_qualifications)]
#![warn(unused_results)]
#![warn(variant_size_differences)]

pub mod catalog;
pub mod collection;
pub mod config;
pub mod coverart;
pub mod events;
pub mod exporter;
pub mod musicbrainz;
pub mod orchestrator;
pub mod pathgen;
pub mod probe;
pub mod reconciler;
pub mod release;
pub mod retry;
pub mod tag;
pub mod track;
pub mod util;

mod error;

pub use crate::catalog::Catalog;
pub use crate::collection::Collection;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::events::{BatchSummary, ProgressEvent, ScanStats};
pub use crate::exporter::{ExportTarget, Exporter};
pub use crate::musicbrainz::MetadataService;
pub use crate::orchestrator::{ImportRequest, Orchestrator, RetagRequest};
pub use crate::pathgen::{FolderStructure, PathRenderer};
pub use crate::reconciler::Reconciler;
pub use crate::release::ReleaseLike;
pub use crate::track::{AudioFormat, AudioInfo, FileInfo, TrackMetadata};

/// This crate's name.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// This crate's version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
