// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Error and result types.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration Error ({0})")]
    Config(#[from] crate::config::ConfigError),
    /// I/O error, annotated with the path that was accessed.
    #[error("Input/Output error at {}: {}", path.display(), source)]
    Io {
        /// Path that was accessed when the error occurred.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// Malformed container data (e.g. a truncated synchsafe header or a
    /// missing `fLaC` marker after an ID3 strip).
    #[error("Malformed file: {0}")]
    Format(String),
    /// File extension is not supported by any codec.
    #[error("Unsupported file type: {0:?}")]
    Unsupported(String),
    /// The metadata service returned no record.
    #[error("Not found: {0}")]
    NotFound(&'static str),
    /// Operation was canceled or its deadline elapsed.
    #[error("Operation canceled")]
    Canceled,
    /// A transient failure that the retrier may recover from.
    #[error("Transient failure: {0}")]
    Transient(String),
    /// Catalog database access failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// An error occurred while rendering a destination path template.
    #[error("Template formatting failed: {0}")]
    Template(#[from] handlebars::RenderError),
    /// A destination path template failed to compile.
    #[error("Invalid path template: {0}")]
    TemplateInvalid(#[from] Box<handlebars::TemplateError>),
    /// Errors raised by the [`id3`] crate.
    #[cfg(feature = "id3")]
    #[error("Failed to process ID3 tag: {0}")]
    Id3(#[from] id3::Error),
    /// Errors raised by the [`metaflac`] crate.
    #[cfg(feature = "flac")]
    #[error("Failed to process FLAC tag: {0}")]
    Flac(#[from] metaflac::Error),
    /// Errors raised by the [`mp4ameta`] crate.
    #[cfg(feature = "mp4")]
    #[error("Failed to process MP4 atoms: {0}")]
    Mp4(#[from] mp4ameta::Error),
}

impl Error {
    /// Annotate an [`io::Error`] with the path that was accessed.
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Convenience type.
pub type Result<T> = std::result::Result<T, Error>;
