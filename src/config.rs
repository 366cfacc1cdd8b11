// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration utils.

use crate::pathgen::{FolderStructure, PathRenderer, PathTemplates};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Encountered when the configuration cannot be loaded.
#[derive(Error, Debug)]
#[error("Configuration Error: {0}")]
pub struct ConfigError(#[from] toml::de::Error);

/// Default configuration TOML string.
const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

/// Represents a piece of configuration that can be merged with another one.
trait MergeableConfig {
    /// Merge this configuration object with another one, taking values not set in this object from
    /// the other one (if present).
    fn merge(&self, other: &Self) -> Self;
}

/// Library-level settings.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Where the catalog database lives.
    pub database_path: Option<PathBuf>,
    /// Root directory that imported files are moved into.
    pub destination_root: Option<PathBuf>,
    /// Move files on import instead of copying them.
    pub move_on_import: Option<bool>,
    /// Folder structure below the destination root.
    pub folder_structure: Option<FolderStructure>,
}

impl MergeableConfig for LibraryConfig {
    fn merge(&self, other: &Self) -> Self {
        LibraryConfig {
            database_path: self.database_path.clone().or_else(|| other.database_path.clone()),
            destination_root: self
                .destination_root
                .clone()
                .or_else(|| other.destination_root.clone()),
            move_on_import: self.move_on_import.or(other.move_on_import),
            folder_structure: self.folder_structure.or(other.folder_structure),
        }
    }
}

impl MergeableConfig for PathTemplates {
    fn merge(&self, other: &Self) -> Self {
        PathTemplates {
            flat: self.flat.clone().or_else(|| other.flat.clone()),
            hierarchical: self
                .hierarchical
                .clone()
                .or_else(|| other.hierarchical.clone()),
            single: self.single.clone().or_else(|| other.single.clone()),
        }
    }
}

/// Export settings.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Convert FLAC sources to MP3 on export.
    pub convert_flac: Option<bool>,
}

impl MergeableConfig for ExportConfig {
    fn merge(&self, other: &Self) -> Self {
        ExportConfig {
            convert_flac: self.convert_flac.or(other.convert_flac),
        }
    }
}

/// The main configuration struct.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Library-level settings.
    #[serde(default)]
    pub library: LibraryConfig,
    /// Destination path templates.
    #[serde(default)]
    pub paths: PathTemplates,
    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::load_default().expect("Failed to load default config")
    }
}

impl MergeableConfig for Config {
    /// Merge this configuration object with another one, taking values not set in this object from
    /// the other one (if present).
    fn merge(&self, other: &Self) -> Self {
        Config {
            library: self.library.merge(&other.library),
            paths: self.paths.merge(&other.paths),
            export: self.export.merge(&other.export),
        }
    }
}

impl Config {
    /// Load the configuration from a string slice.
    fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str(text)?;
        Ok(config)
    }

    /// Load the default configuration.
    fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_str(DEFAULT_CONFIG)
    }

    /// Load the configuration from a file located at the given path.
    ///
    /// # Errors
    ///
    /// This method can fail if the file cannot be accessed or if it contains malformed
    /// configuration markup.
    pub fn load_from_path<T: AsRef<Path>>(path: T) -> crate::Result<Self> {
        let text = std::fs::read_to_string(&path)
            .map_err(|err| crate::Error::io(path.as_ref(), err))?;
        let config = Self::load_from_str(&text)?;
        Ok(config)
    }

    /// Merge this configuration struct with the default values.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let default = Self::default();
        self.merge(&default)
    }

    /// Build a path renderer from the configured templates.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured template does not compile.
    pub fn renderer(&self) -> crate::Result<PathRenderer> {
        PathRenderer::with_templates(&self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config = Config::default();
        assert_eq!(config.library.move_on_import, Some(true));
        assert_eq!(config.library.folder_structure, Some(FolderStructure::Flat));
        assert_eq!(config.export.convert_flac, Some(false));
        assert!(config.renderer().is_ok());
    }

    #[test]
    fn test_user_config_merges_over_defaults() {
        let user = Config::load_from_str(
            "[library]\nmove_on_import = false\n\n[paths]\nflat = \"{{artist}}/{{title}}\"\n",
        )
        .unwrap();
        let merged = user.with_defaults();
        assert_eq!(merged.library.move_on_import, Some(false));
        // Values the user did not set come from the defaults.
        assert_eq!(merged.library.folder_structure, Some(FolderStructure::Flat));
        assert_eq!(merged.paths.flat.as_deref(), Some("{{artist}}/{{title}}"));
        assert!(merged.paths.hierarchical.is_none());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(Config::load_from_str("library = \"not a table\"").is_err());
    }
}
