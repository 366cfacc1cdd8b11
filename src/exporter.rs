// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Exporting albums to external targets.
//!
//! Copies a materialized album to a removable device or a custom folder
//! with a chosen folder structure. FLAC sources can be converted to MP3 on
//! the way out through an external `ffmpeg` process; everything else is
//! copied byte for byte.

use crate::events::{BatchSummary, ProgressEvent};
use crate::pathgen::{FolderStructure, PathRenderer};
use crate::util::{copy_file, create_dir_all_with_mode};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Mount-point prefixes that mark a mount as removable media.
const REMOVABLE_MOUNT_PREFIXES: [&str; 3] = ["/media/", "/mnt/", "/run/media/"];

/// Bitrate used for FLAC to MP3 conversion.
const CONVERT_BITRATE: &str = "320k";

/// An export destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTarget {
    /// Display name of the target.
    pub name: String,
    /// Filesystem UUID of the device. Empty for custom-folder targets.
    pub device_uuid: String,
    /// Device label, for display only.
    pub device_label: String,
    /// Subfolder below the mount point, or an absolute path for
    /// custom-folder targets.
    pub subfolder: PathBuf,
    /// Folder structure below the target root.
    pub folder_structure: FolderStructure,
}

/// A mounted removable volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Device node (e.g. `/dev/sdb1`).
    pub device: PathBuf,
    /// Where the device is mounted.
    pub mount_point: PathBuf,
}

/// Decode octal escapes in a mount table field (`\040` is a space).
fn decode_mount_escapes(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut position = 0;
    while position < bytes.len() {
        if bytes[position] == b'\\' && position + 3 < bytes.len() {
            let octal = &value[position + 1..position + 4];
            if let Ok(byte) = u8::from_str_radix(octal, 8) {
                decoded.push(byte);
                position += 4;
                continue;
            }
        }
        decoded.push(bytes[position]);
        position += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Parse a platform mount table into the removable volumes it lists.
pub(crate) fn parse_mount_table(content: &str) -> Vec<Volume> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = decode_mount_escapes(fields.next()?);
            REMOVABLE_MOUNT_PREFIXES
                .iter()
                .any(|prefix| mount_point.starts_with(prefix))
                .then(|| Volume {
                    device: PathBuf::from(device),
                    mount_point: PathBuf::from(mount_point),
                })
        })
        .collect()
}

/// List the currently mounted removable volumes.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn list_volumes() -> crate::Result<Vec<Volume>> {
    let mounts = Path::new("/proc/mounts");
    let content =
        std::fs::read_to_string(mounts).map_err(|err| crate::Error::io(mounts, err))?;
    Ok(parse_mount_table(&content))
}

/// Resolve the root directory of an export target.
///
/// Custom-folder targets use their absolute subfolder directly. Device
/// targets are located through their filesystem UUID: the by-uuid symlink
/// names the device node, and the mount table names its mount point.
///
/// # Errors
///
/// Returns [`crate::Error::NotFound`] if the device is not mounted.
pub fn resolve_target_root(target: &ExportTarget) -> crate::Result<PathBuf> {
    if target.device_uuid.is_empty() {
        return Ok(target.subfolder.clone());
    }

    let by_uuid = Path::new("/dev/disk/by-uuid").join(&target.device_uuid);
    let device = std::fs::canonicalize(&by_uuid)
        .map_err(|_| crate::Error::NotFound("export device is not present"))?;
    let volume = list_volumes()?
        .into_iter()
        .find(|volume| {
            std::fs::canonicalize(&volume.device)
                .map(|canonical| canonical == device)
                .unwrap_or(false)
        })
        .ok_or(crate::Error::NotFound("export device is not mounted"))?;
    Ok(volume.mount_point.join(&target.subfolder))
}

/// Destination extension for a source extension under the conversion
/// policy.
fn destination_extension(extension: &str, convert_flac: bool) -> String {
    if convert_flac && extension.eq_ignore_ascii_case("flac") {
        "mp3".to_string()
    } else {
        extension.to_ascii_lowercase()
    }
}

/// Convert a FLAC file to MP3 via the external encoder.
fn convert_with_ffmpeg(source: &Path, destination: &Path) -> crate::Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-i")
        .arg(source)
        .arg("-codec:a")
        .arg("libmp3lame")
        .arg("-b:a")
        .arg(CONVERT_BITRATE)
        .arg("-map_metadata")
        .arg("0")
        .arg("-id3v2_version")
        .arg("3")
        .arg("-y")
        .arg(destination)
        .status()
        .map_err(|err| crate::Error::io(destination, err))?;
    if !status.success() {
        return Err(crate::Error::io(
            destination,
            io::Error::other(format!("ffmpeg exited with {status}")),
        ));
    }
    Ok(())
}

/// Copies or converts albums to an export target.
pub struct Exporter {
    /// Renderer for destination paths.
    renderer: PathRenderer,
    /// Channel to the UI collaborator.
    events: Sender<ProgressEvent>,
}

impl Exporter {
    /// Create an exporter with the default path templates.
    pub fn new(events: Sender<ProgressEvent>) -> Self {
        Self {
            renderer: PathRenderer::new(),
            events,
        }
    }

    /// Export the given files to `target_root` with the chosen structure.
    ///
    /// Files whose destination already exists are skipped. FLAC sources are
    /// converted to MP3 when `convert_flac` is set; all other files are
    /// copied unchanged. Files are processed sequentially and `FileDone`
    /// events arrive in index order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Canceled`] when the token fires between
    /// files. Per-file failures are counted in the summary and do not stop
    /// the batch.
    pub async fn export_album(
        &self,
        files: &[PathBuf],
        target_root: &Path,
        structure: FolderStructure,
        convert_flac: bool,
        ctx: &CancellationToken,
    ) -> crate::Result<BatchSummary> {
        let mut summary = BatchSummary {
            total: files.len(),
            ..BatchSummary::default()
        };

        for (index, source) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(crate::Error::Canceled);
            }

            let result = self
                .export_one(source, target_root, structure, convert_flac)
                .await;
            let (path, error) = match result {
                Ok(ExportOutcome::Placed(destination)) => (destination, None),
                Ok(ExportOutcome::Skipped(destination)) => {
                    summary.skipped += 1;
                    (destination, None)
                }
                Err(err) => {
                    log::warn!("Export of {} failed: {err}", source.display());
                    summary.failed += 1;
                    (source.clone(), Some(err.to_string()))
                }
            };
            let _ = self
                .events
                .send(ProgressEvent::FileDone { index, path, error })
                .await;
        }

        let _ = self
            .events
            .send(ProgressEvent::BatchComplete(summary.clone()))
            .await;
        Ok(summary)
    }

    /// Export a single file.
    async fn export_one(
        &self,
        source: &Path,
        target_root: &Path,
        structure: FolderStructure,
        convert_flac: bool,
    ) -> crate::Result<ExportOutcome> {
        let info = crate::tag::read_file_info(source)?;
        let extension = destination_extension(&crate::tag::extension_of(source)?, convert_flac);
        let relative = self.renderer.render(&info.tags, structure, &extension, "")?;
        let destination = target_root.join(relative);

        if destination.exists() {
            log::debug!("Skipping existing {}", destination.display());
            return Ok(ExportOutcome::Skipped(destination));
        }
        if let Some(parent) = destination.parent() {
            create_dir_all_with_mode(parent, 0o755)?;
        }

        if extension == "mp3" && crate::tag::extension_of(source)?.eq_ignore_ascii_case("flac") {
            convert_with_ffmpeg(source, &destination)?;
        } else {
            copy_file(source, &destination)?;
        }
        Ok(ExportOutcome::Placed(destination))
    }
}

/// What happened to one exported file.
enum ExportOutcome {
    /// The file was copied or converted.
    Placed(PathBuf),
    /// The destination already existed.
    Skipped(PathBuf),
}

#[cfg(all(test, feature = "flac"))]
mod tests {
    use super::*;
    use crate::tag::TagCodec;
    use crate::track::TrackMetadata;
    use crate::util::testing::write_minimal_flac;

    #[test]
    fn test_decode_mount_escapes() {
        assert_eq!(decode_mount_escapes("/media/My\\040Disk"), "/media/My Disk");
        assert_eq!(decode_mount_escapes("/mnt/usb"), "/mnt/usb");
        assert_eq!(
            decode_mount_escapes("/media/tab\\011and\\134slash"),
            "/media/tab\tand\\slash"
        );
        // A trailing backslash without digits stays as-is.
        assert_eq!(decode_mount_escapes("/mnt/odd\\"), "/mnt/odd\\");
    }

    #[test]
    fn test_parse_mount_table() {
        let table = "\
sysfs /sys sysfs rw 0 0
/dev/nvme0n1p2 / ext4 rw 0 0
/dev/sdb1 /media/My\\040Disk vfat rw 0 0
/dev/sdc1 /run/media/user/STICK vfat rw 0 0
/dev/sdd1 /mnt/backup ext4 rw 0 0
";
        let volumes = parse_mount_table(table);
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[0].device, PathBuf::from("/dev/sdb1"));
        assert_eq!(volumes[0].mount_point, PathBuf::from("/media/My Disk"));
        assert_eq!(
            volumes[1].mount_point,
            PathBuf::from("/run/media/user/STICK")
        );
        assert_eq!(volumes[2].mount_point, PathBuf::from("/mnt/backup"));
    }

    #[test]
    fn test_destination_extension() {
        assert_eq!(destination_extension("flac", true), "mp3");
        assert_eq!(destination_extension("FLAC", true), "mp3");
        assert_eq!(destination_extension("flac", false), "flac");
        assert_eq!(destination_extension("mp3", true), "mp3");
        assert_eq!(destination_extension("OPUS", false), "opus");
    }

    #[test]
    fn test_resolve_custom_folder_target() {
        let target = ExportTarget {
            name: "folder".to_string(),
            subfolder: PathBuf::from("/exports/music"),
            ..ExportTarget::default()
        };
        assert_eq!(
            resolve_target_root(&target).unwrap(),
            PathBuf::from("/exports/music")
        );
    }

    fn write_tagged_flac(path: &Path, title: &str, number: u32) {
        write_minimal_flac(path, 44_100, 16, 44_100).unwrap();
        let tags = TrackMetadata {
            artist: "A".to_string(),
            album: "Al".to_string(),
            title: title.to_string(),
            track_number: number,
            ..TrackMetadata::default()
        };
        crate::tag::flac::FlacCodec.write_tags(path, &tags).unwrap();
    }

    #[tokio::test]
    async fn test_export_copies_with_structure() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let exporter = Exporter::new(tx);
        let ctx = CancellationToken::new();

        let source = source_dir.path().join("track.flac");
        write_tagged_flac(&source, "T", 1);

        let summary = exporter
            .export_album(
                &[source],
                target_dir.path(),
                FolderStructure::Hierarchical,
                false,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 0);
        assert!(target_dir.path().join("A/Al/01 - T.flac").exists());

        let mut saw_file_done = false;
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::FileDone { error, .. } = event {
                assert!(error.is_none());
                saw_file_done = true;
            }
        }
        assert!(saw_file_done);
    }

    #[tokio::test]
    async fn test_export_skips_existing_destination() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let exporter = Exporter::new(tx);
        let ctx = CancellationToken::new();

        let source = source_dir.path().join("track.flac");
        write_tagged_flac(&source, "T", 1);

        let existing = target_dir.path().join("A - Al/01 - T.flac");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"keep me").unwrap();

        let summary = exporter
            .export_album(
                &[source],
                target_dir.path(),
                FolderStructure::Flat,
                false,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_export_counts_failures() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let exporter = Exporter::new(tx);
        let ctx = CancellationToken::new();

        let broken = source_dir.path().join("broken.flac");
        std::fs::write(&broken, b"not a flac").unwrap();

        let summary = exporter
            .export_album(
                &[broken],
                target_dir.path(),
                FolderStructure::Flat,
                false,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
    }
}
