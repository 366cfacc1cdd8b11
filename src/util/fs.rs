// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem-related utility functions.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of walking a directory tree.
///
/// Scans treat unreadable subdirectories as skippable, so the walk reports
/// them alongside the files instead of aborting.
#[derive(Debug, Default)]
pub struct FileWalk {
    /// Every file below the root, sorted by path.
    pub files: Vec<PathBuf>,
    /// Directories (or entries) that were skipped because reading them
    /// failed.
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Collect every file below `root`.
///
/// The file list is sorted so repeated walks of an unchanged tree yield the
/// same order. Symlinked directories are followed through `is_dir`, like
/// the rest of the pipeline does.
///
/// # Errors
///
/// Returns an error if the root itself cannot be read; failures further
/// down the tree land in [`FileWalk::failures`].
pub fn walk_files(root: &Path) -> crate::Result<FileWalk> {
    let mut walk = FileWalk::default();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if dir == root => return Err(crate::Error::io(root, err)),
            Err(err) => {
                walk.failures.push((dir, err));
                continue;
            }
        };
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_dir() {
                        pending.push(path);
                    } else {
                        walk.files.push(path);
                    }
                }
                Err(err) => walk.failures.push((dir.clone(), err)),
            }
        }
    }

    walk.files.sort_unstable();
    Ok(walk)
}

/// Copy the file.
///
/// The data is first written to a temporary file in the destination
/// directory and only persisted under the final name when the copy
/// succeeded, so readers never observe a partially copied file.
///
/// # Errors
///
/// Returns an error if the destination is invalid or any I/O step fails.
pub fn copy_file<S: AsRef<Path>, D: AsRef<Path>>(source: S, destination: D) -> crate::Result<()> {
    let dest_filename = destination
        .as_ref()
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| {
            crate::Error::io(
                destination.as_ref(),
                io::Error::other("cannot determine destination file name"),
            )
        })?;
    let dest_dir = destination.as_ref().parent().ok_or_else(|| {
        crate::Error::io(
            destination.as_ref(),
            io::Error::other("cannot determine destination directory"),
        )
    })?;
    create_dir_all_with_mode(dest_dir, 0o755)?;
    let mut temp_destination_file = tempfile::Builder::new()
        .prefix(format!(".ocarina.{dest_filename}").as_str())
        .suffix(".tmp")
        .tempfile_in(dest_dir)
        .map_err(|err| crate::Error::io(dest_dir, err))?;
    let mut source_file =
        fs::File::open(&source).map_err(|err| crate::Error::io(source.as_ref(), err))?;
    let _ = io::copy(&mut source_file, &mut temp_destination_file)
        .map_err(|err| crate::Error::io(source.as_ref(), err))?;

    // When copying succeeded, persist the temporary file at the actual destination.
    let temp_destination = temp_destination_file.into_temp_path();
    temp_destination
        .persist(&destination)
        .map_err(|err| crate::Error::io(destination.as_ref(), err.error))?;
    log::info!(
        "Copied file {} to {}",
        source.as_ref().display(),
        destination.as_ref().display()
    );

    Ok(())
}

/// Move the file.
///
/// # Errors
///
/// Returns an error if neither renaming nor copy-and-delete succeeds.
pub fn move_file<S: AsRef<Path>, D: AsRef<Path>>(source: S, destination: D) -> crate::Result<()> {
    // First, try renaming.
    if let Ok(()) = fs::rename(&source, &destination) {
        log::info!(
            "Renamed file {} to {}",
            source.as_ref().display(),
            destination.as_ref().display()
        );
        return Ok(());
    }

    // If that didn't work, try to copy the source file to a temporary file on the destination
    // filesystem and persist the temporary file under the actual destination path if this
    // succeeds.
    copy_file(&source, destination)?;

    // Then remove the source file.
    fs::remove_file(&source).map_err(|err| crate::Error::io(source.as_ref(), err))?;
    log::info!("Removed file {}", source.as_ref().display());

    Ok(())
}

/// Create the directory and its parents with the given mode (`0o755` for
/// import destinations).
///
/// On non-Unix platforms the mode is ignored.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn create_dir_all_with_mode(path: &Path, mode: u32) -> crate::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|err| crate::Error::io(path, err))
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
        fs::create_dir_all(path).map_err(|err| crate::Error::io(path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_files_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();

        let walk = walk_files(dir.path()).unwrap();
        assert!(walk.failures.is_empty());
        assert_eq!(
            walk.files,
            vec![
                dir.path().join("a.txt"),
                dir.path().join("b.txt"),
                dir.path().join("sub/c.txt"),
            ]
        );
    }

    #[test]
    fn test_walk_files_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(walk_files(&missing).is_err());
    }

    #[test]
    fn test_move_file_across_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.txt");
        let destination = dir.path().join("nested/deeply/dst.txt");
        fs::write(&source, b"payload").unwrap();

        move_file(&source, &destination).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[test]
    fn test_create_dir_all_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");
        create_dir_all_with_mode(&target, 0o755).unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
