// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The import and retag orchestrator.
//!
//! Drives the per-file pipeline: read tags, build the target metadata from
//! the chosen release, write tags (under the retrier), move the file into
//! the destination layout, place cover art and update the catalog. Files
//! are processed sequentially so progress events arrive in index order; a
//! failing file is recorded and the batch continues.

use crate::catalog::Catalog;
use crate::coverart::sniff_mime;
use crate::events::{BatchSummary, ProgressEvent};
use crate::musicbrainz::Release;
use crate::pathgen::{FolderStructure, PathRenderer};
use crate::reconciler::{align_tracks, build_track_metadata};
use crate::retry::retry_with_backoff;
use crate::track::FileInfo;
use crate::util::{copy_file, create_dir_all_with_mode, move_file, FormattedDuration};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Progress of one file through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not started yet.
    Pending,
    /// Tags are being written.
    Tagging,
    /// The file is being moved or copied.
    Moving,
    /// Done.
    Complete,
    /// Failed; the error is recorded and the batch continued.
    Failed,
}

/// Final status of one file of a batch.
#[derive(Debug, Clone)]
pub struct FileStatus {
    /// The source path of the file.
    pub path: PathBuf,
    /// The state the file ended in.
    pub state: FileState,
    /// Destination path, for files that were placed.
    pub destination: Option<PathBuf>,
    /// Error message for failed files.
    pub error: Option<String>,
}

/// A request to import files as one album of the chosen release.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// Source files, in user-specified order.
    pub files: Vec<PathBuf>,
    /// The release the files were matched against.
    pub release: Release,
    /// Root of the destination library.
    pub dest_root: PathBuf,
    /// Destination layout below the root.
    pub structure: FolderStructure,
    /// Move the files instead of copying them.
    pub move_files: bool,
    /// Cover art supplied by the external fetcher, embedded into each file
    /// and placed once per destination directory.
    pub cover_art: Option<Vec<u8>>,
    /// Human-readable description of how the release was matched, for the
    /// `ReleaseSelected` progress event.
    pub search_method: String,
}

/// A request to rewrite tags on files already in the library.
#[derive(Debug, Clone)]
pub struct RetagRequest {
    /// Files to retag, in user-specified order.
    pub files: Vec<PathBuf>,
    /// The release the files were matched against.
    pub release: Release,
    /// Cover art to embed, if any.
    pub cover_art: Option<Vec<u8>>,
    /// See [`ImportRequest::search_method`].
    pub search_method: String,
}

/// Drives import and retag batches against the catalog.
pub struct Orchestrator<'a> {
    /// The catalog that receives the incremental updates.
    catalog: &'a Catalog,
    /// Renderer for destination paths.
    renderer: PathRenderer,
    /// Channel to the UI collaborator.
    events: Sender<ProgressEvent>,
    /// Paths currently owned by a running pipeline; prevents two writers on
    /// the same file.
    busy_paths: Mutex<HashSet<PathBuf>>,
}

/// Removes the guarded path from the busy set on drop.
struct PathGuard<'a> {
    /// The busy set.
    set: &'a Mutex<HashSet<PathBuf>>,
    /// The guarded path.
    path: PathBuf,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .set
            .lock()
            .expect("busy path set poisoned")
            .remove(&self.path);
    }
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator with the default path templates.
    pub fn new(catalog: &'a Catalog, events: Sender<ProgressEvent>) -> Self {
        Self::with_renderer(catalog, events, PathRenderer::new())
    }

    /// Create an orchestrator with a custom path renderer.
    pub fn with_renderer(
        catalog: &'a Catalog,
        events: Sender<ProgressEvent>,
        renderer: PathRenderer,
    ) -> Self {
        Self {
            catalog,
            renderer,
            events,
            busy_paths: Mutex::new(HashSet::new()),
        }
    }

    /// Claim a path for this pipeline.
    fn guard_path(&self, path: &Path) -> Option<PathGuard<'_>> {
        let mut busy = self.busy_paths.lock().expect("busy path set poisoned");
        if busy.insert(path.to_path_buf()) {
            Some(PathGuard {
                set: &self.busy_paths,
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }

    /// Announce the selected release and fetched cover art.
    async fn announce(&self, release: &Release, search_method: &str, cover_art: Option<&[u8]>) {
        let _ = self
            .events
            .send(ProgressEvent::ReleaseSelected {
                release_id: release.id.clone(),
                title: release.title.clone(),
                artist: release.artist.clone(),
                search_method: search_method.to_string(),
            })
            .await;
        if let Some(data) = cover_art {
            let _ = self
                .events
                .send(ProgressEvent::CoverArtFetched {
                    release_id: release.id.clone(),
                    bytes: data.len(),
                })
                .await;
        }
    }

    /// Read the tags of every file in the batch, emitting `TagsRead`
    /// events. Unreadable files yield an error entry.
    async fn read_batch(&self, files: &[PathBuf]) -> Vec<(usize, crate::Result<FileInfo>)> {
        let mut read = Vec::with_capacity(files.len());
        for (index, path) in files.iter().enumerate() {
            let result = crate::tag::read_file_info(path);
            if let Ok(info) = &result {
                log::info!(
                    "Read {}: {} - {} ({})",
                    path.display(),
                    info.tags.artist,
                    info.tags.title,
                    info.audio.duration.formatted_duration()
                );
                let _ = self
                    .events
                    .send(ProgressEvent::TagsRead {
                        path: path.clone(),
                        artist: info.tags.artist.clone(),
                        title: info.tags.title.clone(),
                    })
                    .await;
            }
            read.push((index, result));
        }
        read
    }

    /// Run an import batch.
    ///
    /// Per-file errors mark that file as failed and the batch continues.
    /// Cancellation prevents further files from starting; the file that is
    /// in flight completes or fails naturally. The catalog receives one
    /// incremental update for all successfully placed files at the end.
    ///
    /// # Errors
    ///
    /// Returns an error only if the final catalog update fails; per-file
    /// failures are reported through the returned statuses.
    pub async fn run_import(
        &self,
        request: ImportRequest,
        ctx: &CancellationToken,
    ) -> crate::Result<Vec<FileStatus>> {
        self.announce(&request.release, &request.search_method, request.cover_art.as_deref())
            .await;

        let read = self.read_batch(&request.files).await;
        let readable: Vec<FileInfo> = read
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok().cloned())
            .collect();
        let aligned = align_tracks(&readable, &request.release);
        let mut aligned_iter = aligned.into_iter();

        let mut statuses = Vec::with_capacity(request.files.len());
        let mut skipped = 0;
        let mut art_placed: HashSet<PathBuf> = HashSet::new();

        for (index, result) in &read {
            if ctx.is_cancelled() {
                log::info!("Batch canceled; {} files not started", read.len() - index);
                break;
            }

            let status = match result {
                Err(err) => FileStatus {
                    path: request.files[*index].clone(),
                    state: FileState::Failed,
                    destination: None,
                    error: Some(err.to_string()),
                },
                Ok(_) => {
                    let Some((info, track)) = aligned_iter.next() else {
                        // More local files than release tracks; everything
                        // past the last track cannot be imported.
                        let path = request.files[*index].clone();
                        let status = FileStatus {
                            path: path.clone(),
                            state: FileState::Failed,
                            destination: None,
                            error: Some("no matching release track".to_string()),
                        };
                        let _ = self
                            .events
                            .send(ProgressEvent::FileDone {
                                index: *index,
                                path,
                                error: status.error.clone(),
                            })
                            .await;
                        statuses.push(status);
                        continue;
                    };
                    let outcome = match self.guard_path(&info.path) {
                        None => Err(crate::Error::Transient(format!(
                            "{} is in use by another operation",
                            info.path.display()
                        ))),
                        Some(_guard) => {
                            self.import_one(info, track, &request, &mut art_placed, ctx)
                                .await
                        }
                    };
                    match outcome {
                        Ok((destination, was_skipped)) => {
                            if was_skipped {
                                skipped += 1;
                            }
                            FileStatus {
                                path: info.path.clone(),
                                state: FileState::Complete,
                                destination: Some(destination),
                                error: None,
                            }
                        }
                        Err(err) => FileStatus {
                            path: info.path.clone(),
                            state: FileState::Failed,
                            destination: None,
                            error: Some(err.to_string()),
                        },
                    }
                }
            };

            let _ = self
                .events
                .send(ProgressEvent::FileDone {
                    index: *index,
                    path: status
                        .destination
                        .clone()
                        .unwrap_or_else(|| status.path.clone()),
                    error: status.error.clone(),
                })
                .await;
            statuses.push(status);
        }

        self.finish_batch(&statuses, skipped).await?;
        Ok(statuses)
    }

    /// Run a single file through tag, move and cover-art placement.
    ///
    /// Returns the destination path and whether the move was skipped
    /// because the destination already existed.
    async fn import_one(
        &self,
        info: &FileInfo,
        track: &crate::musicbrainz::Track,
        request: &ImportRequest,
        art_placed: &mut HashSet<PathBuf>,
        ctx: &CancellationToken,
    ) -> crate::Result<(PathBuf, bool)> {
        // Tagging stage.
        let mut target = build_track_metadata(&request.release, track, &info.tags);
        target.cover_art = request.cover_art.clone();
        let path = info.path.clone();
        let target_for_write = target.clone();
        retry_with_backoff(ctx, "write tags", move || {
            let path = path.clone();
            let target = target_for_write.clone();
            async move { crate::tag::write_tags(&path, &target) }
        })
        .await?;

        // Moving stage.
        let extension = crate::tag::extension_of(&info.path)?;
        let relative =
            self.renderer
                .render(&target, request.structure, &extension, "")?;
        let destination = request.dest_root.join(relative);
        let dest_dir = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| request.dest_root.clone());
        create_dir_all_with_mode(&dest_dir, 0o755)?;

        let mut was_skipped = false;
        if destination.exists() {
            log::info!(
                "Destination {} exists, leaving source in place",
                destination.display()
            );
            was_skipped = true;
        } else {
            let source = info.path.clone();
            let move_files = request.move_files;
            let dest = destination.clone();
            retry_with_backoff(ctx, "place file", move || {
                let source = source.clone();
                let dest = dest.clone();
                async move {
                    if move_files {
                        move_file(&source, &dest)
                    } else {
                        copy_file(&source, &dest)
                    }
                }
            })
            .await?;
        }

        // Cover art goes next to the files, once per destination directory.
        if let Some(data) = &request.cover_art {
            if art_placed.insert(dest_dir.clone()) {
                let file_name = match sniff_mime(data) {
                    "image/png" => "cover.png",
                    _ => "cover.jpg",
                };
                let art_path = dest_dir.join(file_name);
                if !art_path.exists() {
                    std::fs::write(&art_path, data)
                        .map_err(|err| crate::Error::io(&art_path, err))?;
                }
            }
        }

        Ok((destination, was_skipped))
    }

    /// Run a retag batch over files already in the library.
    ///
    /// Same pipeline as an import without the moving stage; the catalog
    /// rows of the retagged files are refreshed at the end.
    ///
    /// # Errors
    ///
    /// Returns an error only if the final catalog update fails.
    pub async fn run_retag(
        &self,
        request: RetagRequest,
        ctx: &CancellationToken,
    ) -> crate::Result<Vec<FileStatus>> {
        self.announce(&request.release, &request.search_method, request.cover_art.as_deref())
            .await;

        let read = self.read_batch(&request.files).await;
        let readable: Vec<FileInfo> = read
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok().cloned())
            .collect();
        let aligned = align_tracks(&readable, &request.release);
        let mut aligned_iter = aligned.into_iter();

        let mut statuses = Vec::with_capacity(request.files.len());
        for (index, result) in &read {
            if ctx.is_cancelled() {
                break;
            }

            let status = match result {
                Err(err) => FileStatus {
                    path: request.files[*index].clone(),
                    state: FileState::Failed,
                    destination: None,
                    error: Some(err.to_string()),
                },
                Ok(info) => {
                    let Some((_, track)) = aligned_iter.next() else {
                        let status = FileStatus {
                            path: info.path.clone(),
                            state: FileState::Failed,
                            destination: None,
                            error: Some("no matching release track".to_string()),
                        };
                        let _ = self
                            .events
                            .send(ProgressEvent::FileDone {
                                index: *index,
                                path: info.path.clone(),
                                error: status.error.clone(),
                            })
                            .await;
                        statuses.push(status);
                        continue;
                    };
                    let mut target = build_track_metadata(&request.release, track, &info.tags);
                    target.cover_art = request.cover_art.clone();

                    let outcome = match self.guard_path(&info.path) {
                        None => Err(crate::Error::Transient(format!(
                            "{} is in use by another operation",
                            info.path.display()
                        ))),
                        Some(_guard) => {
                            let path = info.path.clone();
                            let target = target.clone();
                            retry_with_backoff(ctx, "write tags", move || {
                                let path = path.clone();
                                let target = target.clone();
                                async move { crate::tag::write_tags(&path, &target) }
                            })
                            .await
                        }
                    };
                    match outcome {
                        Ok(()) => FileStatus {
                            path: info.path.clone(),
                            state: FileState::Complete,
                            destination: Some(info.path.clone()),
                            error: None,
                        },
                        Err(err) => FileStatus {
                            path: info.path.clone(),
                            state: FileState::Failed,
                            destination: None,
                            error: Some(err.to_string()),
                        },
                    }
                }
            };

            let _ = self
                .events
                .send(ProgressEvent::FileDone {
                    index: *index,
                    path: status.path.clone(),
                    error: status.error.clone(),
                })
                .await;
            statuses.push(status);
        }

        self.finish_batch(&statuses, 0).await?;
        Ok(statuses)
    }

    /// Update the catalog for the placed files and emit the batch summary.
    async fn finish_batch(&self, statuses: &[FileStatus], skipped: usize) -> crate::Result<()> {
        let placed: Vec<PathBuf> = statuses
            .iter()
            .filter_map(|status| status.destination.clone())
            .collect();
        if !placed.is_empty() {
            let _ = self.catalog.upsert_many(&placed)?;
        }

        let summary = BatchSummary {
            total: statuses.len(),
            failed: statuses
                .iter()
                .filter(|status| status.state == FileState::Failed)
                .count(),
            skipped,
        };
        let _ = self
            .events
            .send(ProgressEvent::BatchComplete(summary))
            .await;
        Ok(())
    }
}

#[cfg(all(test, feature = "flac"))]
mod tests {
    use super::*;
    use crate::tag::TagCodec;
    use crate::track::TrackMetadata;
    use crate::util::testing::{fake_release, write_minimal_flac};

    fn write_source_flac(path: &Path, artist: &str, album: &str, title: &str, number: u32) {
        write_minimal_flac(path, 44_100, 16, 44_100).unwrap();
        let tags = TrackMetadata {
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            track_number: number,
            ..TrackMetadata::default()
        };
        crate::tag::flac::FlacCodec.write_tags(path, &tags).unwrap();
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_import_moves_tags_and_indexes() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let file_one = source_dir.path().join("01.flac");
        let file_two = source_dir.path().join("02.flac");
        write_source_flac(&file_one, "Old Artist", "Old Album", "Old T1", 1);
        write_source_flac(&file_two, "Old Artist", "Old Album", "Old T2", 2);

        let release = fake_release("A", "Al", 2);
        let statuses = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![file_one.clone(), file_two.clone()],
                    release,
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Flat,
                    move_files: true,
                    cover_art: None,
                    search_method: "release id in tags".to_string(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|status| status.state == FileState::Complete));
        // Sources were moved away.
        assert!(!file_one.exists());
        let expected = dest_dir.path().join("A - Al/01 - T1.flac");
        assert!(expected.exists());

        // The destination carries the release tags.
        let tags = crate::tag::flac::FlacCodec.read_tags(&expected).unwrap();
        assert_eq!(tags.album, "Al");
        assert_eq!(tags.album_artist, "A");
        assert_eq!(tags.title, "T1");

        // The catalog saw the new paths.
        assert_eq!(catalog.tracks("A", "Al").unwrap().len(), 2);

        // Events arrive in index order and end with the batch summary.
        let events = drain(&mut rx);
        let file_indices: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::FileDone { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(file_indices, vec![0, 1]);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::BatchComplete(summary)) if summary.total == 2 && summary.failed == 0
        ));
        assert!(events.iter().any(|event| matches!(
            event,
            ProgressEvent::ReleaseSelected { search_method, .. }
                if search_method == "release id in tags"
        )));
    }

    #[tokio::test]
    async fn test_import_preserves_existing_genre() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let file = source_dir.path().join("01.flac");
        write_minimal_flac(&file, 44_100, 16, 44_100).unwrap();
        let tags = TrackMetadata {
            title: "Old".to_string(),
            genre: "Jazz".to_string(),
            track_number: 1,
            ..TrackMetadata::default()
        };
        crate::tag::flac::FlacCodec.write_tags(&file, &tags).unwrap();

        // The fixture release carries no genres.
        let release = fake_release("A", "Al", 1);
        let statuses = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![file],
                    release,
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Hierarchical,
                    move_files: false,
                    cover_art: None,
                    search_method: String::new(),
                },
                &ctx,
            )
            .await
            .unwrap();

        let destination = statuses[0].destination.clone().unwrap();
        let tags = crate::tag::flac::FlacCodec.read_tags(&destination).unwrap();
        assert_eq!(tags.genre, "Jazz");
    }

    #[tokio::test]
    async fn test_import_skips_existing_destination() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let file = source_dir.path().join("01.flac");
        write_source_flac(&file, "A", "Al", "T1", 1);

        let existing = dest_dir.path().join("A - Al/01 - T1.flac");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"already here").unwrap();

        let release = fake_release("A", "Al", 1);
        let statuses = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![file.clone()],
                    release,
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Flat,
                    move_files: true,
                    cover_art: None,
                    search_method: String::new(),
                },
                &ctx,
            )
            .await
            .unwrap();

        // Skipping an existing destination is not an error.
        assert_eq!(statuses[0].state, FileState::Complete);
        assert_eq!(std::fs::read(&existing).unwrap(), b"already here");
        // The source was not consumed.
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_import_places_cover_art_once() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let file_one = source_dir.path().join("01.flac");
        let file_two = source_dir.path().join("02.flac");
        write_source_flac(&file_one, "A", "Al", "T1", 1);
        write_source_flac(&file_two, "A", "Al", "T2", 2);

        let release = fake_release("A", "Al", 2);
        let art = vec![0xff, 0xd8, 0xff, 0xe0, 9, 9, 9];
        let _ = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![file_one, file_two],
                    release,
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Flat,
                    move_files: true,
                    cover_art: Some(art.clone()),
                    search_method: String::new(),
                },
                &ctx,
            )
            .await
            .unwrap();

        let cover = dest_dir.path().join("A - Al/cover.jpg");
        assert_eq!(std::fs::read(&cover).unwrap(), art);
        // Embedded too.
        let track = dest_dir.path().join("A - Al/01 - T1.flac");
        let embedded = crate::tag::flac::FlacCodec
            .embedded_art(&track)
            .unwrap()
            .unwrap();
        assert_eq!(embedded.data, art);
    }

    #[tokio::test]
    async fn test_batch_continues_after_file_failure() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let broken = source_dir.path().join("01.flac");
        std::fs::write(&broken, b"not a flac").unwrap();
        let good = source_dir.path().join("02.flac");
        write_source_flac(&good, "A", "Al", "T2", 2);

        let release = fake_release("A", "Al", 2);
        let statuses = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![broken, good],
                    release,
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Flat,
                    move_files: true,
                    cover_art: None,
                    search_method: String::new(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(statuses[0].state, FileState::Failed);
        assert!(statuses[0].error.is_some());
        assert_eq!(statuses[1].state, FileState::Complete);

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::BatchComplete(summary)) if summary.failed == 1
        ));
    }

    #[tokio::test]
    async fn test_retag_rewrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);
        let ctx = CancellationToken::new();

        let file = dir.path().join("01.flac");
        write_source_flac(&file, "Old", "Old Album", "Old Title", 1);

        let release = fake_release("A", "Al", 1);
        let statuses = orchestrator
            .run_retag(
                RetagRequest {
                    files: vec![file.clone()],
                    release,
                    cover_art: None,
                    search_method: "artist and album search".to_string(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(statuses[0].state, FileState::Complete);
        let tags = crate::tag::flac::FlacCodec.read_tags(&file).unwrap();
        assert_eq!(tags.album, "Al");
        assert_eq!(tags.title, "T1");
        // Retagged files are refreshed in the catalog under their old path.
        assert!(catalog.track_by_path(&file).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancellation_stops_remaining_files() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let orchestrator = Orchestrator::new(&catalog, tx);

        let file = source_dir.path().join("01.flac");
        write_source_flac(&file, "A", "Al", "T1", 1);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let statuses = orchestrator
            .run_import(
                ImportRequest {
                    files: vec![file.clone()],
                    release: fake_release("A", "Al", 1),
                    dest_root: dest_dir.path().to_path_buf(),
                    structure: FolderStructure::Flat,
                    move_files: true,
                    cover_art: None,
                    search_method: String::new(),
                },
                &ctx,
            )
            .await
            .unwrap();

        // Nothing started, nothing moved.
        assert!(statuses.is_empty());
        assert!(file.exists());
    }
}
