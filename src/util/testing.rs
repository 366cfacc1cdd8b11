// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

#![cfg(any(test, feature = "dev"))]
//! Testing utils: byte-level file fixtures and a canned metadata service.

use crate::musicbrainz::{
    MetadataService, Medium, Release, ReleaseGroup, ReleaseSummary, Track as RemoteTrack,
};
use crate::tag::ogg::{paginate_packets, OggPage};
use crate::track::{AudioFormat, AudioInfo, FileInfo, TrackMetadata};
use chrono::TimeDelta;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;

/// Encode a 4-byte synchsafe integer.
fn synchsafe_bytes(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        (value & 0x7f) as u8,
    ]
}

/// Write a FLAC file consisting of the marker and a single STREAMINFO
/// block. There are no audio frames, which is enough for every metadata
/// code path.
pub(crate) fn write_minimal_flac(
    path: &Path,
    sample_rate: u32,
    bits_per_sample: u8,
    total_samples: u64,
) -> io::Result<()> {
    let mut data = Vec::new();
    data.extend_from_slice(b"fLaC");
    // STREAMINFO, last-metadata-block flag set, 34 bytes long.
    data.push(0x80);
    data.extend_from_slice(&[0x00, 0x00, 0x22]);
    // Min/max block size, min/max frame size.
    data.extend_from_slice(&4096u16.to_be_bytes());
    data.extend_from_slice(&4096u16.to_be_bytes());
    data.extend_from_slice(&[0x00; 3]);
    data.extend_from_slice(&[0x00; 3]);
    // Packed sample rate (20 bits), channels (3), bits per sample (5) and
    // the 36-bit total sample count.
    let packed = (u64::from(sample_rate) << 44)
        | (1u64 << 41)
        | (u64::from(bits_per_sample - 1) << 36)
        | (total_samples & 0x000f_ffff_ffff);
    data.extend_from_slice(&packed.to_be_bytes());
    // MD5 of the unencoded audio.
    data.extend_from_slice(&[0x00; 16]);
    fs::write(path, data)
}

/// One MPEG-1 Layer III frame at 128 kbit/s, 44.1 kHz: a valid sync header
/// followed by a zeroed payload.
fn mp3_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[0] = 0xff;
    frame[1] = 0xfb;
    frame[2] = 0x90;
    frame
}

/// Write an MP3 file made of `frames` identical frames and no tag.
pub(crate) fn write_minimal_mp3(path: &Path, frames: usize) -> io::Result<()> {
    let mut data = Vec::with_capacity(frames * 417);
    for _ in 0..frames {
        data.extend_from_slice(&mp3_frame());
    }
    fs::write(path, data)
}

/// Write an MP3 file with a 257-byte ID3v2.2 tag in front of the frames.
pub(crate) fn write_mp3_with_legacy_tag(path: &Path) -> io::Result<()> {
    let mut data = Vec::new();
    data.extend_from_slice(b"ID3");
    // Version 2.2, no flags.
    data.extend_from_slice(&[0x02, 0x00, 0x00]);
    data.extend_from_slice(&synchsafe_bytes(257));
    data.extend_from_slice(&vec![0u8; 257]);
    data.extend_from_slice(&mp3_frame());
    data.extend_from_slice(&mp3_frame());
    fs::write(path, data)
}

/// Prepend an empty ID3v2.4 header of `body_len` bytes to an existing file.
pub(crate) fn prepend_id3_header(path: &Path, body_len: u32) -> io::Result<()> {
    let existing = fs::read(path)?;
    let mut data = Vec::new();
    data.extend_from_slice(b"ID3");
    data.extend_from_slice(&[0x04, 0x00, 0x00]);
    data.extend_from_slice(&synchsafe_bytes(body_len));
    data.extend_from_slice(&vec![0u8; body_len as usize]);
    data.extend_from_slice(&existing);
    fs::write(path, data)
}

/// Serial number used by the Ogg fixtures.
const OGG_FIXTURE_SERIAL: u32 = 0x6f63_6172;

/// Write the page list of an Ogg fixture: identification page, re-paginated
/// header packets and a final audio page carrying the stream's total
/// granule position.
fn write_ogg_stream(
    path: &Path,
    id_packet: &[u8],
    header_packets: &[Vec<u8>],
    total_granule: u64,
) -> io::Result<()> {
    let mut out = Vec::new();
    let id_page = OggPage {
        // Beginning-of-stream flag.
        header_type: 0x02,
        granule_position: 0,
        serial: OGG_FIXTURE_SERIAL,
        sequence: 0,
        lacing: vec![u8::try_from(id_packet.len()).expect("short id packet")],
        data: id_packet.to_vec(),
    };
    id_page.write_to(&mut out);

    let header_pages = paginate_packets(header_packets, OGG_FIXTURE_SERIAL, 1);
    for page in &header_pages {
        page.write_to(&mut out);
    }

    let audio_page = OggPage {
        // End-of-stream flag.
        header_type: 0x04,
        granule_position: total_granule,
        serial: OGG_FIXTURE_SERIAL,
        sequence: 1 + u32::try_from(header_pages.len()).expect("few header pages"),
        lacing: vec![4],
        data: vec![0u8; 4],
    };
    audio_page.write_to(&mut out);
    fs::write(path, out)
}

/// Encode an empty Vorbis comment body (vendor only).
fn empty_comment_body() -> Vec<u8> {
    let vendor = b"ocarina fixture";
    let mut body = Vec::new();
    body.extend_from_slice(&u32::try_from(vendor.len()).expect("short vendor").to_le_bytes());
    body.extend_from_slice(vendor);
    body.extend_from_slice(&0u32.to_le_bytes());
    body
}

/// Write a minimal Opus-in-Ogg file with the given total sample count (at
/// the fixed 48 kHz granule clock).
pub(crate) fn write_minimal_ogg_opus(path: &Path, total_samples: u64) -> io::Result<()> {
    let mut id_packet = Vec::new();
    id_packet.extend_from_slice(b"OpusHead");
    // Version, channel count, pre-skip, input sample rate, output gain,
    // channel mapping family.
    id_packet.push(1);
    id_packet.push(2);
    id_packet.extend_from_slice(&0u16.to_le_bytes());
    id_packet.extend_from_slice(&48_000u32.to_le_bytes());
    id_packet.extend_from_slice(&0i16.to_le_bytes());
    id_packet.push(0);

    let mut comment_packet = b"OpusTags".to_vec();
    comment_packet.extend_from_slice(&empty_comment_body());

    write_ogg_stream(path, &id_packet, &[comment_packet], total_samples)
}

/// Write a minimal Vorbis-in-Ogg file.
pub(crate) fn write_minimal_ogg_vorbis(
    path: &Path,
    sample_rate: u32,
    total_samples: u64,
) -> io::Result<()> {
    let mut id_packet = Vec::new();
    id_packet.extend_from_slice(b"\x01vorbis");
    // Version, channels, sample rate, bitrate bounds, block sizes, framing.
    id_packet.extend_from_slice(&0u32.to_le_bytes());
    id_packet.push(2);
    id_packet.extend_from_slice(&sample_rate.to_le_bytes());
    id_packet.extend_from_slice(&[0u8; 12]);
    id_packet.push(0xb8);
    id_packet.push(1);

    let mut comment_packet = b"\x03vorbis".to_vec();
    comment_packet.extend_from_slice(&empty_comment_body());
    comment_packet.push(1);

    let mut setup_packet = b"\x05vorbis".to_vec();
    setup_packet.extend_from_slice(&[0u8; 16]);

    write_ogg_stream(
        path,
        &id_packet,
        &[comment_packet, setup_packet],
        total_samples,
    )
}

/// Serialize one MP4 box.
fn mp4_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(
        &u32::try_from(payload.len() + 8)
            .expect("fixture box fits in u32")
            .to_be_bytes(),
    );
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

/// Write a minimal MPEG-4 audio file: `ftyp` plus a `moov` with just enough
/// structure for the probe (movie header and one sample description).
pub(crate) fn write_minimal_m4a(
    path: &Path,
    codec: [u8; 4],
    sample_rate: u32,
    sample_size: u16,
    duration_samples: u64,
) -> io::Result<()> {
    let mut mvhd = Vec::new();
    // Version 0, flags, creation and modification time.
    mvhd.extend_from_slice(&[0u8; 4]);
    mvhd.extend_from_slice(&[0u8; 8]);
    mvhd.extend_from_slice(&sample_rate.to_be_bytes());
    mvhd.extend_from_slice(
        &u32::try_from(duration_samples)
            .expect("fixture duration fits in u32")
            .to_be_bytes(),
    );

    let mut entry = Vec::new();
    entry.extend_from_slice(&36u32.to_be_bytes());
    entry.extend_from_slice(&codec);
    entry.extend_from_slice(&[0u8; 6]);
    entry.extend_from_slice(&1u16.to_be_bytes());
    // Audio sample entry: reserved, channel count, sample size, reserved,
    // 16.16 fixed-point sample rate.
    entry.extend_from_slice(&[0u8; 8]);
    entry.extend_from_slice(&2u16.to_be_bytes());
    entry.extend_from_slice(&sample_size.to_be_bytes());
    entry.extend_from_slice(&[0u8; 4]);
    let rate_fixed =
        u32::try_from(u64::from(sample_rate) << 16).expect("fixture sample rate fits 16.16");
    entry.extend_from_slice(&rate_fixed.to_be_bytes());

    let mut stsd = Vec::new();
    stsd.extend_from_slice(&[0u8; 4]);
    stsd.extend_from_slice(&1u32.to_be_bytes());
    stsd.extend_from_slice(&entry);

    let stbl = mp4_box(b"stbl", &mp4_box(b"stsd", &stsd));
    let minf = mp4_box(b"minf", &stbl);
    let mdia = mp4_box(b"mdia", &minf);
    let trak = mp4_box(b"trak", &mdia);

    let mut moov_payload = mp4_box(b"mvhd", &mvhd);
    moov_payload.extend_from_slice(&trak);

    let mut data = mp4_box(b"ftyp", b"M4A \x00\x00\x00\x00");
    data.extend_from_slice(&mp4_box(b"moov", &moov_payload));
    fs::write(path, data)
}

/// Build a [`FileInfo`] without touching the filesystem.
pub(crate) fn fake_file(
    path: &str,
    artist: &str,
    album: &str,
    title: &str,
    mutate: impl FnOnce(&mut TrackMetadata),
) -> FileInfo {
    let mut tags = TrackMetadata {
        artist: artist.to_string(),
        album: album.to_string(),
        title: title.to_string(),
        ..TrackMetadata::default()
    };
    mutate(&mut tags);
    FileInfo {
        path: path.into(),
        tags,
        audio: AudioInfo {
            duration: TimeDelta::seconds(180),
            format: AudioFormat::Flac,
            sample_rate: 44_100,
            bit_depth: Some(16),
        },
    }
}

/// Build a fully populated single-disc release with `track_count` tracks.
pub(crate) fn fake_release(artist: &str, album: &str, track_count: u32) -> Release {
    let tracks = (1..=track_count)
        .map(|position| RemoteTrack {
            id: format!("track-{position}"),
            recording_id: format!("recording-{position}"),
            position,
            title: format!("T{position}"),
            artist: artist.to_string(),
            length_ms: Some(180_000),
            disc_number: 1,
        })
        .collect();
    Release {
        id: format!("release-{artist}-{album}"),
        title: album.to_string(),
        artist: artist.to_string(),
        artist_id: format!("artist-{artist}"),
        artist_sort: artist.to_string(),
        date: "1994-05-20".to_string(),
        country: "US".to_string(),
        label: "Fixture Records".to_string(),
        catalog_number: "FIX-001".to_string(),
        barcode: String::new(),
        script: "Latn".to_string(),
        status: "official".to_string(),
        genres: Vec::new(),
        media: vec![Medium {
            position: 1,
            format: "CD".to_string(),
            tracks,
        }],
        release_group: Some(ReleaseGroup {
            id: format!("group-{artist}-{album}"),
            title: album.to_string(),
            artist: artist.to_string(),
            primary_type: "Album".to_string(),
            secondary_types: Vec::new(),
            first_release_date: "1994".to_string(),
        }),
    }
}

/// A canned [`MetadataService`] that records its calls.
#[derive(Debug, Default)]
pub(crate) struct FakeMetadataService {
    /// Releases the service knows about.
    releases: Vec<Release>,
    /// Cover art returned for every release, if set.
    cover_art: Option<Vec<u8>>,
    /// Call log, one entry per service call.
    calls: Mutex<Vec<String>>,
}

impl FakeMetadataService {
    /// Create a service that knows exactly one release.
    pub(crate) fn with_release(release: Release) -> Self {
        Self::with_releases(vec![release])
    }

    /// Create a service that knows the given releases.
    pub(crate) fn with_releases(releases: Vec<Release>) -> Self {
        Self {
            releases,
            cover_art: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Serve the given bytes as cover art for every release.
    pub(crate) fn with_cover_art(mut self, data: Vec<u8>) -> Self {
        self.cover_art = Some(data);
        self
    }

    /// The calls made so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// Append a call record.
    fn record(&self, call: String) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    /// All distinct release groups of the known releases.
    fn groups(&self) -> Vec<ReleaseGroup> {
        let mut groups: Vec<ReleaseGroup> = Vec::new();
        for release in &self.releases {
            if let Some(group) = &release.release_group {
                if !groups.iter().any(|existing| existing.id == group.id) {
                    groups.push(group.clone());
                }
            }
        }
        groups
    }
}

impl MetadataService for FakeMetadataService {
    async fn get_release(&self, release_id: &str) -> crate::Result<Release> {
        self.record(format!("get_release:{release_id}"));
        self.releases
            .iter()
            .find(|release| release.id == release_id)
            .cloned()
            .ok_or(crate::Error::NotFound("release"))
    }

    async fn get_release_group_releases(
        &self,
        release_group_id: &str,
    ) -> crate::Result<Vec<ReleaseSummary>> {
        self.record(format!("get_release_group_releases:{release_group_id}"));
        Ok(self
            .releases
            .iter()
            .filter(|release| {
                release
                    .release_group
                    .as_ref()
                    .is_some_and(|group| group.id == release_group_id)
            })
            .map(|release| ReleaseSummary {
                id: release.id.clone(),
                title: release.title.clone(),
                date: release.date.clone(),
                country: release.country.clone(),
                track_count: release.track_count(),
                formats: release
                    .media
                    .iter()
                    .map(|medium| medium.format.clone())
                    .collect(),
            })
            .collect())
    }

    async fn search_release_groups(
        &self,
        artist: &str,
        album: &str,
    ) -> crate::Result<Vec<ReleaseGroup>> {
        self.record(format!("search_release_groups:{artist}:{album}"));
        Ok(self.groups())
    }

    async fn get_artist_release_groups(
        &self,
        artist_id: &str,
    ) -> crate::Result<Vec<ReleaseGroup>> {
        self.record(format!("get_artist_release_groups:{artist_id}"));
        Ok(self
            .releases
            .iter()
            .filter(|release| release.artist_id == artist_id)
            .filter_map(|release| release.release_group.clone())
            .collect())
    }

    async fn get_cover_art(&self, release_id: &str) -> crate::Result<Option<Vec<u8>>> {
        self.record(format!("get_cover_art:{release_id}"));
        Ok(self.cover_art.clone())
    }
}
