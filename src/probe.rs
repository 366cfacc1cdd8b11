// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Audio stream probing.
//!
//! Computes duration, sample rate and bit depth from container headers
//! without decoding any audio frames. Each format's reader either fills the
//! whole [`AudioInfo`] or fails; there are no partial results.

use crate::tag::{extension_of, synchsafe_u32, TagCodec, ID3_FLAG_FOOTER};
use crate::track::{AudioFormat, AudioInfo};
use chrono::TimeDelta;
use std::fs;
use std::path::Path;

/// Bitrates (kbit/s) for MPEG-1 Layer III, indexed by the header's bitrate
/// field. Index 0 is the "free" bitrate, index 15 is forbidden.
const BITRATES_V1_L3: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Bitrates (kbit/s) for MPEG-2/2.5 Layer III.
const BITRATES_V2_L3: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

/// Sample rates for MPEG-1, indexed by the header's sample rate field.
/// MPEG-2 halves these, MPEG-2.5 quarters them.
const SAMPLE_RATES_V1: [u32; 3] = [44_100, 48_000, 32_000];

/// Read the audio stream properties of the file at the given path.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] for extensions without a probe and
/// [`crate::Error::Format`] for streams whose headers cannot be parsed.
pub fn probe(path: &Path) -> crate::Result<AudioInfo> {
    let extension = extension_of(path)?;
    match extension.as_str() {
        "mp3" => mp3_info(path),
        "flac" => flac_info(path),
        "opus" | "ogg" | "oga" => crate::tag::ogg::OggCodec.read_audio_info(path),
        "m4a" | "mp4" => mp4_info(path),
        other => Err(crate::Error::Unsupported(other.to_string())),
    }
}

/// Byte span of an ID3v2 tag at the start of the buffer, `0` if there is
/// none.
fn leading_id3_span(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    let size = synchsafe_u32([data[6], data[7], data[8], data[9]]) as usize;
    let footer = if data[5] & ID3_FLAG_FOOTER != 0 { 10 } else { 0 };
    10 + size + footer
}

/// One parsed MPEG audio frame header.
struct MpegFrame {
    /// Sample rate in Hz.
    sample_rate: u32,
    /// Samples per frame (1152 for MPEG-1 Layer III, 576 for MPEG-2/2.5).
    samples: u32,
    /// Total frame length in bytes, including the header.
    length: usize,
}

/// Parse a Layer III frame header at the given offset.
fn parse_mpeg_frame(data: &[u8], offset: usize) -> Option<MpegFrame> {
    let header = data.get(offset..offset + 4)?;
    if header[0] != 0xff || header[1] & 0xe0 != 0xe0 {
        return None;
    }
    let version_bits = (header[1] >> 3) & 0x03;
    let layer_bits = (header[1] >> 1) & 0x03;
    // Only Layer III is of interest; version bits 0b01 are reserved.
    if layer_bits != 0b01 || version_bits == 0b01 {
        return None;
    }
    let is_v1 = version_bits == 0b11;

    let bitrate_index = usize::from(header[2] >> 4);
    let rate_index = usize::from((header[2] >> 2) & 0x03);
    if rate_index == 3 {
        return None;
    }
    let bitrate = if is_v1 {
        BITRATES_V1_L3[bitrate_index]
    } else {
        BITRATES_V2_L3[bitrate_index]
    };
    if bitrate == 0 {
        return None;
    }

    let sample_rate = match version_bits {
        0b11 => SAMPLE_RATES_V1[rate_index],
        0b10 => SAMPLE_RATES_V1[rate_index] / 2,
        _ => SAMPLE_RATES_V1[rate_index] / 4,
    };
    let samples: u32 = if is_v1 { 1152 } else { 576 };
    let padding = u32::from((header[2] >> 1) & 0x01);

    // frame length = samples/8 * bitrate / sample_rate + padding
    let length = (samples / 8) * bitrate * 1000 / sample_rate + padding;
    Some(MpegFrame {
        sample_rate,
        samples,
        length: length as usize,
    })
}

/// Probe an MP3 file: sample rate from the first frame header, duration from
/// the frame count.
pub(crate) fn mp3_info(path: &Path) -> crate::Result<AudioInfo> {
    let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;
    let mut offset = leading_id3_span(&data);

    // Scan for the first frame sync; some encoders leave junk between the
    // tag and the first frame.
    let first_frame = loop {
        if offset + 4 > data.len() {
            return Err(crate::Error::Format(
                "no MPEG frame sync found".to_string(),
            ));
        }
        if let Some(frame) = parse_mpeg_frame(&data, offset) {
            break frame;
        }
        offset += 1;
    };

    let sample_rate = first_frame.sample_rate;
    let mut total_samples: u64 = 0;
    while let Some(frame) = parse_mpeg_frame(&data, offset) {
        total_samples += u64::from(frame.samples);
        if frame.length == 0 {
            break;
        }
        offset += frame.length;
    }

    let duration_ms = total_samples * 1000 / u64::from(sample_rate);
    Ok(AudioInfo {
        duration: TimeDelta::milliseconds(
            i64::try_from(duration_ms)
                .map_err(|_| crate::Error::Format("implausible MP3 duration".to_string()))?,
        ),
        format: AudioFormat::Mp3,
        sample_rate,
        bit_depth: None,
    })
}

/// Probe a FLAC file by unpacking the STREAMINFO metadata block.
///
/// Bytes 10-17 of the block data pack the sample rate (20 bits), channel
/// count (3 bits), bits per sample (5 bits) and the 36-bit total sample
/// count. A prepended ID3v2 tag is skipped, not removed.
pub(crate) fn flac_info(path: &Path) -> crate::Result<AudioInfo> {
    let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;
    let offset = leading_id3_span(&data);

    let marker = data
        .get(offset..offset + 4)
        .ok_or_else(|| crate::Error::Format("file too short for a FLAC stream".to_string()))?;
    if marker != b"fLaC" {
        return Err(crate::Error::Format("missing fLaC marker".to_string()));
    }

    let block_header = data
        .get(offset + 4..offset + 8)
        .ok_or_else(|| crate::Error::Format("truncated FLAC metadata".to_string()))?;
    if block_header[0] & 0x7f != 0 {
        return Err(crate::Error::Format(
            "first FLAC metadata block is not STREAMINFO".to_string(),
        ));
    }
    let block = data
        .get(offset + 8..offset + 8 + 34)
        .ok_or_else(|| crate::Error::Format("truncated STREAMINFO block".to_string()))?;

    let packed = u64::from_be_bytes(block[10..18].try_into().expect("8 bytes"));
    let sample_rate = u32::try_from(packed >> 44).expect("20-bit value");
    let bits_per_sample = u8::try_from(((packed >> 36) & 0x1f) + 1).expect("5-bit value");
    let total_samples = packed & 0x000f_ffff_ffff;

    if sample_rate == 0 {
        return Err(crate::Error::Format(
            "STREAMINFO declares a zero sample rate".to_string(),
        ));
    }
    let duration_ms = total_samples * 1000 / u64::from(sample_rate);
    Ok(AudioInfo {
        duration: TimeDelta::milliseconds(
            i64::try_from(duration_ms)
                .map_err(|_| crate::Error::Format("implausible FLAC duration".to_string()))?,
        ),
        format: AudioFormat::Flac,
        sample_rate,
        bit_depth: Some(bits_per_sample),
    })
}

/// Find a direct child box and return its payload.
fn child_box<'a>(mut data: &'a [u8], name: &[u8; 4]) -> Option<&'a [u8]> {
    while data.len() >= 8 {
        let size32 = u32::from_be_bytes(data[..4].try_into().expect("4 bytes")) as usize;
        let box_name = &data[4..8];
        let (payload_start, box_size) = if size32 == 1 {
            let large = u64::from_be_bytes(data.get(8..16)?.try_into().expect("8 bytes"));
            (16, usize::try_from(large).ok()?)
        } else if size32 == 0 {
            (8, data.len())
        } else {
            (8, size32)
        };
        if box_size < payload_start || box_size > data.len() {
            return None;
        }
        if box_name == name {
            return Some(&data[payload_start..box_size]);
        }
        data = &data[box_size..];
    }
    None
}

/// Probe an MPEG-4 audio file: duration from `mvhd`, codec and sample
/// properties from the first `stsd` sample description.
pub(crate) fn mp4_info(path: &Path) -> crate::Result<AudioInfo> {
    let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;

    let moov = child_box(&data, b"moov")
        .ok_or_else(|| crate::Error::Format("missing moov box".to_string()))?;
    let mvhd = child_box(moov, b"mvhd")
        .ok_or_else(|| crate::Error::Format("missing mvhd box".to_string()))?;

    let (timescale, movie_duration) = match mvhd.first().copied() {
        Some(0) => {
            let timescale = u32::from_be_bytes(
                mvhd.get(12..16)
                    .ok_or_else(|| crate::Error::Format("truncated mvhd box".to_string()))?
                    .try_into()
                    .expect("4 bytes"),
            );
            let duration = u64::from(u32::from_be_bytes(
                mvhd.get(16..20)
                    .ok_or_else(|| crate::Error::Format("truncated mvhd box".to_string()))?
                    .try_into()
                    .expect("4 bytes"),
            ));
            (timescale, duration)
        }
        Some(1) => {
            let timescale = u32::from_be_bytes(
                mvhd.get(20..24)
                    .ok_or_else(|| crate::Error::Format("truncated mvhd box".to_string()))?
                    .try_into()
                    .expect("4 bytes"),
            );
            let duration = u64::from_be_bytes(
                mvhd.get(24..32)
                    .ok_or_else(|| crate::Error::Format("truncated mvhd box".to_string()))?
                    .try_into()
                    .expect("8 bytes"),
            );
            (timescale, duration)
        }
        _ => {
            return Err(crate::Error::Format(
                "unsupported mvhd version".to_string(),
            ))
        }
    };
    if timescale == 0 {
        return Err(crate::Error::Format("mvhd declares a zero timescale".to_string()));
    }

    let stsd = child_box(moov, b"trak")
        .and_then(|trak| child_box(trak, b"mdia"))
        .and_then(|mdia| child_box(mdia, b"minf"))
        .and_then(|minf| child_box(minf, b"stbl"))
        .and_then(|stbl| child_box(stbl, b"stsd"))
        .ok_or_else(|| crate::Error::Format("missing sample description".to_string()))?;

    // stsd payload: version/flags (4), entry count (4), then the first
    // sample entry: size (4), format (4), 6 reserved bytes, data reference
    // index (2), then the audio sample entry fields.
    let entry = stsd
        .get(8..)
        .ok_or_else(|| crate::Error::Format("truncated stsd box".to_string()))?;
    let format_code: [u8; 4] = entry
        .get(4..8)
        .ok_or_else(|| crate::Error::Format("truncated sample entry".to_string()))?
        .try_into()
        .expect("4 bytes");
    let format = match &format_code {
        b"mp4a" => AudioFormat::Aac,
        b"alac" => AudioFormat::Alac,
        _ => AudioFormat::M4a,
    };

    // Audio sample entry: 8 reserved bytes, channel count (2),
    // sample size (2), 4 predefined/reserved bytes, sample rate (16.16).
    let sample_size = u16::from_be_bytes(
        entry
            .get(26..28)
            .ok_or_else(|| crate::Error::Format("truncated sample entry".to_string()))?
            .try_into()
            .expect("2 bytes"),
    );
    let sample_rate_fixed = u32::from_be_bytes(
        entry
            .get(32..36)
            .ok_or_else(|| crate::Error::Format("truncated sample entry".to_string()))?
            .try_into()
            .expect("4 bytes"),
    );
    let sample_rate = sample_rate_fixed >> 16;
    if sample_rate == 0 {
        return Err(crate::Error::Format(
            "sample entry declares a zero sample rate".to_string(),
        ));
    }

    let duration_ms = movie_duration * 1000 / u64::from(timescale);
    Ok(AudioInfo {
        duration: TimeDelta::milliseconds(
            i64::try_from(duration_ms)
                .map_err(|_| crate::Error::Format("implausible MP4 duration".to_string()))?,
        ),
        format,
        sample_rate,
        bit_depth: (format == AudioFormat::Alac)
            .then(|| u8::try_from(sample_size).ok())
            .flatten(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{
        write_minimal_flac, write_minimal_m4a, write_minimal_mp3, write_mp3_with_legacy_tag,
    };

    macro_rules! unsupported_extension_tests {
        ($($ext:ident),*) => {
            paste::paste! {
                $(
                    #[test]
                    fn [<test_probe_rejects_ $ext>]() {
                        assert!(matches!(
                            probe(Path::new(concat!("/tmp/file.", stringify!($ext)))),
                            Err(crate::Error::Unsupported(_))
                        ));
                    }
                )*
            }
        };
    }

    unsupported_extension_tests!(wav, aiff, wma, ape);

    #[test]
    fn test_mp3_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.mp3");
        // 38 frames of 1152 samples at 44100 Hz is just under one second.
        write_minimal_mp3(&path, 38).unwrap();

        let info = mp3_info(&path).unwrap();
        assert_eq!(info.format, AudioFormat::Mp3);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.bit_depth, None);
        assert_eq!(info.duration.num_milliseconds(), 992);
    }

    #[test]
    fn test_mp3_info_skips_legacy_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.mp3");
        write_mp3_with_legacy_tag(&path).unwrap();

        let info = mp3_info(&path).unwrap();
        assert_eq!(info.sample_rate, 44_100);
    }

    #[test]
    fn test_flac_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.flac");
        write_minimal_flac(&path, 96_000, 24, 96_000 * 30).unwrap();

        let info = flac_info(&path).unwrap();
        assert_eq!(info.format, AudioFormat::Flac);
        assert_eq!(info.sample_rate, 96_000);
        assert_eq!(info.bit_depth, Some(24));
        assert_eq!(info.duration.num_seconds(), 30);
    }

    #[test]
    fn test_flac_info_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.flac");
        std::fs::write(&path, b"not a flac file at all").unwrap();
        assert!(matches!(
            flac_info(&path),
            Err(crate::Error::Format(_))
        ));
    }

    #[test]
    fn test_mp4_info_aac() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.m4a");
        write_minimal_m4a(&path, *b"mp4a", 44_100, 16, 44_100 * 12).unwrap();

        let info = mp4_info(&path).unwrap();
        assert_eq!(info.format, AudioFormat::Aac);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.bit_depth, None);
        assert_eq!(info.duration.num_seconds(), 12);
    }

    #[test]
    fn test_mp4_info_alac() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe-alac.m4a");
        write_minimal_m4a(&path, *b"alac", 48_000, 24, 48_000 * 5).unwrap();

        let info = mp4_info(&path).unwrap();
        assert_eq!(info.format, AudioFormat::Alac);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.bit_depth, Some(24));
    }
}
