// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for tags in Ogg containers (Opus and Vorbis).
//!
//! There is no crate in our stack that can rewrite the comment header of an
//! Ogg stream, so this module carries its own page layer: a parser that
//! yields pages, a comment-packet editor and a writer that re-emits pages
//! with recomputed checksums. The editor never touches audio pages except to
//! renumber them when the header page count changes.

use crate::tag::{clamp_ordinal, vorbis_key, Artwork, TagCodec, TagField};
use crate::track::{AudioFormat, AudioInfo, TrackMetadata};
use chrono::TimeDelta;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

/// Capture pattern at the start of every Ogg page.
const OGG_MAGIC: [u8; 4] = *b"OggS";
/// Magic of the Opus identification packet.
const OPUS_ID_MAGIC: &[u8] = b"OpusHead";
/// Magic of the Opus comment packet.
const OPUS_TAGS_MAGIC: &[u8] = b"OpusTags";
/// Magic of the Vorbis identification packet.
const VORBIS_ID_MAGIC: &[u8] = b"\x01vorbis";
/// Magic of the Vorbis comment packet.
const VORBIS_COMMENT_MAGIC: &[u8] = b"\x03vorbis";
/// Opus always runs its granule clock at 48 kHz.
const OPUS_SAMPLE_RATE: u32 = 48_000;
/// How far from the end of the file the duration scan looks for the last
/// page.
const LAST_PAGE_SCAN_LIMIT: u64 = 64 * 1024;
/// Header-type flag: this page continues a packet from the previous page.
const PAGE_CONTINUED: u8 = 0x01;

/// One Ogg page, split into its header fields and segment data.
#[derive(Debug, Clone)]
pub(crate) struct OggPage {
    /// Header type flags (continuation, BOS, EOS).
    pub(crate) header_type: u8,
    /// Granule position (codec-specific cumulative sample count).
    pub(crate) granule_position: u64,
    /// Bitstream serial number.
    pub(crate) serial: u32,
    /// Page sequence number.
    pub(crate) sequence: u32,
    /// Lacing values of the segment table.
    pub(crate) lacing: Vec<u8>,
    /// Concatenated segment data.
    pub(crate) data: Vec<u8>,
}

impl OggPage {
    /// Parse the page starting at `offset`. Returns the page and the offset
    /// of the next one.
    fn parse(data: &[u8], offset: usize) -> crate::Result<(OggPage, usize)> {
        let header = data
            .get(offset..offset + 27)
            .ok_or_else(|| crate::Error::Format("truncated Ogg page header".to_string()))?;
        if header[..4] != OGG_MAGIC {
            return Err(crate::Error::Format(
                "missing OggS capture pattern".to_string(),
            ));
        }
        if header[4] != 0 {
            return Err(crate::Error::Format(format!(
                "unsupported Ogg stream structure version {}",
                header[4]
            )));
        }
        let header_type = header[5];
        let granule_position = u64::from_le_bytes(header[6..14].try_into().expect("8 bytes"));
        let serial = u32::from_le_bytes(header[14..18].try_into().expect("4 bytes"));
        let sequence = u32::from_le_bytes(header[18..22].try_into().expect("4 bytes"));
        let segment_count = usize::from(header[26]);

        let lacing = data
            .get(offset + 27..offset + 27 + segment_count)
            .ok_or_else(|| crate::Error::Format("truncated Ogg segment table".to_string()))?
            .to_vec();
        let body_len = lacing.iter().map(|&lace| usize::from(lace)).sum::<usize>();
        let body_start = offset + 27 + segment_count;
        let body = data
            .get(body_start..body_start + body_len)
            .ok_or_else(|| crate::Error::Format("truncated Ogg page body".to_string()))?
            .to_vec();

        Ok((
            OggPage {
                header_type,
                granule_position,
                serial,
                sequence,
                lacing,
                data: body,
            },
            body_start + body_len,
        ))
    }

    /// Serialize the page, computing its checksum.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&OGG_MAGIC);
        out.push(0);
        out.push(self.header_type);
        out.extend_from_slice(&self.granule_position.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.push(u8::try_from(self.lacing.len()).expect("segment count fits in u8"));
        out.extend_from_slice(&self.lacing);
        out.extend_from_slice(&self.data);

        let crc = crc32_ogg(&out[start..]);
        out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
    }
}

/// CRC-32 as used by Ogg: polynomial `0x04c11db7`, no reflection, zero
/// initial value and zero final XOR.
pub(crate) fn crc32_ogg(data: &[u8]) -> u32 {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04c1_1db7
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
        table
    });

    data.iter().fold(0u32, |crc, &byte| {
        (crc << 8) ^ table[usize::from((crc >> 24) as u8 ^ byte)]
    })
}

/// Parse all pages of a physical stream.
fn parse_pages(data: &[u8]) -> crate::Result<Vec<OggPage>> {
    let mut pages = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (page, next) = OggPage::parse(data, offset)?;
        pages.push(page);
        offset = next;
    }
    if pages.is_empty() {
        return Err(crate::Error::Format("file contains no Ogg pages".to_string()));
    }
    Ok(pages)
}

/// Collect `count` whole packets starting at `start_page`.
///
/// Returns the packets and the index of the first page after the last
/// consumed one. Header packets end on page boundaries in a well-formed
/// stream; trailing data on the final consumed page is rejected.
fn collect_packets(
    pages: &[OggPage],
    count: usize,
    start_page: usize,
) -> crate::Result<(Vec<Vec<u8>>, usize)> {
    let mut packets: Vec<Vec<u8>> = Vec::with_capacity(count);
    let mut current = Vec::new();
    for (index, page) in pages.iter().enumerate().skip(start_page) {
        let mut offset = 0;
        for &lace in &page.lacing {
            let lace = usize::from(lace);
            current.extend_from_slice(&page.data[offset..offset + lace]);
            offset += lace;
            if lace < 255 {
                packets.push(std::mem::take(&mut current));
                if packets.len() == count {
                    if offset != page.data.len() {
                        return Err(crate::Error::Format(
                            "audio data shares a page with the stream headers".to_string(),
                        ));
                    }
                    return Ok((packets, index + 1));
                }
            }
        }
    }
    Err(crate::Error::Format(
        "stream ended before all header packets were read".to_string(),
    ))
}

/// Re-paginate packets into pages with granule position 0.
///
/// Used for the rebuilt header pages. Every 255 lacing values open a new
/// page with the continuation flag set.
pub(crate) fn paginate_packets(
    packets: &[Vec<u8>],
    serial: u32,
    first_sequence: u32,
) -> Vec<OggPage> {
    let mut pages: Vec<OggPage> = Vec::new();
    let mut lacing: Vec<u8> = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    // Whether the page currently being assembled continues a packet from the
    // previous page. Only changes when a new page is started.
    let mut page_continued = false;
    let mut sequence = first_sequence;

    let mut flush = |lacing: &mut Vec<u8>, body: &mut Vec<u8>, continued: bool, sequence: &mut u32| {
        pages.push(OggPage {
            header_type: if continued { PAGE_CONTINUED } else { 0 },
            granule_position: 0,
            serial,
            sequence: *sequence,
            lacing: std::mem::take(lacing),
            data: std::mem::take(body),
        });
        *sequence += 1;
    };

    for packet in packets {
        let mut chunks = packet.chunks(255).peekable();
        // A packet whose length is a multiple of 255 needs a closing zero
        // lacing value.
        let needs_terminator = packet.len() % 255 == 0;
        let mut first_chunk = true;
        while let Some(chunk) = chunks.next() {
            if lacing.len() == 255 {
                flush(&mut lacing, &mut body, page_continued, &mut sequence);
                page_continued = !first_chunk;
            }
            let is_last_chunk = chunks.peek().is_none();
            lacing.push(if is_last_chunk && !needs_terminator {
                u8::try_from(chunk.len()).expect("chunk fits in u8")
            } else {
                255
            });
            body.extend_from_slice(chunk);
            first_chunk = false;
        }
        if needs_terminator {
            if lacing.len() == 255 {
                flush(&mut lacing, &mut body, page_continued, &mut sequence);
                page_continued = true;
            }
            lacing.push(0);
        }
    }
    if !lacing.is_empty() {
        flush(&mut lacing, &mut body, page_continued, &mut sequence);
    }
    pages
}

/// The codec identified from the first page of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OggCodecKind {
    /// Opus (`OpusHead` identification packet).
    Opus,
    /// Vorbis (`\x01vorbis` identification packet).
    Vorbis,
}

/// Identify the codec from the identification packet on the first page.
fn identify(first_page: &OggPage) -> crate::Result<OggCodecKind> {
    if first_page.data.starts_with(OPUS_ID_MAGIC) {
        Ok(OggCodecKind::Opus)
    } else if first_page.data.starts_with(VORBIS_ID_MAGIC) {
        Ok(OggCodecKind::Vorbis)
    } else {
        Err(crate::Error::Format(
            "first Ogg packet is neither OpusHead nor a Vorbis identification header".to_string(),
        ))
    }
}

/// Sample rate declared by the identification packet.
fn sample_rate_of(kind: OggCodecKind, id_packet: &[u8]) -> crate::Result<u32> {
    match kind {
        OggCodecKind::Opus => Ok(OPUS_SAMPLE_RATE),
        OggCodecKind::Vorbis => {
            let bytes = id_packet.get(12..16).ok_or_else(|| {
                crate::Error::Format("truncated Vorbis identification header".to_string())
            })?;
            Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
        }
    }
}

/// Decode a Vorbis comment body (after the codec-specific magic).
///
/// Yields the vendor string and the raw `KEY=value` comments.
fn decode_comments(body: &[u8]) -> crate::Result<(String, Vec<(String, String)>)> {
    let read_u32 = |offset: usize| -> crate::Result<usize> {
        body.get(offset..offset + 4)
            .map(|bytes| u32::from_le_bytes(bytes.try_into().expect("4 bytes")) as usize)
            .ok_or_else(|| crate::Error::Format("truncated Vorbis comment block".to_string()))
    };

    let vendor_len = read_u32(0)?;
    let vendor = body
        .get(4..4 + vendor_len)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .ok_or_else(|| crate::Error::Format("truncated Vorbis vendor string".to_string()))?;

    let mut offset = 4 + vendor_len;
    let comment_count = read_u32(offset)?;
    offset += 4;

    // The declared count is untrusted; truncated data ends the loop early.
    let mut comments = Vec::new();
    for _ in 0..comment_count {
        let len = read_u32(offset)?;
        offset += 4;
        let raw = body
            .get(offset..offset + len)
            .ok_or_else(|| crate::Error::Format("truncated Vorbis comment".to_string()))?;
        offset += len;
        let comment = String::from_utf8_lossy(raw);
        if let Some((key, value)) = comment.split_once('=') {
            comments.push((key.to_ascii_uppercase(), value.to_string()));
        }
    }
    Ok((vendor, comments))
}

/// Encode a comment packet for the given codec.
fn encode_comment_packet(
    kind: OggCodecKind,
    vendor: &str,
    comments: &[(String, String)],
) -> Vec<u8> {
    let mut packet = Vec::new();
    match kind {
        OggCodecKind::Opus => packet.extend_from_slice(OPUS_TAGS_MAGIC),
        OggCodecKind::Vorbis => packet.extend_from_slice(VORBIS_COMMENT_MAGIC),
    }
    packet.extend_from_slice(&u32::try_from(vendor.len()).unwrap_or(0).to_le_bytes());
    packet.extend_from_slice(vendor.as_bytes());
    packet.extend_from_slice(&u32::try_from(comments.len()).unwrap_or(0).to_le_bytes());
    for (key, value) in comments {
        let entry = format!("{key}={value}");
        packet.extend_from_slice(&u32::try_from(entry.len()).unwrap_or(0).to_le_bytes());
        packet.extend_from_slice(entry.as_bytes());
    }
    if kind == OggCodecKind::Vorbis {
        // Vorbis headers end with a framing bit.
        packet.push(1);
    }
    packet
}

/// Map tag metadata to the comment list that will be written.
fn comments_from_metadata(tags: &TrackMetadata) -> Vec<(String, String)> {
    let mut comments = Vec::new();
    for field in TagField::ALL {
        let value = tags.text_field(field);
        if !value.is_empty() {
            comments.push((vorbis_key(field).to_string(), value.to_string()));
        }
    }
    if !tags.mb_recording_id.is_empty() {
        comments.push((
            crate::tag::VORBIS_RECORDING_ID_KEY.to_string(),
            tags.mb_recording_id.clone(),
        ));
    }
    for (key, value) in [
        ("TRACKNUMBER", tags.track_number),
        ("TRACKTOTAL", tags.total_tracks),
        ("DISCNUMBER", tags.disc_number),
        ("DISCTOTAL", tags.total_discs),
    ] {
        if value > 0 {
            comments.push((key.to_string(), clamp_ordinal(value).to_string()));
        }
    }
    comments
}

/// Fill tag metadata from a decoded comment list.
fn metadata_from_comments(comments: &[(String, String)]) -> TrackMetadata {
    let mut tags = TrackMetadata::default();
    let first = |key: &str| {
        comments
            .iter()
            .find(|(comment_key, _)| comment_key == key)
            .map(|(_, value)| value.clone())
    };

    for field in TagField::ALL {
        if let Some(value) = first(vorbis_key(field)) {
            tags.set_text_field(field, value);
        }
    }
    if let Some(value) = first(crate::tag::VORBIS_RECORDING_ID_KEY) {
        tags.mb_recording_id = value;
    }
    tags.track_number = first("TRACKNUMBER")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    tags.total_tracks = first("TRACKTOTAL")
        .or_else(|| first("TOTALTRACKS"))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    tags.disc_number = first("DISCNUMBER")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    tags.total_discs = first("DISCTOTAL")
        .or_else(|| first("TOTALDISCS"))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    tags
}

/// Granule position of the last page, found by scanning backward from the
/// end of the file for the capture pattern.
fn last_granule_position(data: &[u8]) -> crate::Result<u64> {
    let scan_start = data
        .len()
        .saturating_sub(usize::try_from(LAST_PAGE_SCAN_LIMIT).unwrap_or(usize::MAX));
    let window = &data[scan_start..];

    let mut candidate = None;
    let mut search_end = window.len();
    while search_end >= 27 {
        let Some(position) = window[..search_end]
            .windows(4)
            .rposition(|bytes| *bytes == OGG_MAGIC)
        else {
            break;
        };
        if OggPage::parse(window, position).is_ok() {
            candidate = Some(position);
            break;
        }
        search_end = position + 3;
    }

    let position = candidate.ok_or_else(|| {
        crate::Error::Format("no Ogg page found near the end of the file".to_string())
    })?;
    let granule_bytes = &window[position + 6..position + 14];
    Ok(u64::from_le_bytes(granule_bytes.try_into().expect("8 bytes")))
}

/// Number of header packets that follow the identification packet.
fn trailing_header_packets(kind: OggCodecKind) -> usize {
    match kind {
        // OpusTags only.
        OggCodecKind::Opus => 1,
        // Comment header and setup header.
        OggCodecKind::Vorbis => 2,
    }
}

/// Codec for Opus and Vorbis streams in Ogg containers.
pub struct OggCodec;

impl OggCodec {
    /// Parse the stream and return its pages, codec kind and header packets
    /// (comment packet first), plus the index of the first audio page.
    fn parse(data: &[u8]) -> crate::Result<(Vec<OggPage>, OggCodecKind, Vec<Vec<u8>>, usize)> {
        let pages = parse_pages(data)?;
        let kind = identify(&pages[0])?;
        let (header_packets, audio_start) =
            collect_packets(&pages, trailing_header_packets(kind), 1)?;

        let expected_magic = match kind {
            OggCodecKind::Opus => OPUS_TAGS_MAGIC,
            OggCodecKind::Vorbis => VORBIS_COMMENT_MAGIC,
        };
        if !header_packets[0].starts_with(expected_magic) {
            return Err(crate::Error::Format(
                "second Ogg packet is not a comment header".to_string(),
            ));
        }
        Ok((pages, kind, header_packets, audio_start))
    }

    /// Decoded comment list of the file.
    fn read_comments(path: &Path) -> crate::Result<(String, Vec<(String, String)>)> {
        let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;
        let (_pages, kind, header_packets, _audio_start) = Self::parse(&data)?;
        let magic_len = match kind {
            OggCodecKind::Opus => OPUS_TAGS_MAGIC.len(),
            OggCodecKind::Vorbis => VORBIS_COMMENT_MAGIC.len(),
        };
        decode_comments(&header_packets[0][magic_len..])
    }
}

impl TagCodec for OggCodec {
    fn read_tags(&self, path: &Path) -> crate::Result<TrackMetadata> {
        let (_vendor, comments) = Self::read_comments(path)?;
        Ok(metadata_from_comments(&comments))
    }

    fn read_audio_info(&self, path: &Path) -> crate::Result<AudioInfo> {
        let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;
        let pages = parse_pages(&data)?;
        let kind = identify(&pages[0])?;
        let sample_rate = sample_rate_of(kind, &pages[0].data)?;
        let granule = last_granule_position(&data)?;

        let clock_rate = match kind {
            OggCodecKind::Opus => u64::from(OPUS_SAMPLE_RATE),
            OggCodecKind::Vorbis => u64::from(sample_rate),
        };
        let duration_ms = if clock_rate == 0 {
            0
        } else {
            granule.saturating_mul(1000) / clock_rate
        };

        Ok(AudioInfo {
            duration: TimeDelta::milliseconds(
                i64::try_from(duration_ms).map_err(|_| {
                    crate::Error::Format("implausible Ogg stream duration".to_string())
                })?,
            ),
            format: match kind {
                OggCodecKind::Opus => AudioFormat::Opus,
                OggCodecKind::Vorbis => AudioFormat::Vorbis,
            },
            sample_rate,
            bit_depth: None,
        })
    }

    fn write_tags(&self, path: &Path, tags: &TrackMetadata) -> crate::Result<()> {
        let data = fs::read(path).map_err(|err| crate::Error::io(path, err))?;
        let (pages, kind, header_packets, audio_start) = Self::parse(&data)?;

        // Prior tags are cleared wholesale; only the vendor string survives.
        let magic_len = match kind {
            OggCodecKind::Opus => OPUS_TAGS_MAGIC.len(),
            OggCodecKind::Vorbis => VORBIS_COMMENT_MAGIC.len(),
        };
        let (vendor, _old_comments) = decode_comments(&header_packets[0][magic_len..])?;
        let comment_packet = encode_comment_packet(kind, &vendor, &comments_from_metadata(tags));

        let mut rebuilt_packets = vec![comment_packet];
        if kind == OggCodecKind::Vorbis {
            rebuilt_packets.push(header_packets[1].clone());
        }

        let serial = pages[0].serial;
        let mut out = Vec::with_capacity(data.len());
        pages[0].write_to(&mut out);

        let header_pages = paginate_packets(&rebuilt_packets, serial, 1);
        let mut sequence = 1;
        for page in &header_pages {
            page.write_to(&mut out);
            sequence += 1;
        }

        for page in &pages[audio_start..] {
            let mut renumbered = page.clone();
            renumbered.sequence = sequence;
            renumbered.write_to(&mut out);
            sequence += 1;
        }

        let metadata = fs::metadata(path).map_err(|err| crate::Error::io(path, err))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|err| crate::Error::io(path, err))?;
        temp.write_all(&out)
            .map_err(|err| crate::Error::io(path, err))?;
        temp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|err| crate::Error::io(path, err))?;
        let _ = temp
            .persist(path)
            .map_err(|err| crate::Error::io(path, err.error))?;
        Ok(())
    }

    fn embedded_art(&self, _path: &Path) -> crate::Result<Option<Artwork>> {
        // Ogg streams carry art as a base64 comment; this pipeline relies on
        // the folder-file fallback for them instead.
        Ok(None)
    }
}
