//! MultiTracker module parser.
//!
//! Patterns are lists of track references; tracks are stored once and
//! shared between patterns.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Pattern, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::protracker;
use crate::mod_format::extract_samples;
use crate::note::{finetune_nibble, offset_note, PeriodTable, PERIOD_NOTE_OFFSET};
use crate::pcm::{amiga_rate, PcmEncoding, SampleHeader};
use crate::reader::{bytes_at, has_magic, read_string, u16_le, u8_at};
use crate::s3m_format::pan_nibble;
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "MTM";
const HEADER_LEN: usize = 66;
const SAMPLE_LEN: usize = 37;
const ORDERS_LEN: usize = 128;
const TRACK_ROWS: usize = 64;
const TRACK_LEN: usize = TRACK_ROWS * 3;
const PATTERN_TRACKS: usize = 32;
const MAX_CHANNELS: u8 = 32;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    _magic: [u8; 3],
    _version: u8,
    title: [u8; 20],
    track_count: u16,
    last_pattern: u8,
    last_order: u8,
    comment_len: u16,
    sample_count: u8,
    _attributes: u8,
    rows: u8,
    channel_count: u8,
    channel_pan: [u8; 32],
    #[br(count = sample_count)]
    samples: Vec<RawSample>,
    orders: [u8; ORDERS_LEN],
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    name: [u8; 22],
    /// Lengths and loop points are in bytes
    length: u32,
    loop_start: u32,
    loop_end: u32,
    finetune: u8,
    volume: u8,
    attributes: u8,
}

/// Check for "MTM" with version 1.0 and sane counts.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 0, b"MTM") || u8_at(data, 3) != Some(0x10) {
        return false;
    }
    let (Some(last_order), Some(rows), Some(channels)) = (u8_at(data, 27), u8_at(data, 32), u8_at(data, 33)) else {
        return false;
    };
    if last_order >= ORDERS_LEN as u8 || rows as usize > TRACK_ROWS || !(1..=MAX_CHANNELS).contains(&channels) {
        return false;
    }
    let samples = data[30] as usize;
    HEADER_LEN + samples * SAMPLE_LEN + ORDERS_LEN <= data.len()
}

/// Load an MTM file from bytes.
pub fn load_mtm(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    let channels = header.channel_count as usize;
    let rows = match header.rows as usize {
        0 => TRACK_ROWS,
        n => n,
    };
    let pattern_count = header.last_pattern as usize + 1;
    debug!(channels, tracks = header.track_count, patterns = pattern_count, "MTM header parsed");

    let tracks_at = HEADER_LEN + header.samples.len() * SAMPLE_LEN + ORDERS_LEN;
    let sequence_at = tracks_at + header.track_count as usize * TRACK_LEN;
    let comment_at = sequence_at + pattern_count * PATTERN_TRACKS * 2;
    let samples_at = comment_at + header.comment_len as usize;

    let mut patterns = Vec::with_capacity(pattern_count);
    for index in 0..pattern_count {
        let mut pattern = Pattern::new(rows as u16, channels as u8);
        for (ch, channel) in pattern.channels.iter_mut().enumerate() {
            let Some(track) = u16_le(data, sequence_at + (index * PATTERN_TRACKS + ch) * 2) else {
                warn!(pattern = index, "track sequence truncated");
                break;
            };
            // Track 0 is the implicit empty track
            if track == 0 || track > header.track_count {
                continue;
            }
            let start = tracks_at + (track as usize - 1) * TRACK_LEN;
            let Some(bytes) = bytes_at(data, start, TRACK_LEN) else {
                warn!(pattern = index, track, "track data missing");
                continue;
            };
            for (cell, raw) in channel.cells.iter_mut().zip(bytes.chunks_exact(3)) {
                *cell = decode_cell(raw);
            }
        }
        patterns.push(pattern);
    }

    let table = PeriodTable::amiga();
    let headers: Vec<SampleHeader> = header.samples.iter().map(|raw| sample_header(raw, &table)).collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.linear_slides = Some(false);
    asm.channels = header.channel_pan[..channels]
        .iter()
        .map(|&p| ChannelSettings::panned(pan_nibble(p & 0x0F)))
        .collect();
    asm.declared_patterns = pattern_count;
    asm.declared_instruments = header.samples.len();
    asm.patterns = patterns;
    asm.instruments = extract_samples(data, samples_at, &headers);
    asm.order = header.orders[..=header.last_order as usize].iter().map(|&p| p as usize).collect();
    Ok(asm.finish())
}

fn sample_header(raw: &RawSample, table: &PeriodTable) -> SampleHeader {
    let sixteen_bit = raw.attributes & 0x01 != 0;
    let unit = if sixteen_bit { 2 } else { 1 };
    let finetune = finetune_nibble(raw.finetune);
    SampleHeader {
        name: read_string(&raw.name),
        frames: (raw.length / unit) as usize,
        encoding: if sixteen_bit { PcmEncoding::Unsigned16Le } else { PcmEncoding::Unsigned8 },
        rate: amiga_rate(table, finetune),
        loop_start: raw.loop_start / unit,
        loop_end: raw.loop_end / unit,
        looped: raw.loop_end > raw.loop_start + 2,
        volume: raw.volume.min(64),
        finetune,
        pan: None,
    }
}

/// Decode a 3-byte track event: 6-bit note, 6-bit instrument, command
/// nibble and parameter.
fn decode_cell(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    cell.note = offset_note(bytes[0] >> 2, PERIOD_NOTE_OFFSET);
    cell.instrument = ((bytes[0] & 0x03) << 4) | (bytes[1] >> 4);
    cell.push_effect(protracker(bytes[1] & 0x0F, bytes[2]));
    cell
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::{Effect, EffectKind, Note};

    #[test]
    fn track_event_layout() {
        // note 24 (C-4), instrument 0x13, effect A04
        let cell = decode_cell(&[(24 << 2) | 0x01, 0x3A, 0x04]);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.instrument, 0x13);
        assert_eq!(cell.effects[0], Effect::new(EffectKind::VolumeSlide, 0x04));
    }

    #[test]
    fn empty_event() {
        assert!(decode_cell(&[0, 0, 0]).is_empty());
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 512], None));
    }
}
