//! ProTracker MOD format parser.
//!
//! Covers the 31-sample family: ProTracker, NoiseTracker, StarTrekker
//! (including the FLT8 pattern-pair layout), FastTracker and TakeTracker
//! multichannel variants.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, Instrument, Pattern, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::protracker;
use crate::note::{finetune_nibble, PeriodTable};
use crate::packing::unpack_fixed;
use crate::pcm::{amiga_rate, extract, fix_doubled_loop, PcmEncoding, SampleHeader};
use crate::reader::{bytes_at, read_string};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "MOD";
const MAGIC_OFFSET: usize = 1080;
const HEADER_LEN: usize = 1084;
const NUM_SAMPLES: usize = 31;
const ROWS: u16 = 64;

/// One 30-byte sample record, shared with the 15-sample SoundTracker layout.
#[derive(BinRead, Debug)]
#[br(big)]
pub(crate) struct RawSample {
    name: [u8; 22],
    /// Length in words
    length: u16,
    finetune: u8,
    volume: u8,
    loop_start: u16,
    /// Loop length in words
    loop_length: u16,
}

/// Channel layout implied by the signature at offset 1080.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    channels: usize,
    /// StarTrekker 8-channel: each pattern is two 4-channel halves
    flt8: bool,
}

fn layout(magic: &[u8]) -> Option<Layout> {
    let plain = |channels| Some(Layout { channels, flt8: false });
    match magic {
        b"M.K." | b"M!K!" | b"M&K!" | b"FLT4" | b"N.T." => plain(4),
        b"FLT8" => Some(Layout { channels: 8, flt8: true }),
        b"OCTA" | b"CD81" => plain(8),
        b"CD61" => plain(6),
        [b'T', b'D', b'Z', n @ b'1'..=b'3'] => plain((n - b'0') as usize),
        [n @ b'1'..=b'9', b'C', b'H', b'N'] => plain((n - b'0') as usize),
        [a @ b'1'..=b'6', b @ b'0'..=b'9', b'C', b'H' | b'N'] => {
            let channels = ((a - b'0') * 10 + (b - b'0')) as usize;
            if channels <= ml_ir::MAX_CHANNELS {
                plain(channels)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Returns true if a 31-sample signature sits at offset 1080.
pub(crate) fn has_signature(data: &[u8]) -> bool {
    bytes_at(data, MAGIC_OFFSET, 4).and_then(layout).is_some()
}

/// Check for a 31-sample MOD: known signature, sane order list and
/// sample volumes.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN {
        return false;
    }
    if !has_signature(data) {
        return false;
    }
    let length = data[950];
    if length == 0 || length > 128 {
        return false;
    }
    if data[952..1080].iter().any(|&p| p >= 128) {
        return false;
    }
    (0..NUM_SAMPLES).all(|i| data[20 + i * 30 + 25] <= 64)
}

/// Load a MOD file from bytes.
pub fn load_mod(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let layout = bytes_at(data, MAGIC_OFFSET, 4)
        .and_then(layout)
        .ok_or(FormatError::Detection { format: FORMAT })?;

    let table = PeriodTable::amiga();
    let raw = read_sample_headers(data, 20, NUM_SAMPLES)?;
    let headers: Vec<SampleHeader> = raw.iter().map(|r| sample_header(r, &table, 2)).collect();

    let length = data[950] as usize;
    let restart = data[951] as usize;
    let orders = &data[952..952 + 128];
    // ProTracker loads every pattern the full table mentions, not just
    // the played part.
    let highest = orders.iter().copied().max().unwrap_or(0) as usize;

    let finetunes: Vec<i8> = headers.iter().map(|h| h.finetune).collect();
    let (patterns, order, pattern_bytes) = if layout.flt8 {
        let blocks = (highest | 1) + 1;
        let (halves, bytes) = read_patterns(data, HEADER_LEN, blocks, 4, &table, &finetunes);
        let mut halves = halves.into_iter();
        let mut patterns = Vec::new();
        while let (Some(mut left), Some(right)) = (halves.next(), halves.next()) {
            left.channels.extend(right.channels);
            patterns.push(left);
        }
        let order = orders[..length].iter().map(|&p| p as usize / 2).collect();
        (patterns, order, bytes)
    } else {
        let (patterns, bytes) =
            read_patterns(data, HEADER_LEN, highest + 1, layout.channels, &table, &finetunes);
        (patterns, orders[..length].iter().map(|&p| p as usize).collect(), bytes)
    };
    debug!(channels = layout.channels, patterns = patterns.len(), "MOD header parsed");

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&data[0..20]);
    asm.amiga_channels(layout.channels);
    asm.linear_slides = Some(false);
    asm.declared_patterns = patterns.len();
    asm.declared_instruments = NUM_SAMPLES;
    asm.patterns = patterns;
    asm.order = order;
    asm.restart = if restart < length { restart } else { 0 };
    asm.instruments = extract_samples(data, HEADER_LEN + pattern_bytes, &headers);
    Ok(asm.finish())
}

/// Read `count` 30-byte sample records starting at `offset`.
pub(crate) fn read_sample_headers(
    data: &[u8],
    offset: usize,
    count: usize,
) -> Result<Vec<RawSample>, FormatError> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(offset as u64);
    (0..count)
        .map(|_| RawSample::read(&mut cursor).map_err(FormatError::from))
        .collect()
}

/// Normalize a sample record. `loop_unit` is the byte size of the loop
/// start field: 2 for ProTracker words, 1 for SoundTracker bytes.
pub(crate) fn sample_header(raw: &RawSample, table: &PeriodTable, loop_unit: u32) -> SampleHeader {
    let finetune = finetune_nibble(raw.finetune);
    let frames = raw.length as u32 * 2;
    let loop_start = raw.loop_start as u32 * loop_unit;
    let loop_end = loop_start + raw.loop_length as u32 * 2;
    let (loop_start, loop_end) = fix_doubled_loop(loop_start, loop_end, frames);
    SampleHeader {
        name: read_string(&raw.name),
        frames: frames as usize,
        encoding: PcmEncoding::Signed8,
        rate: amiga_rate(table, finetune),
        loop_start,
        loop_end,
        looped: raw.loop_length > 1,
        volume: raw.volume.min(64),
        finetune,
        pan: None,
    }
}

/// Decode one 4-byte period cell.
pub(crate) fn decode_cell(bytes: &[u8], table: &PeriodTable, finetunes: &[i8]) -> Cell {
    let instrument = (bytes[0] & 0xF0) | (bytes[2] >> 4);
    let period = u16::from_be_bytes([bytes[0] & 0x0F, bytes[1]]);
    let finetune = match instrument {
        0 => 0,
        n => finetunes.get(n as usize - 1).copied().unwrap_or(0),
    };
    let mut cell = Cell {
        note: table.note(period, finetune),
        instrument,
        ..Cell::empty()
    };
    cell.push_effect(protracker(bytes[2] & 0x0F, bytes[3]));
    cell
}

/// Read `count` 64-row patterns of `channels` 4-byte cells. Returns the
/// patterns and the number of bytes they declare.
pub(crate) fn read_patterns(
    data: &[u8],
    offset: usize,
    count: usize,
    channels: usize,
    table: &PeriodTable,
    finetunes: &[i8],
) -> (Vec<Pattern>, usize) {
    let size = ROWS as usize * channels * 4;
    let mut patterns = Vec::with_capacity(count);
    for index in 0..count {
        let start = offset + index * size;
        let body = data.get(start..).unwrap_or(&[]);
        let body = &body[..body.len().min(size)];
        let (pattern, truncated) =
            unpack_fixed(body, ROWS, channels as u8, 4, |b| decode_cell(b, table, finetunes));
        if truncated {
            warn!(pattern = index, "pattern data truncated");
        }
        patterns.push(pattern);
    }
    (patterns, count * size)
}

/// Extract consecutive 8-bit samples starting at `offset`.
pub(crate) fn extract_samples(data: &[u8], offset: usize, headers: &[SampleHeader]) -> Vec<Instrument> {
    let mut offset = offset;
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let inst = extract(data, offset, header, (i + 1) as u8);
            offset += header.byte_len();
            inst
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::{EffectKind, Note};

    #[test]
    fn signatures() {
        assert_eq!(layout(b"M.K."), Some(Layout { channels: 4, flt8: false }));
        assert_eq!(layout(b"6CHN"), Some(Layout { channels: 6, flt8: false }));
        assert_eq!(layout(b"16CH"), Some(Layout { channels: 16, flt8: false }));
        assert_eq!(layout(b"32CN"), Some(Layout { channels: 32, flt8: false }));
        assert_eq!(layout(b"FLT8"), Some(Layout { channels: 8, flt8: true }));
        assert_eq!(layout(b"99CH"), None);
        assert_eq!(layout(b"\0\0\0\0"), None);
    }

    #[test]
    fn cell_layout() {
        let table = PeriodTable::amiga();
        // sample 0x12, period 428, effect C20
        let cell = decode_cell(&[0x11, 0xAC, 0x2C, 0x20], &table, &[]);
        assert_eq!(cell.instrument, 0x12);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.effects[0].kind, EffectKind::SetVolume);
        assert_eq!(cell.effects[0].param, 0x20);
    }

    #[test]
    fn cell_uses_sample_finetune_row() {
        let table = PeriodTable::amiga();
        let finetunes = [7i8];
        let period = table.row(7)[24].to_be_bytes();
        let cell = decode_cell(&[period[0], period[1], 0x10, 0x00], &table, &finetunes);
        assert_eq!(cell.note, Note::On(49));
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(!detect(&[0u8; 1000], None));
        assert!(!detect(&[0u8; 2048], None));
    }
}
