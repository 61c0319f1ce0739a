//! Scream Tracker 2 module parser.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, Effect, Note, Song, VolumeCommand};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{scream_tracker, Flavor};
use crate::note::octave_note;
use crate::packing::unpack_fixed;
use crate::pcm::{extract, SampleHeader};
use crate::reader::{bytes_at, is_printable, read_string, u8_at};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "STM";
const HEADER_LEN: usize = 1168;
const NUM_SAMPLES: usize = 31;
const CHANNELS: u8 = 4;
const ROWS: u16 = 64;
const PATTERN_LEN: usize = ROWS as usize * CHANNELS as usize * 4;
const MAX_PATTERNS: u8 = 64;
/// Order list terminator
const END_MARKER: u8 = 99;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    title: [u8; 20],
    _tracker: [u8; 8],
    _eof: u8,
    _kind: u8,
    version_major: u8,
    version_minor: u8,
    tempo: u8,
    pattern_count: u8,
    global_volume: u8,
    _reserved: [u8; 13],
    samples: [RawSample; NUM_SAMPLES],
    orders: [u8; 128],
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    name: [u8; 12],
    _zero: u8,
    _disk: u8,
    /// Sample data position in 16-byte paragraphs
    paragraph: u16,
    length: u16,
    loop_start: u16,
    loop_end: u16,
    volume: u8,
    _reserved: u8,
    c3_speed: u16,
    _reserved2: [u8; 6],
}

/// Check the 0x1A marker, module type 2 and a printable tracker tag.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || u8_at(data, 28) != Some(0x1A) || u8_at(data, 29) != Some(2) {
        return false;
    }
    let Some(tracker) = bytes_at(data, 20, 8) else {
        return false;
    };
    if !tracker.iter().all(|b| b.is_ascii_graphic()) || data[33] > MAX_PATTERNS {
        return false;
    }
    (0..NUM_SAMPLES).all(|i| data[48 + i * 32 + 22] <= 64)
}

/// Load an STM file from bytes.
pub fn load_stm(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    debug!(
        version = format_args!("{}.{}", header.version_major, header.version_minor),
        patterns = header.pattern_count,
        "STM header parsed"
    );

    let mut patterns = Vec::with_capacity(header.pattern_count as usize);
    for index in 0..header.pattern_count as usize {
        let body = data.get(HEADER_LEN + index * PATTERN_LEN..).unwrap_or(&[]);
        let body = &body[..body.len().min(PATTERN_LEN)];
        let (pattern, truncated) = unpack_fixed(body, ROWS, CHANNELS, 4, decode_cell);
        if truncated {
            warn!(pattern = index, "pattern data truncated");
        }
        patterns.push(pattern);
    }

    let instruments = header
        .samples
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let sample = SampleHeader {
                name: read_string(&raw.name),
                frames: raw.length as usize,
                rate: raw.c3_speed as u32,
                loop_start: raw.loop_start as u32,
                loop_end: raw.loop_end as u32,
                looped: raw.loop_end != 0xFFFF && raw.loop_end > raw.loop_start,
                volume: raw.volume.min(64),
                ..SampleHeader::default()
            };
            extract(data, raw.paragraph as usize * 16, &sample, (i + 1) as u8)
        })
        .collect();

    // Before 2.21 the speed was stored in tenths
    let speed = if header.version_major == 2 && header.version_minor < 21 {
        header.tempo / 10
    } else {
        header.tempo >> 4
    };

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.speed = speed;
    asm.global_volume = header.global_volume.min(64);
    asm.linear_slides = Some(false);
    asm.amiga_channels(CHANNELS as usize);
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = NUM_SAMPLES;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = header
        .orders
        .iter()
        .take_while(|&&p| p != END_MARKER && p < header.pattern_count)
        .map(|&p| p as usize)
        .collect();
    Ok(asm.finish())
}

fn decode_cell(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    cell.note = match bytes[0] {
        254 => Note::Off,
        251..=255 => Note::None,
        packed => octave_note(packed, 25),
    };
    cell.instrument = bytes[1] >> 3;
    let volume = (bytes[1] & 0x07) | ((bytes[2] & 0xF0) >> 1);
    if volume <= 64 {
        cell.volume = VolumeCommand::set(volume);
    }
    cell.push_effect(stm_effect(bytes[2] & 0x0F, bytes[3]));
    cell
}

/// STM uses the first ten Scream Tracker letters; `A` keeps the speed in
/// the high nibble.
fn stm_effect(command: u8, param: u8) -> Effect {
    match command {
        1 => scream_tracker(1, param >> 4, Flavor::S3m),
        2..=10 => scream_tracker(command, param, Flavor::S3m),
        _ => Effect::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::EffectKind;

    #[test]
    fn cell_packing() {
        // C-2, instrument 3, volume 0x28, speed 6
        let cell = decode_cell(&[0x20, 0x18, 0x51, 0x60]);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.instrument, 3);
        assert_eq!(cell.volume, VolumeCommand::Volume(0x28));
        assert_eq!(cell.effects[0], Effect::new(EffectKind::SpeedTempo, 6));
    }

    #[test]
    fn empty_cell_markers() {
        let cell = decode_cell(&[0xFF, 0x01, 0x80, 0x00]);
        assert!(cell.is_empty());
        assert_eq!(decode_cell(&[0xFE, 0x01, 0x80, 0x00]).note, Note::Off);
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 2048], None));
    }
}
