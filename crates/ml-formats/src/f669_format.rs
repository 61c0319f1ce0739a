//! Composer 669 / UNIS 669 module parser.
//!
//! 669 stores speed and the break row per pattern rather than as pattern
//! commands; both are written into the decoded pattern as effects.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Note, Pattern, Song, VolumeCommand};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::mod_format::extract_samples;
use crate::packing::unpack_fixed;
use crate::pcm::{PcmEncoding, SampleHeader};
use crate::reader::{read_string, u8_at};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "669";
const HEADER_LEN: usize = 497;
const SAMPLE_LEN: usize = 25;
const CHANNELS: u8 = 8;
const ROWS: u16 = 64;
const PATTERN_LEN: usize = ROWS as usize * CHANNELS as usize * 3;
const MAX_SAMPLES: u8 = 64;
const MAX_PATTERNS: u8 = 128;
const TEMPO: u8 = 78;
const SPEED: u8 = 4;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    _magic: [u8; 2],
    message: [u8; 108],
    sample_count: u8,
    pattern_count: u8,
    loop_order: u8,
    orders: [u8; 128],
    speeds: [u8; 128],
    breaks: [u8; 128],
    #[br(count = sample_count)]
    samples: Vec<RawSample>,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    filename: [u8; 13],
    length: u32,
    loop_start: u32,
    loop_end: u32,
}

/// Check for the "if" or "JN" tag and consistent tables.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !matches!(&data[0..2], b"if" | b"JN") {
        return false;
    }
    let (Some(samples), Some(patterns), Some(loop_order)) = (u8_at(data, 110), u8_at(data, 111), u8_at(data, 112))
    else {
        return false;
    };
    if samples > MAX_SAMPLES || patterns == 0 || patterns > MAX_PATTERNS || loop_order >= 128 {
        return false;
    }
    let orders = &data[113..241];
    let breaks = &data[369..497];
    orders.iter().all(|&p| p == 0xFF || p == 0xFE || p < patterns)
        && orders[0] != 0xFF
        && breaks.iter().all(|&b| b < ROWS as u8)
        && HEADER_LEN + samples as usize * SAMPLE_LEN <= data.len()
}

/// Load a 669 file from bytes.
pub fn load_669(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    let pattern_count = header.pattern_count as usize;
    debug!(samples = header.sample_count, patterns = pattern_count, "669 header parsed");

    let patterns_at = HEADER_LEN + header.samples.len() * SAMPLE_LEN;
    let mut patterns = Vec::with_capacity(pattern_count);
    for index in 0..pattern_count {
        let body = data.get(patterns_at + index * PATTERN_LEN..).unwrap_or(&[]);
        let body = &body[..body.len().min(PATTERN_LEN)];
        let (mut pattern, truncated) = unpack_fixed(body, ROWS, CHANNELS, 3, decode_cell);
        if truncated {
            warn!(pattern = index, "pattern data truncated");
        }
        insert_pattern_commands(&mut pattern, header.speeds[index], header.breaks[index]);
        patterns.push(pattern);
    }

    let headers: Vec<SampleHeader> = header.samples.iter().map(sample_header).collect();

    let order: Vec<usize> = header
        .orders
        .iter()
        .take_while(|&&p| p != 0xFF)
        .filter(|&&p| p != 0xFE)
        .map(|&p| p as usize)
        .collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    // The first message line doubles as the title
    asm.title = read_string(&header.message[..36]);
    asm.speed = SPEED;
    asm.tempo = TEMPO;
    asm.linear_slides = Some(false);
    asm.channels = (0..CHANNELS).map(|i| ChannelSettings::panned(if i % 2 == 0 { -32 } else { 32 })).collect();
    asm.declared_patterns = pattern_count;
    asm.declared_instruments = header.samples.len();
    asm.restart = if (header.loop_order as usize) < order.len() { header.loop_order as usize } else { 0 };
    asm.order = order;
    asm.patterns = patterns;
    asm.instruments = extract_samples(data, patterns_at + pattern_count * PATTERN_LEN, &headers);
    Ok(asm.finish())
}

fn sample_header(raw: &RawSample) -> SampleHeader {
    SampleHeader {
        name: read_string(&raw.filename),
        frames: raw.length as usize,
        encoding: PcmEncoding::Unsigned8,
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        // Unlooped samples carry an end far past the data
        looped: raw.loop_end <= raw.length && raw.loop_end > raw.loop_start,
        ..SampleHeader::default()
    }
}

/// Decode a 3-byte event. 0xFE in the first byte means "volume only",
/// 0xFF means no note; 0xFF in the third byte means no command.
fn decode_cell(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    match bytes[0] {
        0xFF => {}
        0xFE => cell.volume = scale_volume(bytes[1] & 0x0F),
        b => {
            cell.note = Note::from_canonical((b >> 2) as i32 + 25);
            cell.instrument = (((b & 0x03) << 4) | (bytes[1] >> 4)) + 1;
            cell.volume = scale_volume(bytes[1] & 0x0F);
        }
    }
    if bytes[2] != 0xFF {
        cell.push_effect(effect(bytes[2] >> 4, bytes[2] & 0x0F));
    }
    cell
}

fn scale_volume(v: u8) -> VolumeCommand {
    VolumeCommand::set(((v as u16 * 64 + 7) / 15) as u8)
}

fn effect(command: u8, param: u8) -> Effect {
    use EffectKind::*;
    match command {
        0 => Effect::new(PortaUp, param),
        1 => Effect::new(PortaDown, param),
        2 => Effect::new(TonePorta, param),
        3 => Effect::extended(0x1, 1),
        4 => Effect::new(Vibrato, param),
        5 if param > 0 => Effect::new(SpeedTempo, param),
        _ => Effect::NONE,
    }
}

/// Write the pattern speed on row 0 and a break after the break row.
fn insert_pattern_commands(pattern: &mut Pattern, speed: u8, break_row: u8) {
    if speed > 0 {
        push_anywhere(pattern, 0, Effect::new(EffectKind::SpeedTempo, speed));
    }
    if (break_row as u16) < ROWS - 1 {
        push_anywhere(pattern, break_row as u16, Effect::new(EffectKind::PatternBreak, 0));
    }
}

fn push_anywhere(pattern: &mut Pattern, row: u16, effect: Effect) {
    let placed = (0..CHANNELS).any(|ch| pattern.get_mut(row, ch).is_some_and(|cell| cell.push_effect(effect)));
    if !placed {
        debug!(row, "no free effect slot for pattern command");
    }
}
