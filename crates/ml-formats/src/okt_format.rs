//! Oktalyzer module parser.
//!
//! An "OKTASONG" tag followed by big-endian chunks without padding. Each
//! of the four hardware voices may be split into two channels.

use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Note, Pattern, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::chunk::{ChunkLayout, Chunks};
use crate::effect_parser::{place, Command};
use crate::note::PeriodTable;
use crate::pcm::{amiga_rate, extract, SampleHeader};
use crate::reader::{has_magic, read_string, u16_be, u32_be, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "OKT";
const MAGIC: &[u8] = b"OKTASONG";
const SAMPLE_LEN: usize = 32;
const NOTE_OFFSET: i32 = 36;

/// Check for "OKTASONG" followed by the channel-mode chunk.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    data.len() >= 16 + 8 && has_magic(data, 0, MAGIC) && has_magic(data, 8, b"CMOD") && u32_be(data, 12) == Some(8)
}

/// Load an OKT file from bytes.
pub fn load_okt(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }

    let table = PeriodTable::amiga();
    let mut channel_modes: Option<[u16; 4]> = None;
    let mut samples: Vec<SampleHeader> = Vec::new();
    let mut speed = 6u8;
    let mut pattern_count = 0usize;
    let mut song_length = 0usize;
    let mut orders: &[u8] = &[];
    let mut bodies = Vec::new();
    let mut sample_bodies = Vec::new();

    for chunk in Chunks::new(data, MAGIC.len(), ChunkLayout::AMIGA) {
        if chunk.truncated {
            warn!(tag = %chunk.tag(), "chunk truncated");
        }
        match &chunk.id {
            b"CMOD" => {
                let mut modes = [0u16; 4];
                for (i, mode) in modes.iter_mut().enumerate() {
                    *mode = u16_be(chunk.data, i * 2).unwrap_or(0);
                }
                channel_modes = Some(modes);
            }
            b"SAMP" => samples = chunk.data.chunks_exact(SAMPLE_LEN).map(|r| sample_header(r, &table)).collect(),
            b"SPEE" => speed = u16_be(chunk.data, 0).unwrap_or(6).min(255) as u8,
            b"SLEN" => pattern_count = u16_be(chunk.data, 0).unwrap_or(0) as usize,
            b"PLEN" => song_length = u16_be(chunk.data, 0).unwrap_or(0) as usize,
            b"PATT" => orders = chunk.data,
            b"PBOD" => bodies.push(chunk.data),
            b"SBOD" => sample_bodies.push(chunk.offset),
            _ => warn!(tag = %chunk.tag(), "unknown chunk skipped"),
        }
    }

    let modes = channel_modes.ok_or_else(|| FormatError::structural(FORMAT, "CMOD chunk missing"))?;
    // A split voice contributes two channels sharing its panning
    let channels: Vec<ChannelSettings> = modes
        .iter()
        .enumerate()
        .flat_map(|(voice, &mode)| std::iter::repeat(ChannelSettings::amiga(voice)).take(if mode != 0 { 2 } else { 1 }))
        .collect();
    debug!(
        channels = channels.len(),
        patterns = pattern_count,
        samples = samples.len(),
        "OKT chunks read"
    );

    if bodies.len() < pattern_count {
        warn!(declared = pattern_count, found = bodies.len(), "pattern bodies missing");
    }
    let patterns = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| read_pattern(body, channels.len() as u8, i))
        .collect();

    // Sample bodies are stored in order for the samples that have data
    let mut offsets = sample_bodies.into_iter();
    let instruments = samples
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let offset = if header.frames > 0 { offsets.next().unwrap_or(data.len()) } else { data.len() };
            extract(data, offset, header, (i + 1) as u8)
        })
        .collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.speed = speed;
    asm.linear_slides = Some(false);
    asm.channels = channels;
    asm.declared_patterns = pattern_count;
    asm.declared_instruments = samples.len();
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = orders.iter().take(song_length).map(|&p| p as usize).collect();
    Ok(asm.finish())
}

fn sample_header(record: &[u8], table: &PeriodTable) -> SampleHeader {
    let length = u32_be(record, 20).unwrap_or(0);
    // Repeat points are in words
    let loop_start = u16_be(record, 24).unwrap_or(0) as u32 * 2;
    let loop_len = u16_be(record, 26).unwrap_or(0) as u32 * 2;
    SampleHeader {
        name: read_string(&record[..20]),
        frames: length as usize,
        rate: amiga_rate(table, 0),
        loop_start,
        loop_end: loop_start + loop_len,
        looped: loop_len > 2,
        volume: record[29].min(64),
        ..SampleHeader::default()
    }
}

fn read_pattern(body: &[u8], channels: u8, index: usize) -> Pattern {
    let mut reader = ByteReader::new(body);
    let rows = reader.read_u16_be().unwrap_or(64).clamp(1, ml_ir::MAX_ROWS);
    let mut pattern = Pattern::new(rows, channels);
    'rows: for row in 0..rows {
        for ch in 0..channels {
            let Ok(bytes) = reader.read_bytes(4) else {
                warn!(pattern = index, row, "pattern data truncated");
                break 'rows;
            };
            *pattern.cell_mut(row, ch) = decode_cell(bytes);
        }
    }
    pattern
}

/// Decode `[note, sample, command, param]`.
fn decode_cell(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    if bytes[0] > 0 {
        cell.note = Note::from_canonical(bytes[0] as i32 + NOTE_OFFSET);
        // Sample 255 has no 1-based id; the reference is dropped
        cell.instrument = bytes[1].checked_add(1).unwrap_or(0);
    }
    place(&mut cell, [command(bytes[2], bytes[3]), Command::None]);
    cell
}

fn command(cmd: u8, param: u8) -> Command {
    use EffectKind::*;
    match cmd {
        // Period slides: "down" lowers the period, raising the pitch
        1 => Effect::new(PortaUp, param).into(),
        2 => Effect::new(PortaDown, param).into(),
        10..=12 => Effect::new(Arpeggio, param).into(),
        25 => Effect::new(PositionJump, param).into(),
        28 if param & 0x0F > 0 => Effect::new(SpeedTempo, param & 0x0F).into(),
        31 => match param {
            0..=0x40 => Command::Volume(param),
            0x41..=0x4F => Effect::new(VolumeSlide, param & 0x0F).into(),
            0x51..=0x5F => Effect::new(VolumeSlide, (param & 0x0F) << 4).into(),
            0x61..=0x6F => Effect::extended(0xB, param & 0x0F).into(),
            0x71..=0x7F => Effect::extended(0xA, param & 0x0F).into(),
            _ => Command::None,
        },
        _ => Command::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::VolumeCommand;

    #[test]
    fn note_and_sample_numbering() {
        let cell = decode_cell(&[13, 0, 0, 0]);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.instrument, 1);
    }

    #[test]
    fn out_of_range_sample_is_dropped() {
        let cell = decode_cell(&[13, 0xFF, 0, 0]);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.instrument, 0);
    }

    #[test]
    fn sample_rate_comes_from_shared_table() {
        let table = PeriodTable::amiga();
        let mut record = [0u8; SAMPLE_LEN];
        record[23] = 16;
        record[29] = 80;
        let header = sample_header(&record, &table);
        assert_eq!(header.frames, 16);
        assert_eq!(header.volume, 64);
        assert_eq!(header.rate, amiga_rate(&table, 0));
    }

    #[test]
    fn volume_command_routes_to_column() {
        assert_eq!(decode_cell(&[0, 0, 31, 0x30]).volume, VolumeCommand::Volume(0x30));
        assert_eq!(
            decode_cell(&[0, 0, 31, 0x53]).effects[0],
            Effect::new(EffectKind::VolumeSlide, 0x30)
        );
    }

    #[test]
    fn unknown_commands_are_dropped() {
        assert!(decode_cell(&[0, 0, 17, 0x11]).is_empty());
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 256], None));
    }
}
