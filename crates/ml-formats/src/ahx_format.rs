//! AHX (THX) module parser.
//!
//! AHX songs are four voices playing a position list; each position names
//! one track and a transpose per voice. Positions become patterns, with
//! identical positions sharing one pattern. Instruments are synthesized
//! from waveform programs and are kept as placeholders.

use std::collections::HashMap;
use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{bcd, place, protracker, Command};
use crate::reader::{has_magic, u16_be, u8_at, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "AHX";
const HEADER_LEN: usize = 14;
const VOICES: usize = 4;
const STEP_LEN: usize = 3;
const INSTRUMENT_LEN: usize = 22;
const NOTE_OFFSET: i32 = 24;
/// Flag in the position count word: track 0 is implied empty
const TRACK0_EMPTY: u16 = 0x8000;

#[derive(BinRead, Debug)]
#[br(big, magic = b"THX")]
struct Header {
    revision: u8,
    names: u16,
    /// Flags, speed multiplier and position count
    position_word: u16,
    restart: u16,
    track_length: u8,
    /// Highest track number
    last_track: u8,
    instrument_count: u8,
    subsong_count: u8,
    #[br(count = subsong_count)]
    subsongs: Vec<u16>,
    #[br(count = position_word & 0x0FFF)]
    positions: Vec<Position>,
}

#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[br(big)]
struct Voice {
    track: u8,
    transpose: i8,
}

#[derive(BinRead, Debug, Clone, PartialEq, Eq, Hash)]
#[br(big)]
struct Position {
    #[br(count = VOICES)]
    voices: Vec<Voice>,
}

/// Check the "THX" tag, a known revision and a position list inside the
/// file.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 0, b"THX") || !matches!(data[3], 0 | 1) {
        return false;
    }
    let (Some(names), Some(positions), Some(track_length), Some(subsongs)) =
        (u16_be(data, 4), u16_be(data, 6), u8_at(data, 10), u8_at(data, 13))
    else {
        return false;
    };
    let positions = (positions & 0x0FFF) as usize;
    positions > 0
        && (1..=64).contains(&track_length)
        && (names as usize) < data.len()
        && HEADER_LEN + subsongs as usize * 2 + positions * VOICES * 2 <= data.len()
}

/// Load an AHX file from bytes.
pub fn load_ahx(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let mut cursor = Cursor::new(data);
    let header = Header::read(&mut cursor)?;
    let rows = header.track_length as usize;
    let multiplier = ((header.position_word >> 13) & 0x03) as u32 + 1;
    debug!(
        revision = header.revision,
        positions = header.positions.len(),
        tracks = header.last_track as usize + 1,
        subsongs = header.subsongs.len(),
        "AHX header parsed"
    );

    let mut reader = ByteReader::at(data, cursor.position() as usize);
    let tracks = read_tracks(&mut reader, &header);

    let instruments: Vec<Instrument> = {
        let names = names(data, header.names as usize, header.instrument_count as usize);
        let mut list = Vec::with_capacity(header.instrument_count as usize);
        for i in 0..header.instrument_count as usize {
            // Each instrument is a fixed block plus its waveform program
            let program = reader.read_bytes(INSTRUMENT_LEN).map(|b| b[21] as usize * 4);
            if program.and_then(|len| reader.skip(len)).is_err() {
                warn!(instrument = i + 1, "instrument data truncated");
            }
            let name = names.get(i + 1).map_or("", String::as_str);
            list.push(Instrument::placeholder((i + 1) as u8, name, PlaceholderReason::Synth));
        }
        list
    };

    // Identical positions share a pattern
    let mut patterns = Vec::new();
    let mut seen: HashMap<&Position, usize> = HashMap::new();
    let mut order_of_position = Vec::with_capacity(header.positions.len());
    for position in &header.positions {
        let index = *seen.entry(position).or_insert_with(|| {
            patterns.push(build_pattern(position, &tracks, rows));
            patterns.len() - 1
        });
        order_of_position.push(index);
    }

    let start = match ctx.subsong {
        0 => 0,
        n => match header.subsongs.get(n - 1) {
            Some(&start) if (start as usize) < header.positions.len() => start as usize,
            _ => {
                warn!(subsong = n, "unknown sub-song, using the main song");
                0
            }
        },
    };

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = names(data, header.names as usize, 0).into_iter().next().unwrap_or_default();
    asm.speed = 6;
    asm.tempo = (125 * multiplier).min(255) as u8;
    asm.linear_slides = Some(false);
    asm.amiga_channels(VOICES);
    asm.declared_patterns = header.positions.len();
    asm.declared_instruments = header.instrument_count as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = order_of_position[start..].to_vec();
    asm.restart = (header.restart as usize).checked_sub(start).unwrap_or(0);
    Ok(asm.finish())
}

/// Read every stored track; a missing track 0 is all empty steps.
fn read_tracks(reader: &mut ByteReader, header: &Header) -> Vec<Vec<Cell>> {
    let rows = header.track_length as usize;
    let mut tracks = Vec::with_capacity(header.last_track as usize + 1);
    for index in 0..=header.last_track as usize {
        if index == 0 && header.position_word & TRACK0_EMPTY != 0 {
            tracks.push(vec![Cell::empty(); rows]);
            continue;
        }
        let Ok(bytes) = reader.read_bytes(rows * STEP_LEN) else {
            warn!(track = index, "track data truncated");
            break;
        };
        tracks.push(bytes.chunks_exact(STEP_LEN).map(decode_step).collect());
    }
    tracks
}

fn build_pattern(position: &Position, tracks: &[Vec<Cell>], rows: usize) -> Pattern {
    let mut pattern = Pattern::new(rows as u16, VOICES as u8);
    for (channel, voice) in pattern.channels.iter_mut().zip(&position.voices) {
        let Some(track) = tracks.get(voice.track as usize) else {
            continue;
        };
        for (cell, step) in channel.cells.iter_mut().zip(track) {
            *cell = *step;
            if let Note::On(n) = step.note {
                cell.note = Note::from_canonical(n as i32 + voice.transpose as i32);
            }
        }
    }
    pattern
}

/// Decode a track step: `nnnnnn ii | iiii ffff | param`.
fn decode_step(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    let note = (bytes[0] >> 2) & 0x3F;
    if (1..=60).contains(&note) {
        cell.note = Note::from_canonical(note as i32 + NOTE_OFFSET);
    }
    cell.instrument = ((bytes[0] & 0x03) << 4) | (bytes[1] >> 4);
    place(&mut cell, [command(bytes[1] & 0x0F, bytes[2]), Command::None]);
    cell
}

fn command(cmd: u8, param: u8) -> Command {
    use EffectKind::*;
    match cmd {
        0x1 | 0x2 | 0x3 | 0x5 | 0xA => protracker(cmd, param).into(),
        0xB => Effect::new(PositionJump, param).into(),
        // Track and master volume have no per-cell equivalent
        0xC if param <= 0x40 => Command::Volume(param),
        0xD => Effect::new(PatternBreak, bcd(param)).into(),
        0xE => match param >> 4 {
            sub @ (0x1 | 0x2 | 0xA | 0xB | 0xC | 0xD) => Effect::extended(sub, param & 0x0F).into(),
            _ => Command::None,
        },
        0xF if param > 0 => Effect::new(SpeedTempo, param).into(),
        _ => Command::None,
    }
}

/// NUL-terminated strings at `offset`: the song title, then instrument
/// names.
fn names(data: &[u8], offset: usize, instruments: usize) -> Vec<String> {
    data.get(offset..)
        .unwrap_or(&[])
        .split(|&b| b == 0)
        .take(instruments + 1)
        .map(|s| String::from_utf8_lossy(s).trim_end().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::VolumeCommand;

    /// Two tracks of 4 steps, three positions of which two are identical,
    /// one sub-song starting at position 2.
    fn song() -> Vec<u8> {
        let mut data = b"THX\x00".to_vec();
        let names_at_placeholder = data.len();
        data.extend_from_slice(&[0, 0]); // names offset, patched below
        data.extend_from_slice(&3u16.to_be_bytes()); // 3 positions
        data.extend_from_slice(&1u16.to_be_bytes()); // restart
        data.extend_from_slice(&[4, 1, 1, 1]); // track length, last track, instruments, sub-songs
        data.extend_from_slice(&2u16.to_be_bytes());
        for transpose in [0i8, 0, 12] {
            for voice in 0..4u8 {
                data.extend_from_slice(&[voice % 2, transpose as u8]);
            }
        }
        // track 0: C-4 (AHX note 25) with instrument 1 on step 0
        data.extend_from_slice(&[25 << 2, 0x1C, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        // track 1: empty
        data.extend_from_slice(&[0; 12]);
        let mut instrument = [0u8; INSTRUMENT_LEN];
        instrument[21] = 1;
        data.extend_from_slice(&instrument);
        data.extend_from_slice(&[0; 4]);
        let names_at = data.len() as u16;
        data[names_at_placeholder..names_at_placeholder + 2].copy_from_slice(&names_at.to_be_bytes());
        data.extend_from_slice(b"tune\0lead\0");
        data
    }

    #[test]
    fn step_layout() {
        let cell = decode_step(&[25 << 2, 0x1C, 0x20]);
        assert_eq!(cell.note, Note::On(49));
        assert_eq!(cell.instrument, 1);
        assert_eq!(cell.volume, VolumeCommand::Volume(0x20));
    }

    #[test]
    fn master_volume_commands_are_dropped() {
        assert!(decode_step(&[0, 0x0C, 0x60]).is_empty());
    }

    #[test]
    fn positions_become_shared_patterns() {
        let data = song();
        let song = load_ahx(&data, &DecodeContext::new("test.ahx")).unwrap();
        assert_eq!(song.title.as_str(), "tune");
        assert_eq!(song.patterns.len(), 2);
        assert_eq!(song.order, vec![0, 0, 1]);
        assert_eq!(song.patterns[0].cell(0, 0).note, Note::On(49));
        assert_eq!(song.patterns[1].cell(0, 2).note, Note::On(61));
        assert!(song.patterns[0].cell(0, 1).is_empty());
        assert!(song.instruments[0].is_placeholder());
        assert_eq!(song.instruments[0].name.as_str(), "lead");
    }

    #[test]
    fn subsong_starts_at_its_position() {
        let data = song();
        let song = load_ahx(&data, &DecodeContext { filename: "test.ahx", subsong: 1 }).unwrap();
        assert_eq!(song.order, vec![1]);
        assert_eq!(song.restart_position, 0);
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 256], None));
    }
}
