//! OctaMED MMD0 / MMD1 module parser.
//!
//! MED files are a graph of big-endian structures linked by absolute
//! offsets: a module header points at the song, the block (pattern) table,
//! the sample table and an optional expansion area with names.
//! MMD2 and MMD3 share the layout but add multi-song and per-block
//! features that are left to the emulator.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{bcd, place, protracker, Command};
use crate::note::PeriodTable;
use crate::pcm::{amiga_rate, extract, PcmEncoding, SampleHeader};
use crate::reader::{bytes_at, read_string, u16_be, u32_be, u8_at};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "MED";
const HEADER_LEN: usize = 52;
const SONG_LEN: usize = 788;
const MAX_SLOTS: usize = 63;
const NOTE_OFFSET: i32 = 36;

const FLAG_VOLHEX: u8 = 0x10;
const FLAG2_BPM: u8 = 0x20;
const FLAG2_LPB: u8 = 0x1F;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Revision {
    Mmd0,
    Mmd1,
    Later,
}

#[derive(BinRead, Debug)]
#[br(big)]
struct Header {
    magic: [u8; 4],
    _length: u32,
    song: u32,
    _section_count: u16,
    _section_table: u16,
    blocks: u32,
    _flags: u8,
    #[br(pad_before = 3)]
    samples: u32,
    _reserved: u32,
    expansion: u32,
}

#[derive(BinRead, Debug, Clone, Copy)]
#[br(big)]
struct SampleSlot {
    /// Repeat points are in words
    repeat: u16,
    repeat_len: u16,
    _midi_channel: u8,
    _midi_preset: u8,
    volume: u8,
    transpose: i8,
}

#[derive(BinRead, Debug)]
#[br(big)]
struct SongHeader {
    #[br(count = MAX_SLOTS)]
    slots: Vec<SampleSlot>,
    block_count: u16,
    song_length: u16,
    play_sequence: [u8; 256],
    tempo: u16,
    transpose: i8,
    flags: u8,
    flags2: u8,
    speed: u8,
    _track_volumes: [u8; 16],
    _master_volume: u8,
    sample_count: u8,
}

/// Song-wide settings the cell decoder needs.
struct Translation<'a> {
    transpose: i32,
    slots: &'a [SampleSlot],
    volume_hex: bool,
    flags2: u8,
}

/// Check for an "MMDx" tag whose song structure lies inside the file.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || &data[0..3] != b"MMD" || !matches!(data[3], b'0'..=b'3') {
        return false;
    }
    let Some(song) = u32_be(data, 8) else {
        return false;
    };
    let song = song as usize;
    song >= HEADER_LEN && song.saturating_add(SONG_LEN) <= data.len()
}

/// Load an MMD0 or MMD1 file from bytes.
pub fn load_med(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let mut cursor = Cursor::new(data);
    let header = Header::read(&mut cursor)?;
    let revision = match header.magic[3] {
        b'0' => Revision::Mmd0,
        b'1' => Revision::Mmd1,
        _ => Revision::Later,
    };
    if revision == Revision::Later {
        return Err(FormatError::structural(FORMAT, "MMD2 and later are not decoded natively"));
    }

    cursor.set_position(header.song as u64);
    let song = SongHeader::read(&mut cursor)?;
    debug!(
        ?revision,
        blocks = song.block_count,
        length = song.song_length,
        samples = song.sample_count,
        "MED song parsed"
    );

    let translation = Translation {
        transpose: song.transpose as i32,
        slots: &song.slots,
        volume_hex: song.flags & FLAG_VOLHEX != 0,
        flags2: song.flags2,
    };

    let mut patterns = Vec::with_capacity(song.block_count as usize);
    for index in 0..song.block_count as usize {
        let block = u32_be(data, header.blocks as usize + index * 4).unwrap_or(0) as usize;
        patterns.push(read_block(data, block, revision, &translation).unwrap_or_else(|| {
            warn!(block = index, "block missing");
            Pattern::new(64, 0)
        }));
    }
    let channels = patterns.iter().map(Pattern::num_channels).max().unwrap_or(4).max(4);

    let names = instrument_names(data, header.expansion as usize);
    let sample_count = (song.sample_count as usize).min(MAX_SLOTS);
    let table = PeriodTable::amiga();
    let instruments = (0..sample_count)
        .map(|i| {
            let name = names.get(i).map_or("", String::as_str);
            let offset = u32_be(data, header.samples as usize + i * 4).unwrap_or(0) as usize;
            read_instrument(data, offset, &song.slots[i], name, (i + 1) as u8, &table)
        })
        .collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = song_name(data, header.expansion as usize);
    asm.speed = song.speed;
    asm.tempo = tempo(song.tempo, song.flags2);
    asm.linear_slides = Some(false);
    asm.amiga_channels(channels);
    asm.declared_patterns = song.block_count as usize;
    asm.declared_instruments = song.sample_count as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    let length = (song.song_length as usize).min(song.play_sequence.len());
    asm.order = song.play_sequence[..length].iter().map(|&p| p as usize).collect();
    Ok(asm.finish())
}

/// Convert the song tempo to BPM.
///
/// In BPM mode the tempo counts beats of `lines per beat` rows; otherwise
/// it is a timer value where 33 matches the classic 125 BPM.
fn tempo(value: u16, flags2: u8) -> u8 {
    let bpm = if flags2 & FLAG2_BPM != 0 {
        let lines_per_beat = (flags2 & FLAG2_LPB) as u32 + 1;
        value as u32 * lines_per_beat / 4
    } else {
        value as u32 * 125 / 33
    };
    bpm.clamp(32, 255) as u8
}

fn read_block(data: &[u8], offset: usize, revision: Revision, tr: &Translation) -> Option<Pattern> {
    if offset == 0 {
        return None;
    }
    let (tracks, rows, events_at, event_len) = match revision {
        Revision::Mmd0 => (u8_at(data, offset)? as usize, u8_at(data, offset + 1)? as usize + 1, offset + 2, 3),
        _ => (u16_be(data, offset)? as usize, u16_be(data, offset + 2)? as usize + 1, offset + 8, 4),
    };
    let tracks = tracks.min(ml_ir::MAX_CHANNELS);
    let rows = rows.min(ml_ir::MAX_ROWS as usize);
    let mut pattern = Pattern::new(rows as u16, tracks as u8);
    for row in 0..rows {
        for track in 0..tracks {
            let Some(bytes) = bytes_at(data, events_at + (row * tracks + track) * event_len, event_len) else {
                warn!(row, "block data truncated");
                return Some(pattern);
            };
            *pattern.cell_mut(row as u16, track as u8) = match revision {
                Revision::Mmd0 => decode_mmd0(bytes, tr),
                _ => decode_mmd1(bytes, tr),
            };
        }
    }
    Some(pattern)
}

/// MMD0 event: `xy nnnnnn | iiii cccc | param`, where x and y are the top
/// two instrument bits.
fn decode_mmd0(bytes: &[u8], tr: &Translation) -> Cell {
    let instrument = (bytes[1] >> 4) | ((bytes[0] & 0x80) >> 3) | ((bytes[0] & 0x40) >> 1);
    decode_event(bytes[0] & 0x3F, instrument, bytes[1] & 0x0F, bytes[2], tr)
}

/// MMD1 event: `note, instrument, command, param`.
fn decode_mmd1(bytes: &[u8], tr: &Translation) -> Cell {
    decode_event(bytes[0] & 0x7F, bytes[1] & 0x3F, bytes[2], bytes[3], tr)
}

fn decode_event(note: u8, instrument: u8, cmd: u8, param: u8, tr: &Translation) -> Cell {
    let mut cell = Cell::empty();
    if note > 0 {
        let sample_transpose = (instrument as usize)
            .checked_sub(1)
            .and_then(|i| tr.slots.get(i))
            .map_or(0, |slot| slot.transpose as i32);
        cell.note = Note::from_canonical(note as i32 + NOTE_OFFSET + tr.transpose + sample_transpose);
    }
    cell.instrument = instrument;
    place(&mut cell, [command(cmd, param, tr), Command::None]);
    cell
}

fn command(cmd: u8, param: u8, tr: &Translation) -> Command {
    use EffectKind::*;
    match cmd {
        0x00..=0x07 | 0x0A | 0x0B => protracker(cmd, param).into(),
        // Hold and decay, synth jump
        0x08 | 0x0E => Command::None,
        0x09 if param & 0x1F > 0 => Effect::new(SpeedTempo, param & 0x1F).into(),
        0x0C if param < 0x80 => Command::Volume(if tr.volume_hex { param } else { bcd(param) }),
        0x0D => protracker(0x0A, param).into(),
        0x0F => match param {
            0x00 => Effect::new(PatternBreak, 0).into(),
            0x01..=0xF0 => Effect::new(SpeedTempo, tempo(param as u16, tr.flags2)).into(),
            0xF1 => Effect::extended(0x9, 3).into(),
            0xF2 => Effect::extended(0xD, 3).into(),
            0xF3 => Effect::extended(0x9, 2).into(),
            0xFF => Effect::extended(0xC, 0).into(),
            _ => Command::None,
        },
        0x11 => Effect::extended(0x1, param & 0x0F).into(),
        0x12 => Effect::extended(0x2, param & 0x0F).into(),
        0x14 => Effect::new(Vibrato, param).into(),
        0x15 => Effect::extended(0x5, param & 0x0F).into(),
        0x16 => Effect::extended(0x6, param & 0x0F).into(),
        0x18 => Effect::extended(0xC, param & 0x0F).into(),
        0x19 => Effect::new(SampleOffset, param).into(),
        0x1A => Effect::extended(0xA, param & 0x0F).into(),
        0x1B => Effect::extended(0xB, param & 0x0F).into(),
        0x1D => Effect::new(PatternBreak, param).into(),
        0x1E => Effect::extended(0xE, param & 0x0F).into(),
        _ => Command::None,
    }
}

fn read_instrument(
    data: &[u8],
    offset: usize,
    slot: &SampleSlot,
    name: &str,
    id: u8,
    table: &PeriodTable,
) -> Instrument {
    if offset == 0 {
        return Instrument::placeholder(id, name, PlaceholderReason::Empty);
    }
    let (Some(length), Some(kind)) = (u32_be(data, offset), u16_be(data, offset + 4)) else {
        warn!(sample = id, "sample header outside the file");
        return Instrument::placeholder(id, name, PlaceholderReason::Empty);
    };
    let kind = kind as i16;
    if kind < 0 {
        // Synthetic and hybrid instruments are driven by a waveform program
        return Instrument::placeholder(id, name, PlaceholderReason::Synth);
    }
    if kind & 0x0F != 0 {
        debug!(sample = id, kind, "multi-octave instrument");
        return Instrument::placeholder(id, name, PlaceholderReason::Unsupported);
    }
    let sixteen_bit = kind & 0x10 != 0;
    let header = SampleHeader {
        name: name.to_string(),
        frames: if sixteen_bit { length as usize / 2 } else { length as usize },
        encoding: if sixteen_bit { PcmEncoding::Signed16Be } else { PcmEncoding::Signed8 },
        rate: amiga_rate(table, 0),
        loop_start: slot.repeat as u32 * 2,
        loop_end: (slot.repeat as u32 + slot.repeat_len as u32) * 2,
        looped: slot.repeat_len > 1,
        volume: slot.volume.min(64),
        ..SampleHeader::default()
    };
    extract(data, offset + 6, &header, id)
}

/// Instrument names from the expansion area's info table.
fn instrument_names(data: &[u8], expansion: usize) -> Vec<String> {
    if expansion == 0 {
        return Vec::new();
    }
    let (Some(table), Some(count), Some(size)) =
        (u32_be(data, expansion + 20), u16_be(data, expansion + 24), u16_be(data, expansion + 26))
    else {
        return Vec::new();
    };
    let size = size as usize;
    if table == 0 || size < 40 {
        return Vec::new();
    }
    (0..count as usize)
        .map_while(|i| bytes_at(data, table as usize + i * size, 40).map(read_string))
        .collect()
}

fn song_name(data: &[u8], expansion: usize) -> String {
    if expansion == 0 {
        return String::new();
    }
    match (u32_be(data, expansion + 44), u32_be(data, expansion + 48)) {
        (Some(offset), Some(len)) if offset != 0 => {
            bytes_at(data, offset as usize, len as usize).map(read_string).unwrap_or_default()
        }
        _ => String::new(),
    }
}
