//! Scream Tracker 3 module parser.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Instrument, Note, Pattern, PlaceholderReason, Song, VolumeCommand};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{scream_tracker, Flavor};
use crate::note::octave_note;
use crate::pcm::{extract, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, u16_le, u8_at, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "S3M";
const HEADER_LEN: usize = 96;
const ROWS: u16 = 64;
const MAX_ORDERS: u16 = 256;
const MAX_INSTRUMENTS: u16 = 256;
const MAX_PATTERNS: u16 = 256;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    title: [u8; 28],
    _eof: u8,
    _kind: u8,
    _reserved: u16,
    order_count: u16,
    instrument_count: u16,
    pattern_count: u16,
    _flags: u16,
    _tracker: u16,
    sample_format: u16,
    _magic: [u8; 4],
    global_volume: u8,
    speed: u8,
    tempo: u8,
    master_volume: u8,
    _ultra_click: u8,
    default_pan: u8,
    _reserved2: [u8; 8],
    _special: u16,
    channel_settings: [u8; 32],
    #[br(count = order_count)]
    orders: Vec<u8>,
    #[br(count = instrument_count)]
    instrument_pointers: Vec<u16>,
    #[br(count = pattern_count)]
    pattern_pointers: Vec<u16>,
    /// Only meaningful when `default_pan` is 252
    #[br(try)]
    pan_table: Option<[u8; 32]>,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    kind: u8,
    _filename: [u8; 12],
    memseg_hi: u8,
    memseg_lo: u16,
    length: u32,
    loop_start: u32,
    loop_end: u32,
    volume: u8,
    _reserved: u8,
    pack: u8,
    flags: u8,
    c2spd: u32,
    _reserved2: [u8; 12],
    name: [u8; 28],
}

/// Check for "SCRM" at offset 44, module type 16 and sane counts.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 44, b"SCRM") || u8_at(data, 29) != Some(16) {
        return false;
    }
    let (Some(orders), Some(instruments), Some(patterns)) =
        (u16_le(data, 32), u16_le(data, 34), u16_le(data, 36))
    else {
        return false;
    };
    if orders > MAX_ORDERS || instruments > MAX_INSTRUMENTS || patterns > MAX_PATTERNS {
        return false;
    }
    let tables = HEADER_LEN + orders as usize + 2 * (instruments as usize + patterns as usize);
    tables <= data.len()
}

/// Load an S3M file from bytes.
pub fn load_s3m(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    debug!(
        orders = header.order_count,
        instruments = header.instrument_count,
        patterns = header.pattern_count,
        "S3M header parsed"
    );

    // Channels keep their file index; disabled ones after the last
    // enabled channel are dropped
    let used = header
        .channel_settings
        .iter()
        .rposition(|&c| c & 0x80 == 0)
        .map_or(0, |last| last + 1);
    let stereo = header.master_volume & 0x80 != 0;
    let channels: Vec<ChannelSettings> = header.channel_settings[..used]
        .iter()
        .enumerate()
        .map(|(i, &setting)| channel_settings(setting, stereo, pan_override(&header, i)))
        .collect();

    let unsigned = header.sample_format == 2;
    let mut instruments = Vec::with_capacity(header.instrument_count as usize);
    for (i, &pointer) in header.instrument_pointers.iter().enumerate() {
        let id = (i + 1) as u8;
        instruments.push(read_instrument(data, pointer as usize * 16, unsigned, id));
    }

    let mut patterns = Vec::with_capacity(header.pattern_count as usize);
    for (i, &pointer) in header.pattern_pointers.iter().enumerate() {
        patterns.push(read_pattern(data, pointer as usize * 16, used, i));
    }

    let order: Vec<usize> = header
        .orders
        .iter()
        .take_while(|&&p| p != 255)
        .filter(|&&p| p != 254)
        .map(|&p| p as usize)
        .collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.speed = header.speed;
    asm.tempo = header.tempo;
    asm.global_volume = header.global_volume;
    asm.linear_slides = Some(false);
    asm.channels = channels;
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = header.instrument_count as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = order;
    Ok(asm.finish())
}

fn pan_override(header: &Header, channel: usize) -> Option<u8> {
    if header.default_pan != 252 {
        return None;
    }
    let value = header.pan_table.as_ref()?[channel];
    (value & 0x20 != 0).then_some(value & 0x0F)
}

/// Map a 4-bit S3M pan position (0 = left, 15 = right) to -64..=64.
pub(crate) fn pan_nibble(p: u8) -> i8 {
    ((p as i32 * 128 + 7) / 15 - 64) as i8
}

fn channel_settings(setting: u8, stereo: bool, pan: Option<u8>) -> ChannelSettings {
    let mut settings = match setting & 0x7F {
        _ if !stereo => ChannelSettings::panned(0),
        0..=7 => ChannelSettings::panned(pan_nibble(3)),
        8..=15 => ChannelSettings::panned(pan_nibble(12)),
        _ => ChannelSettings::panned(0),
    };
    if let (Some(p), true) = (pan, stereo) {
        settings.initial_pan = pan_nibble(p);
    }
    settings.muted = setting & 0x80 != 0;
    settings
}

fn read_instrument(data: &[u8], offset: usize, unsigned: bool, id: u8) -> Instrument {
    if offset == 0 {
        return Instrument::placeholder(id, "", PlaceholderReason::Empty);
    }
    let raw = match RawSample::read(&mut Cursor::new(data.get(offset..).unwrap_or(&[]))) {
        Ok(raw) => raw,
        Err(_) => {
            warn!(instrument = id, "instrument header missing");
            return Instrument::placeholder(id, "", PlaceholderReason::Empty);
        }
    };
    let name = read_string(&raw.name);
    match raw.kind {
        0 => return Instrument::placeholder(id, &name, PlaceholderReason::Empty),
        1 => {}
        _ => {
            warn!(instrument = id, "AdLib instrument replaced by placeholder");
            return Instrument::placeholder(id, &name, PlaceholderReason::Fm);
        }
    }
    if raw.pack != 0 {
        warn!(instrument = id, "packed sample replaced by placeholder");
        return Instrument::placeholder(id, &name, PlaceholderReason::Compressed);
    }

    let encoding = match (raw.flags & 0x04 != 0, unsigned) {
        (true, true) => PcmEncoding::Unsigned16Le,
        (true, false) => PcmEncoding::Signed16Le,
        (false, true) => PcmEncoding::Unsigned8,
        (false, false) => PcmEncoding::Signed8,
    };
    let header = SampleHeader {
        name,
        frames: raw.length as usize,
        encoding,
        rate: raw.c2spd,
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        looped: raw.flags & 0x01 != 0,
        volume: raw.volume.min(64),
        finetune: 0,
        pan: None,
    };
    let pcm_offset = ((raw.memseg_hi as usize) << 16 | raw.memseg_lo as usize) * 16;
    extract(data, pcm_offset, &header, id)
}

fn read_pattern(data: &[u8], offset: usize, channels: usize, index: usize) -> Pattern {
    let mut pattern = Pattern::new(ROWS, channels as u8);
    if offset == 0 {
        return pattern;
    }
    let mut reader = ByteReader::at(data, offset + 2);
    let mut row = 0u16;
    while row < ROWS {
        let Ok(what) = reader.read_u8() else {
            warn!(pattern = index, row, "pattern data truncated");
            break;
        };
        if what == 0 {
            row += 1;
            continue;
        }
        let Ok(cell) = read_cell(&mut reader, what) else {
            warn!(pattern = index, row, "pattern data truncated");
            break;
        };
        if let Some(slot) = pattern.get_mut(row, what & 0x1F) {
            *slot = cell;
        }
    }
    pattern
}

fn read_cell(reader: &mut ByteReader, what: u8) -> Result<Cell, FormatError> {
    let mut cell = Cell::empty();
    if what & 0x20 != 0 {
        cell.note = match reader.read_u8()? {
            255 => Note::None,
            254 => Note::Off,
            packed => octave_note(packed, 1),
        };
        cell.instrument = reader.read_u8()?;
    }
    if what & 0x40 != 0 {
        let volume = reader.read_u8()?;
        if volume <= 64 {
            cell.volume = VolumeCommand::set(volume);
        }
    }
    if what & 0x80 != 0 {
        let command = reader.read_u8()?;
        let info = reader.read_u8()?;
        cell.push_effect(scream_tracker(command, info, Flavor::S3m));
    }
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::EffectKind;

    #[test]
    fn cell_flags() {
        let data = [0x61, 0x99, 0x01, 0x20, 0x03, 0x12];
        let mut reader = ByteReader::new(&data);
        let what = reader.read_u8().unwrap();
        let cell = read_cell(&mut reader, what | 0x80).unwrap();
        assert_eq!(cell.note, Note::None);
        assert_eq!(cell.volume, VolumeCommand::Volume(0x20));
        assert_eq!(cell.effects[0].kind, EffectKind::PatternBreak);
        assert_eq!(cell.effects[0].param, 12);
    }

    #[test]
    fn note_encoding() {
        let data = [0x40, 3, 0xFE, 0];
        let mut reader = ByteReader::new(&data);
        assert_eq!(read_cell(&mut reader, 0x20).unwrap().note, Note::On(49));
        assert_eq!(read_cell(&mut reader, 0x20).unwrap().note, Note::Off);
    }

    #[test]
    fn channel_panning() {
        assert_eq!(channel_settings(0, true, None).initial_pan, -38);
        assert_eq!(channel_settings(9, true, None).initial_pan, 38);
        assert_eq!(channel_settings(9, false, None).initial_pan, 0);
        assert_eq!(channel_settings(0, true, Some(15)).initial_pan, 64);
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 512], None));
    }
}
