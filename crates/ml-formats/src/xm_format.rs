//! FastTracker 2 extended module parser.
//!
//! Supports format version 1.04, the layout written by FastTracker 2 and
//! every later tracker. Each instrument is reduced to the sample its
//! keymap plays at C-4; envelopes and auto-vibrato are dropped.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{place, protracker, Command};
use crate::pcm::{extract, transposed_rate, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, u16_le, u8_at, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "XM";
const MAGIC: &[u8] = b"Extended Module: ";
const HEADER_LEN: usize = 336;
/// Header size is counted from this offset
const HEADER_SIZE_BASE: usize = 60;
const MIN_VERSION: u16 = 0x0104;
/// Keymap slot of C-4
const KEYMAP_NOTE: usize = 48;
const MAX_CHANNELS: u16 = 64;
const MAX_PATTERNS: u16 = 256;
const MAX_INSTRUMENTS: u16 = 255;

#[derive(BinRead, Debug)]
#[br(little, magic = b"Extended Module: ")]
struct Header {
    name: [u8; 20],
    _eof: u8,
    _tracker: [u8; 20],
    version: u16,
    header_size: u32,
    song_length: u16,
    restart: u16,
    channel_count: u16,
    pattern_count: u16,
    instrument_count: u16,
    flags: u16,
    speed: u16,
    tempo: u16,
    orders: [u8; 256],
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    /// Lengths and loop points are in bytes
    length: u32,
    loop_start: u32,
    loop_length: u32,
    volume: u8,
    finetune: i8,
    kind: u8,
    pan: u8,
    relative_note: i8,
    _reserved: u8,
    name: [u8; 22],
}

impl RawSample {
    fn is_16bit(&self) -> bool {
        self.kind & 0x10 != 0
    }
}

/// Check the "Extended Module: " tag, the 0x1A marker and sane counts.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 0, MAGIC) || u8_at(data, 37) != Some(0x1A) {
        return false;
    }
    let (Some(channels), Some(patterns), Some(instruments)) =
        (u16_le(data, 68), u16_le(data, 70), u16_le(data, 72))
    else {
        return false;
    };
    (1..=MAX_CHANNELS).contains(&channels) && patterns <= MAX_PATTERNS && instruments <= MAX_INSTRUMENTS
}

/// Load an XM file from bytes.
pub fn load_xm(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    if header.version < MIN_VERSION {
        return Err(FormatError::structural(
            FORMAT,
            format!("version {:#06x} predates 1.04", header.version),
        ));
    }
    let channels = header.channel_count as u8;
    debug!(
        version = header.version,
        channels,
        patterns = header.pattern_count,
        instruments = header.instrument_count,
        "XM header parsed"
    );

    let mut pos = HEADER_SIZE_BASE + header.header_size as usize;
    let mut patterns = Vec::with_capacity(header.pattern_count as usize);
    let mut complete = true;
    for index in 0..header.pattern_count as usize {
        match read_pattern(data, pos, channels, index) {
            Ok((pattern, next)) => {
                patterns.push(pattern);
                pos = next;
            }
            Err(_) => {
                warn!(pattern = index, "pattern header missing, stopping");
                complete = false;
                break;
            }
        }
    }

    let mut instruments = Vec::with_capacity(header.instrument_count as usize);
    if complete {
        for i in 0..header.instrument_count as usize {
            let id = (i + 1) as u8;
            match read_instrument(data, pos, id) {
                Ok((inst, next)) => {
                    instruments.push(inst);
                    pos = next;
                }
                Err(_) => {
                    warn!(instrument = id, "instrument header missing, stopping");
                    break;
                }
            }
        }
    }

    let length = (header.song_length as usize).min(header.orders.len());
    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.name);
    asm.speed = header.speed.min(255) as u8;
    asm.tempo = header.tempo.min(255) as u8;
    asm.linear_slides = Some(header.flags & 0x01 != 0);
    asm.channels = vec![ChannelSettings::default(); channels as usize];
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = header.instrument_count as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = header.orders[..length].iter().map(|&p| p as usize).collect();
    asm.restart = if (header.restart as usize) < length { header.restart as usize } else { 0 };
    Ok(asm.finish())
}

/// Read one pattern at `pos`. Returns the pattern and the position after it.
fn read_pattern(data: &[u8], pos: usize, channels: u8, index: usize) -> Result<(Pattern, usize), FormatError> {
    let mut reader = ByteReader::at(data, pos);
    let header_len = reader.read_u32_le()? as usize;
    let _packing = reader.read_u8()?;
    let rows = reader.read_u16_le()?.clamp(1, ml_ir::MAX_ROWS);
    let packed = reader.read_u16_le()? as usize;
    let start = pos + header_len;
    let end = start + packed;

    let mut pattern = Pattern::new(rows, channels);
    if packed == 0 {
        return Ok((pattern, end));
    }
    let body = data.get(start..end.min(data.len())).unwrap_or(&[]);
    let mut reader = ByteReader::new(body);
    'rows: for row in 0..rows {
        for ch in 0..channels {
            match read_cell(&mut reader) {
                Ok(cell) => *pattern.cell_mut(row, ch) = cell,
                Err(_) => {
                    warn!(pattern = index, row, "pattern data truncated");
                    break 'rows;
                }
            }
        }
    }
    Ok((pattern, end))
}

fn read_cell(reader: &mut ByteReader) -> Result<Cell, FormatError> {
    let first = reader.read_u8()?;
    // Bit 7 marks a packed cell whose low bits say which fields follow
    let (mask, note) = if first & 0x80 != 0 {
        let note = if first & 0x01 != 0 { reader.read_u8()? } else { 0 };
        (first, note)
    } else {
        (0x1F, first)
    };
    let mut field = |bit: u8| -> Result<u8, FormatError> {
        if mask & bit != 0 {
            reader.read_u8()
        } else {
            Ok(0)
        }
    };
    let instrument = field(0x02)?;
    let volume = field(0x04)?;
    let command = field(0x08)?;
    let param = field(0x10)?;

    let mut cell = Cell::empty();
    cell.note = match note {
        1..=96 => Note::from_canonical(note as i32),
        97 => Note::Off,
        _ => Note::None,
    };
    cell.instrument = instrument;
    place(&mut cell, [xm_effect(command, param).into(), volume_column(volume)]);
    Ok(cell)
}

/// XM effects already use the canonical numbering.
fn xm_effect(command: u8, param: u8) -> Effect {
    match command {
        0x00..=0x0F => protracker(command, param),
        _ => EffectKind::from_code(command).map_or(Effect::NONE, |kind| Effect::new(kind, param)),
    }
}

/// Translate a volume column byte.
fn volume_column(value: u8) -> Command {
    use EffectKind::*;
    let x = value & 0x0F;
    match value >> 4 {
        0x1..=0x4 => Command::Volume(value - 0x10),
        0x5 if value == 0x50 => Command::Volume(64),
        0x6 => Effect::new(VolumeSlide, x).into(),
        0x7 => Effect::new(VolumeSlide, x << 4).into(),
        0x8 => Effect::extended(0xB, x).into(),
        0x9 => Effect::extended(0xA, x).into(),
        0xA => Effect::new(Vibrato, x << 4).into(),
        0xB => Effect::new(Vibrato, x).into(),
        0xC => Effect::new(SetPan, x * 17).into(),
        0xD => Effect::new(PanningSlide, x).into(),
        0xE => Effect::new(PanningSlide, x << 4).into(),
        0xF => Effect::new(TonePorta, x << 4).into(),
        _ => Command::None,
    }
}

/// Read one instrument and its samples. Returns the instrument and the
/// position after its sample data.
fn read_instrument(data: &[u8], pos: usize, id: u8) -> Result<(Instrument, usize), FormatError> {
    let mut reader = ByteReader::at(data, pos);
    let size = reader.read_u32_le()? as usize;
    let name = reader.read_string(22)?;
    let _kind = reader.read_u8()?;
    let count = reader.read_u16_le()? as usize;
    if count == 0 {
        return Ok((Instrument::placeholder(id, &name, PlaceholderReason::Empty), pos + size));
    }
    let sample_header_size = reader.read_u32_le()? as usize;
    let keymap = reader.read_bytes(96)?;
    let chosen = match keymap[KEYMAP_NOTE] as usize {
        n if n < count => n,
        _ => 0,
    };

    let headers_at = pos + size;
    let mut raw = Vec::with_capacity(count);
    for i in 0..count {
        let start = headers_at + i * sample_header_size;
        let mut cursor = Cursor::new(data.get(start..).unwrap_or(&[]));
        raw.push(RawSample::read(&mut cursor)?);
    }

    let mut offset = headers_at + count * sample_header_size;
    let mut instrument = None;
    for (index, sample) in raw.iter().enumerate() {
        if index == chosen {
            instrument = Some(extract(data, offset, &sample_header(sample, &name), id));
        }
        offset += sample.length as usize;
    }
    let instrument = instrument.unwrap_or_else(|| Instrument::placeholder(id, &name, PlaceholderReason::Empty));
    Ok((instrument, offset))
}

fn sample_header(raw: &RawSample, instrument_name: &str) -> SampleHeader {
    let unit = if raw.is_16bit() { 2 } else { 1 };
    let name = read_string(&raw.name);
    SampleHeader {
        name: if instrument_name.is_empty() { name } else { instrument_name.to_string() },
        frames: (raw.length / unit) as usize,
        encoding: if raw.is_16bit() { PcmEncoding::Delta16Le } else { PcmEncoding::Delta8 },
        rate: transposed_rate(raw.relative_note, raw.finetune),
        loop_start: raw.loop_start / unit,
        loop_end: (raw.loop_start + raw.loop_length) / unit,
        looped: raw.kind & 0x03 != 0 && raw.loop_length > 0,
        volume: raw.volume.min(64),
        finetune: raw.finetune,
        pan: Some((raw.pan as i32 * 128 / 255 - 64) as i8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::VolumeCommand;

    #[test]
    fn packed_and_plain_cells() {
        let data = [0x83, 49, 2, 61, 4, 0x1C, 0x0C, 0x1B];
        let mut reader = ByteReader::new(&data);
        let packed = read_cell(&mut reader).unwrap();
        assert_eq!((packed.note, packed.instrument), (Note::On(49), 2));

        let plain = read_cell(&mut reader).unwrap();
        assert_eq!(plain.note, Note::On(61));
        assert_eq!(plain.instrument, 4);
        assert_eq!(plain.volume, VolumeCommand::Volume(0x0C));
        assert_eq!(plain.effects[0], Effect::new(EffectKind::SetVolume, 0x1B));
    }

    #[test]
    fn volume_column_goes_to_second_slot() {
        let data = [0x9C, 0x75, 0x04, 0x37];
        let mut reader = ByteReader::new(&data);
        let cell = read_cell(&mut reader).unwrap();
        assert_eq!(cell.volume, VolumeCommand::None);
        assert_eq!(cell.effects[0], Effect::new(EffectKind::Vibrato, 0x37));
        assert_eq!(cell.effects[1], Effect::new(EffectKind::VolumeSlide, 0x50));
    }

    #[test]
    fn note_off_and_out_of_range() {
        let mut reader = ByteReader::new(&[0x81, 97, 0x81, 98]);
        assert_eq!(read_cell(&mut reader).unwrap().note, Note::Off);
        assert_eq!(read_cell(&mut reader).unwrap().note, Note::None);
    }

    #[test]
    fn relative_note_rate() {
        let raw = RawSample {
            length: 200,
            loop_start: 20,
            loop_length: 100,
            volume: 70,
            finetune: 0,
            kind: 0x11,
            pan: 128,
            relative_note: 12,
            _reserved: 0,
            name: [0; 22],
        };
        let header = sample_header(&raw, "lead");
        assert_eq!(header.rate, 16726);
        assert_eq!(header.frames, 100);
        assert_eq!((header.loop_start, header.loop_end), (10, 60));
        assert_eq!(header.volume, 64);
        assert_eq!(header.pan, Some(0));
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 1024], None));
    }
}
