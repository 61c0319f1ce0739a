//! PolyTracker module parser.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, SampleData, Song, VolumeCommand};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::protracker;
use crate::pcm::{decode, from_pcm, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, u16_le, u8_at, ByteReader};
use crate::s3m_format::pan_nibble;
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "PTM";
const HEADER_LEN: usize = 608;
const SAMPLE_LEN: usize = 80;
const ROWS: u16 = 64;
const MAX_CHANNELS: u16 = 32;
const MAX_PATTERNS: u16 = 128;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    title: [u8; 28],
    _eof: u8,
    _version: u16,
    _reserved: u8,
    order_count: u16,
    sample_count: u16,
    pattern_count: u16,
    channel_count: u16,
    _flags: u16,
    _reserved2: u16,
    _magic: [u8; 4],
    _reserved3: [u8; 16],
    channel_pan: [u8; 32],
    orders: [u8; 256],
    /// In 16-byte paragraphs
    pattern_offsets: [u16; 128],
    #[br(count = sample_count)]
    samples: Vec<RawSample>,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    flags: u8,
    _filename: [u8; 12],
    volume: u8,
    c4_speed: u16,
    _segment: u16,
    offset: u32,
    /// Lengths and loop points are in bytes
    length: u32,
    loop_start: u32,
    loop_end: u32,
    _gus: [u8; 14],
    name: [u8; 28],
    _magic: [u8; 4],
}

/// Check for "PTMF" at offset 44 and sane counts.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 44, b"PTMF") || u8_at(data, 28) != Some(0x1A) {
        return false;
    }
    let (Some(orders), Some(samples), Some(patterns), Some(channels)) =
        (u16_le(data, 32), u16_le(data, 34), u16_le(data, 36), u16_le(data, 38))
    else {
        return false;
    };
    orders <= 256
        && patterns <= MAX_PATTERNS
        && (1..=MAX_CHANNELS).contains(&channels)
        && HEADER_LEN + samples as usize * SAMPLE_LEN <= data.len()
}

/// Load a PTM file from bytes.
pub fn load_ptm(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    let channels = header.channel_count as usize;
    debug!(
        channels,
        samples = header.sample_count,
        patterns = header.pattern_count,
        "PTM header parsed"
    );

    let instruments = header
        .samples
        .iter()
        .enumerate()
        .map(|(i, raw)| read_sample(data, raw, (i + 1) as u8))
        .collect();
    let patterns = header.pattern_offsets[..header.pattern_count as usize]
        .iter()
        .enumerate()
        .map(|(i, &offset)| read_pattern(data, offset as usize * 16, channels, i))
        .collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.linear_slides = Some(false);
    asm.channels = header.channel_pan[..channels]
        .iter()
        .map(|&p| ChannelSettings::panned(pan_nibble(p & 0x0F)))
        .collect();
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = header.sample_count as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = header.orders[..(header.order_count as usize).min(256)]
        .iter()
        .take_while(|&&p| p != 255)
        .map(|&p| p as usize)
        .collect();
    Ok(asm.finish())
}

fn read_sample(data: &[u8], raw: &RawSample, id: u8) -> Instrument {
    let name = read_string(&raw.name);
    match raw.flags & 0x03 {
        0 => return Instrument::placeholder(id, &name, PlaceholderReason::Empty),
        1 => {}
        _ => {
            warn!(sample = id, "OPL or MIDI instrument replaced by placeholder");
            return Instrument::placeholder(id, &name, PlaceholderReason::Fm);
        }
    }
    let sixteen_bit = raw.flags & 0x10 != 0;
    let unit = if sixteen_bit { 2 } else { 1 };
    let header = SampleHeader {
        name,
        frames: (raw.length / unit) as usize,
        encoding: if sixteen_bit { PcmEncoding::Signed16Le } else { PcmEncoding::Delta8 },
        rate: raw.c4_speed as u32,
        loop_start: raw.loop_start / unit,
        loop_end: raw.loop_end / unit,
        looped: raw.flags & 0x04 != 0,
        volume: raw.volume.min(64),
        ..SampleHeader::default()
    };
    if header.frames == 0 {
        return Instrument::placeholder(id, &header.name, PlaceholderReason::Empty);
    }

    // Deltas run over bytes, even for 16-bit samples
    let payload = data.get(raw.offset as usize..).unwrap_or(&[]);
    let bytes = match decode(payload, PcmEncoding::Delta8, raw.length as usize) {
        SampleData::Pcm8(bytes) => bytes,
        SampleData::Pcm16(_) => Vec::new(),
    };
    let pcm = if sixteen_bit {
        SampleData::Pcm16(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0] as u8, pair[1] as u8]))
                .collect(),
        )
    } else {
        SampleData::Pcm8(bytes)
    };
    from_pcm(pcm, &header, id)
}

fn read_pattern(data: &[u8], offset: usize, channels: usize, index: usize) -> Pattern {
    let mut pattern = Pattern::new(ROWS, channels as u8);
    if offset == 0 {
        return pattern;
    }
    let mut reader = ByteReader::at(data, offset);
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
            n @ 1..=120 => Note::from_canonical(n as i32),
            254 => Note::Off,
            _ => Note::None,
        };
        cell.instrument = reader.read_u8()?;
    }
    if what & 0x40 != 0 {
        let command = reader.read_u8()?;
        let param = reader.read_u8()?;
        cell.push_effect(ptm_effect(command, param));
    }
    if what & 0x80 != 0 {
        cell.volume = VolumeCommand::set(reader.read_u8()?.min(64));
    }
    Ok(cell)
}

/// ProTracker commands plus the PolyTracker extensions that have a
/// canonical counterpart.
fn ptm_effect(command: u8, param: u8) -> Effect {
    match command {
        0x00..=0x0F => protracker(command, param),
        0x10 => Effect::new(EffectKind::SetGlobalVolume, param.min(64)),
        0x11 => Effect::new(EffectKind::MultiRetrigger, param),
        _ => Effect::NONE,
    }
}
