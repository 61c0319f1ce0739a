//! Farandole Composer module parser.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song, VolumeCommand};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::packing::unpack_fixed;
use crate::pcm::{extract, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string};
use crate::s3m_format::pan_nibble;
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "FAR";
const HEADER_LEN: usize = 98;
const CHANNELS: u8 = 16;
const ROW_LEN: usize = CHANNELS as usize * 4;
const MAX_SAMPLES: usize = 64;
const TEMPO: u8 = 80;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    _magic: [u8; 4],
    title: [u8; 40],
    _eof: [u8; 3],
    /// Offset of the first pattern
    header_len: u16,
    _version: u8,
    channel_enabled: [u8; 16],
    _editing_state: [u8; 9],
    speed: u8,
    channel_pan: [u8; 16],
    _pattern_state: [u8; 4],
    message_len: u16,
    #[br(pad_before = message_len)]
    orders: [u8; 256],
    pattern_count: u8,
    song_length: u8,
    restart: u8,
    pattern_sizes: [u16; 256],
}

#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    name: [u8; 32],
    /// Lengths and loop points are in bytes
    length: u32,
    _finetune: u8,
    volume: u8,
    loop_start: u32,
    loop_end: u32,
    kind: u8,
    looping: u8,
}

/// Check for "FAR\xFE" followed by the title and a CR LF EOF marker.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    data.len() >= HEADER_LEN && has_magic(data, 0, b"FAR\xFE") && has_magic(data, 44, b"\r\n\x1A")
}

/// Load a FAR file from bytes.
pub fn load_far(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    debug!(speed = header.speed, length = header.song_length, "FAR header parsed");

    // Patterns are stored for every slot of the size table; empty slots take no space
    let mut pos = header.header_len as usize;
    let highest = header.pattern_sizes.iter().rposition(|&size| size > 0).map_or(0, |last| last + 1);
    let mut patterns = Vec::with_capacity(highest);
    for (index, &size) in header.pattern_sizes[..highest].iter().enumerate() {
        let size = size as usize;
        patterns.push(read_pattern(data, pos, size, index));
        pos += size;
    }

    let instruments = read_samples(data, pos);

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.speed = header.speed;
    asm.tempo = TEMPO;
    asm.linear_slides = Some(false);
    asm.channels = header
        .channel_pan
        .iter()
        .zip(header.channel_enabled)
        .map(|(&pan, enabled)| {
            let mut settings = ChannelSettings::panned(pan_nibble(pan & 0x0F));
            settings.muted = enabled == 0;
            settings
        })
        .collect();
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = instruments.len();
    asm.patterns = patterns;
    asm.instruments = instruments;
    let length = header.song_length as usize;
    asm.order = header.orders[..length].iter().take_while(|&&p| p != 0xFF).map(|&p| p as usize).collect();
    asm.restart = if (header.restart as usize) < length { header.restart as usize } else { 0 };
    Ok(asm.finish())
}

fn read_pattern(data: &[u8], pos: usize, size: usize, index: usize) -> Pattern {
    if size < 2 {
        return Pattern::new(64, CHANNELS);
    }
    let rows = ((size - 2) / ROW_LEN).clamp(1, ml_ir::MAX_ROWS as usize);
    let break_row = data.get(pos).copied().unwrap_or(0) as usize;
    let body = data.get(pos + 2..).unwrap_or(&[]);
    let body = &body[..body.len().min(size - 2)];
    let (mut pattern, truncated) = unpack_fixed(body, rows as u16, CHANNELS, 4, decode_cell);
    if truncated {
        warn!(pattern = index, "pattern data truncated");
    }
    // The stored break row is one short of the last row played
    if break_row > 0 && break_row + 2 < rows {
        let row = (break_row + 1) as u16;
        let placed = (0..CHANNELS).any(|ch| {
            pattern
                .get_mut(row, ch)
                .is_some_and(|cell| cell.push_effect(Effect::new(EffectKind::PatternBreak, 0)))
        });
        if !placed {
            debug!(pattern = index, row, "no free slot for pattern break");
        }
    }
    pattern
}

fn decode_cell(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    if bytes[0] > 0 {
        cell.note = Note::from_canonical(bytes[0] as i32 + 24);
        cell.instrument = bytes[1].checked_add(1).unwrap_or(0);
    }
    if bytes[2] > 0 {
        // Volume is stored as 1..=16
        let level = bytes[2].min(16) as u16 - 1;
        cell.volume = VolumeCommand::set((level * 64 / 15) as u8);
    }
    cell.push_effect(effect(bytes[3] >> 4, bytes[3] & 0x0F));
    cell
}

fn effect(command: u8, param: u8) -> Effect {
    use EffectKind::*;
    match command {
        0x1 => Effect::new(PortaUp, param * 4),
        0x2 => Effect::new(PortaDown, param * 4),
        0x3 => Effect::new(TonePorta, param * 4),
        0x4 => Effect::extended(0x9, param),
        0x6 => Effect::new(Vibrato, param),
        0x7 => Effect::new(VolumeSlide, param << 4),
        0x8 => Effect::new(VolumeSlide, param),
        0xB => Effect::new(SetPan, param * 17),
        0xF if param > 0 => Effect::new(SpeedTempo, param),
        _ => Effect::NONE,
    }
}

/// Read the sample bitmap and the samples it announces.
fn read_samples(data: &[u8], pos: usize) -> Vec<Instrument> {
    let Some(map) = data.get(pos..pos + MAX_SAMPLES / 8) else {
        warn!("sample map missing");
        return Vec::new();
    };
    let present = |i: usize| map[i / 8] & (1 << (i % 8)) != 0;
    let Some(last) = (0..MAX_SAMPLES).rev().find(|&i| present(i)) else {
        return Vec::new();
    };

    let mut cursor = Cursor::new(data);
    cursor.set_position((pos + MAX_SAMPLES / 8) as u64);
    let mut instruments = Vec::with_capacity(last + 1);
    for i in 0..=last {
        let id = (i + 1) as u8;
        if !present(i) {
            instruments.push(Instrument::placeholder(id, "", PlaceholderReason::Empty));
            continue;
        }
        let raw = match RawSample::read(&mut cursor) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(sample = id, "sample header missing");
                break;
            }
        };
        let sixteen_bit = raw.kind & 0x01 != 0;
        let unit = if sixteen_bit { 2 } else { 1 };
        let header = SampleHeader {
            name: read_string(&raw.name),
            frames: (raw.length / unit) as usize,
            encoding: if sixteen_bit { PcmEncoding::Signed16Le } else { PcmEncoding::Signed8 },
            loop_start: raw.loop_start / unit,
            loop_end: raw.loop_end / unit,
            looped: raw.looping & 0x08 != 0,
            volume: (raw.volume.min(15) as u16 * 64 / 15) as u8,
            ..SampleHeader::default()
        };
        let offset = cursor.position() as usize;
        instruments.push(extract(data, offset, &header, id));
        cursor.set_position((offset + raw.length as usize) as u64);
    }
    instruments
}
