//! DigiBooster Pro module parser.
//!
//! "DBM0" followed by big-endian IFF chunks. A file may hold several
//! songs sharing one pattern pool; [`DecodeContext::subsong`] picks one.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::chunk::{ChunkLayout, Chunks};
use crate::effect_parser::{place, protracker, Command};
use crate::pcm::{extract, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "DBM";
const MAGIC: &[u8] = b"DBM0";
const CHUNKS_AT: usize = 8;
const KEY_OFF: u8 = 0x1F;

#[derive(BinRead, Debug)]
#[br(big)]
struct Info {
    instruments: u16,
    samples: u16,
    songs: u16,
    patterns: u16,
    channels: u16,
}

#[derive(BinRead, Debug)]
#[br(big)]
struct RawInstrument {
    name: [u8; 30],
    sample: u16,
    volume: u16,
    /// Playback rate of the middle C
    rate: u32,
    loop_start: u32,
    loop_len: u32,
    pan: i16,
    flags: u16,
}

/// Where a sample's frames live.
#[derive(Clone, Copy, Debug)]
struct SampleBody {
    offset: usize,
    frames: usize,
    encoding: PcmEncoding,
}

/// Check the "DBM0" tag and a version 2 or 3 file.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    data.len() >= CHUNKS_AT + 8 && has_magic(data, 0, MAGIC) && matches!(data[4], 2 | 3)
}

/// Load a DBM file from bytes.
pub fn load_dbm(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }

    let mut title = String::new();
    let mut info: Option<Info> = None;
    let mut songs: &[u8] = &[];
    let mut raw_instruments = Vec::new();
    let mut pattern_chunk: &[u8] = &[];
    let mut bodies = Vec::new();

    for chunk in Chunks::new(data, CHUNKS_AT, ChunkLayout::AMIGA) {
        if chunk.truncated {
            warn!(tag = %chunk.tag(), "chunk truncated");
        }
        match &chunk.id {
            b"NAME" => title = read_string(chunk.data),
            b"INFO" => info = Some(Info::read(&mut Cursor::new(chunk.data))?),
            b"SONG" => songs = chunk.data,
            b"INST" => {
                let mut cursor = Cursor::new(chunk.data);
                while let Ok(raw) = RawInstrument::read(&mut cursor) {
                    raw_instruments.push(raw);
                }
            }
            b"PATT" => pattern_chunk = chunk.data,
            b"SMPL" => bodies = read_sample_bodies(chunk.data, chunk.offset),
            // Envelopes and the echo unit have no canonical counterpart
            b"VENV" | b"PENV" | b"DSPE" => {}
            _ => warn!(tag = %chunk.tag(), "unknown chunk skipped"),
        }
    }

    let info = info.ok_or_else(|| FormatError::structural(FORMAT, "INFO chunk missing"))?;
    let channels = info.channels.clamp(1, ml_ir::MAX_CHANNELS as u16) as u8;
    debug!(
        channels,
        patterns = info.patterns,
        instruments = info.instruments,
        songs = info.songs,
        "DBM info read"
    );

    let patterns = read_patterns(pattern_chunk, info.patterns as usize, channels);
    let instruments = raw_instruments
        .iter()
        .enumerate()
        .map(|(i, raw)| instrument(data, raw, &bodies, (i + 1) as u8))
        .collect();

    let order = song_orders(songs, info.songs as usize, ctx.subsong);

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = title;
    asm.linear_slides = Some(false);
    asm.channels = vec![ChannelSettings::default(); channels as usize];
    asm.declared_patterns = info.patterns as usize;
    asm.declared_instruments = info.instruments as usize;
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = order;
    Ok(asm.finish())
}

/// Orders of the requested song; an unknown song number selects the first.
fn song_orders(chunk: &[u8], count: usize, subsong: usize) -> Vec<usize> {
    let mut reader = ByteReader::new(chunk);
    let mut lists = Vec::with_capacity(count);
    for _ in 0..count {
        let Ok(_name) = reader.read_bytes(44) else { break };
        let Ok(length) = reader.read_u16_be() else { break };
        let list: Vec<usize> = (0..length).map_while(|_| reader.read_u16_be().ok()).map(usize::from).collect();
        if list.len() < length as usize {
            warn!(song = lists.len(), "song order list truncated");
        }
        lists.push(list);
    }
    if subsong >= lists.len() && subsong > 0 {
        warn!(subsong, songs = lists.len(), "unknown song, using the first");
    }
    let index = if subsong < lists.len() { subsong } else { 0 };
    lists.into_iter().nth(index).unwrap_or_default()
}

fn read_sample_bodies(chunk: &[u8], chunk_offset: usize) -> Vec<Option<SampleBody>> {
    let mut reader = ByteReader::new(chunk);
    let mut bodies = Vec::new();
    while !reader.is_eof() {
        let (Ok(flags), Ok(frames)) = (reader.read_u32_be(), reader.read_u32_be()) else {
            warn!(sample = bodies.len() + 1, "sample header truncated");
            break;
        };
        let encoding = match flags & 0x07 {
            0x01 => Some(PcmEncoding::Signed8),
            0x02 => Some(PcmEncoding::Signed16Be),
            0x04 => Some(PcmEncoding::Signed32Be),
            _ => None,
        };
        let offset = reader.pos();
        let size = encoding.map_or(0, |e| e.frame_size()) * frames as usize;
        bodies.push(encoding.map(|encoding| SampleBody {
            offset: chunk_offset + offset,
            frames: frames as usize,
            encoding,
        }));
        if reader.skip(size).is_err() {
            break;
        }
    }
    bodies
}

fn instrument(data: &[u8], raw: &RawInstrument, bodies: &[Option<SampleBody>], id: u8) -> Instrument {
    let name = read_string(&raw.name);
    let body = (raw.sample as usize).checked_sub(1).and_then(|i| bodies.get(i).copied().flatten());
    let Some(body) = body else {
        return Instrument::placeholder(id, &name, PlaceholderReason::Empty);
    };
    let header = SampleHeader {
        name,
        frames: body.frames,
        encoding: body.encoding,
        rate: raw.rate,
        loop_start: raw.loop_start,
        loop_end: raw.loop_start.saturating_add(raw.loop_len),
        looped: raw.flags & 0x03 != 0 && raw.loop_len > 0,
        volume: raw.volume.min(64) as u8,
        pan: Some((raw.pan.clamp(-128, 128) / 2).clamp(-64, 64) as i8),
        ..SampleHeader::default()
    };
    extract(data, body.offset, &header, id)
}

fn read_patterns(chunk: &[u8], count: usize, channels: u8) -> Vec<Pattern> {
    let mut reader = ByteReader::new(chunk);
    let mut patterns = Vec::with_capacity(count);
    for index in 0..count {
        let (Ok(rows), Ok(size)) = (reader.read_u16_be(), reader.read_u32_be()) else {
            warn!(pattern = index, "pattern header truncated");
            break;
        };
        let body = reader.read_upto(size as usize);
        if body.len() < size as usize {
            warn!(pattern = index, "pattern data truncated");
        }
        patterns.push(unpack_pattern(body, rows.clamp(1, ml_ir::MAX_ROWS), channels));
    }
    patterns
}

/// Unpack a pattern body: per row, `channel, mask, fields...` groups ended
/// by a zero byte.
fn unpack_pattern(body: &[u8], rows: u16, channels: u8) -> Pattern {
    let mut pattern = Pattern::new(rows, channels);
    let mut reader = ByteReader::new(body);
    let mut row = 0u16;
    while row < rows {
        let Ok(channel) = reader.read_u8() else { break };
        if channel == 0 {
            row += 1;
            continue;
        }
        let Ok(mask) = reader.read_u8() else { break };
        let fields = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20].map(|bit| {
            if mask & bit != 0 {
                reader.read_u8().ok()
            } else {
                Some(0)
            }
        });
        if fields.iter().any(Option::is_none) {
            break;
        }
        let [note, instrument, c1, p1, c2, p2] = fields.map(|f| f.unwrap_or(0));
        let cell = decode_cell(mask & 0x01 != 0, note, instrument, [(c1, p1), (c2, p2)]);
        if let Some(slot) = pattern.get_mut(row, channel - 1) {
            *slot = cell;
        }
    }
    pattern
}

fn decode_cell(has_note: bool, note: u8, instrument: u8, commands: [(u8, u8); 2]) -> Cell {
    let mut cell = Cell::empty();
    if has_note {
        cell.note = match note {
            KEY_OFF => Note::Off,
            n if n & 0x0F < 12 => Note::from_canonical((n >> 4) as i32 * 12 + (n & 0x0F) as i32 + 1),
            _ => Note::None,
        };
    }
    cell.instrument = instrument;
    place(&mut cell, commands.map(|(cmd, param)| command(cmd, param)));
    cell
}

fn command(cmd: u8, param: u8) -> Command {
    match cmd {
        0x0C => Command::Volume(param),
        0x00..=0x0F => protracker(cmd, param).into(),
        0x10 => Effect::new(EffectKind::SetGlobalVolume, param.min(64)).into(),
        0x11 | 0x14 | 0x15 | 0x19 => EffectKind::from_code(cmd).map_or(Command::None, |kind| Effect::new(kind, param).into()),
        _ => Command::None,
    }
}
