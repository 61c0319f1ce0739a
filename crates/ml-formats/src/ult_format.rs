//! UltraTracker module parser.
//!
//! Tracks are stored channel by channel across all patterns, run-length
//! packed with a 0xFC marker. Each event carries two effects.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Note, Pattern, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{bcd, place, protracker, Command};
use crate::mod_format::extract_samples;
use crate::packing::RleTrack;
use crate::pcm::{PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, u8_at, ByteReader};
use crate::s3m_format::pan_nibble;
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "ULT";
const MAGIC: &[u8] = b"MAS_UTrack_V00";
const HEADER_LEN: usize = 48;
const ROWS: u16 = 64;
const RLE_MARKER: u8 = 0xFC;
const EVENT_LEN: usize = 5;

#[derive(BinRead, Debug)]
#[br(little)]
struct Header {
    _magic: [u8; 14],
    version: u8,
    title: [u8; 32],
    message_lines: u8,
}

#[derive(BinRead, Debug)]
#[br(little, import(version: u8))]
struct RawSample {
    name: [u8; 32],
    _filename: [u8; 12],
    loop_start: u32,
    loop_end: u32,
    size_start: u32,
    size_end: u32,
    volume: u8,
    flags: u8,
    #[br(if(version >= b'4'))]
    speed: Option<u16>,
    _finetune: i16,
}

/// Check the "MAS_UTrack_V00" tag and a known version digit.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN + 1 || !has_magic(data, 0, MAGIC) {
        return false;
    }
    if !matches!(u8_at(data, 14), Some(b'1'..=b'4')) {
        return false;
    }
    HEADER_LEN + data[47] as usize * 32 < data.len()
}

/// Load an ULT file from bytes.
pub fn load_ult(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    let version = header.version;

    let mut cursor = Cursor::new(data);
    cursor.set_position((HEADER_LEN + header.message_lines as usize * 32) as u64);
    let sample_count = u8::read_le(&mut cursor)? as usize;
    let raw: Vec<RawSample> = (0..sample_count)
        .map(|_| RawSample::read_args(&mut cursor, (version,)))
        .collect::<Result<_, _>>()?;
    let orders = <[u8; 256]>::read_le(&mut cursor)?;
    let stored_channels = u8::read_le(&mut cursor)? as usize + 1;
    let pattern_count = u8::read_le(&mut cursor)? as usize + 1;
    let mut pans = if version >= b'3' {
        Some(Vec::<u8>::read_le_args(&mut cursor, binrw::VecArgs::builder().count(stored_channels).finalize())?)
    } else {
        None
    };
    let channels = stored_channels.min(ml_ir::MAX_CHANNELS);
    if let Some(pans) = pans.as_mut() {
        pans.truncate(channels);
    }
    debug!(version = %(version as char), channels, patterns = pattern_count, samples = sample_count, "ULT header parsed");

    let mut patterns: Vec<Pattern> = (0..pattern_count).map(|_| Pattern::new(ROWS, channels as u8)).collect();
    let mut reader = ByteReader::at(data, cursor.position() as usize);
    // Tracks past the channel limit are decoded and discarded to reach the samples
    let mut discarded = vec![Cell::empty(); ROWS as usize];
    'tracks: for ch in 0..stored_channels {
        let mut track = RleTrack::new(RLE_MARKER, EVENT_LEN);
        for index in 0..pattern_count {
            let cells = match patterns[index].channels.get_mut(ch) {
                Some(channel) => &mut channel.cells,
                None => &mut discarded,
            };
            if !track.fill(&mut reader, cells, decode_event) {
                warn!(channel = ch, pattern = index, "track data truncated");
                break 'tracks;
            }
        }
    }

    let headers: Vec<SampleHeader> = raw.iter().map(sample_header).collect();

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&header.title);
    asm.linear_slides = Some(false);
    asm.channels = match &pans {
        Some(pans) => pans.iter().map(|&p| ChannelSettings::panned(pan_nibble(p & 0x0F))).collect(),
        None => (0..channels).map(ChannelSettings::amiga).collect(),
    };
    asm.declared_patterns = pattern_count;
    asm.declared_instruments = sample_count;
    asm.patterns = patterns;
    asm.order = orders.iter().take_while(|&&p| p != 0xFF).map(|&p| p as usize).collect();
    asm.instruments = extract_samples(data, reader.pos(), &headers);
    Ok(asm.finish())
}

fn sample_header(raw: &RawSample) -> SampleHeader {
    let sixteen_bit = raw.flags & 0x04 != 0;
    let bytes = raw.size_end.saturating_sub(raw.size_start);
    SampleHeader {
        name: read_string(&raw.name),
        frames: (if sixteen_bit { bytes / 2 } else { bytes }) as usize,
        encoding: if sixteen_bit { PcmEncoding::Signed16Le } else { PcmEncoding::Signed8 },
        rate: raw.speed.map_or(8363, u32::from),
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        looped: raw.flags & 0x08 != 0,
        volume: raw.volume / 4,
        ..SampleHeader::default()
    }
}

/// Decode `[note, instrument, commands, param1, param2]`.
fn decode_event(bytes: &[u8]) -> Cell {
    let mut cell = Cell::empty();
    cell.note = match bytes[0] {
        0 => Note::None,
        n => Note::from_canonical(n as i32 + 24),
    };
    cell.instrument = bytes[1];
    let first = command(bytes[2] & 0x0F, bytes[3]);
    let second = command(bytes[2] >> 4, bytes[4]);
    place(&mut cell, [first, second]);
    cell
}

fn command(cmd: u8, param: u8) -> Command {
    match cmd {
        // Sample loop control, unused and surround commands
        0x5 | 0x6 | 0x8 => Command::None,
        0x9 => Effect::new(EffectKind::SampleOffset, param.saturating_mul(4)).into(),
        0xB => Effect::new(EffectKind::SetPan, (param & 0x0F) * 16 + 8).into(),
        0xC => Command::Volume(param / 4),
        0xD => Effect::new(EffectKind::PatternBreak, bcd(param)).into(),
        _ => protracker(cmd, param).into(),
    }
}
