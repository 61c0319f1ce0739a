//! Impulse Tracker module parser.
//!
//! Patterns are unpacked with the per-channel mask and recall values.
//! In instrument mode each instrument is reduced to the sample its
//! keyboard table plays at C-5; envelopes and note mapping are dropped.
//! Compressed samples (IT 2.14 / 2.15) are decoded.

use std::io::Cursor;

use binrw::BinRead;
use ml_ir::{Cell, ChannelSettings, Effect, EffectKind, Instrument, Note, Pattern, PlaceholderReason, Song};
use tracing::{debug, warn};

use crate::assemble::SongAssembler;
use crate::effect_parser::{place, scream_tracker, Command, Flavor};
use crate::it_compression::decompress;
use crate::pcm::{extract, from_pcm, PcmEncoding, SampleHeader};
use crate::reader::{has_magic, read_string, u16_le, ByteReader};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "IT";
const HEADER_LEN: usize = 192;
const MAX_CHANNELS: usize = 64;
const MAX_COUNT: u16 = 256;
/// Keyboard slot used to pick an instrument's sample (C-5)
const KEYBOARD_NOTE: usize = 60;

const FLAG_STEREO: u16 = 0x01;
const FLAG_INSTRUMENTS: u16 = 0x04;
const FLAG_LINEAR: u16 = 0x08;

const SAMPLE_PRESENT: u8 = 0x01;
const SAMPLE_16BIT: u8 = 0x02;
const SAMPLE_STEREO: u8 = 0x04;
const SAMPLE_COMPRESSED: u8 = 0x08;
const SAMPLE_LOOP: u8 = 0x10;

/// Tone portamento speeds of volume column commands 193-202.
const VOLUME_PORTA: [u8; 10] = [0x00, 0x01, 0x04, 0x08, 0x10, 0x20, 0x40, 0x60, 0x80, 0xFF];

#[derive(BinRead, Debug)]
#[br(little, magic = b"IMPM")]
struct Header {
    title: [u8; 26],
    _highlight: u16,
    order_count: u16,
    instrument_count: u16,
    sample_count: u16,
    pattern_count: u16,
    _created_with: u16,
    _compatible_with: u16,
    flags: u16,
    _special: u16,
    global_volume: u8,
    _mix_volume: u8,
    speed: u8,
    tempo: u8,
    _separation: u8,
    _pitch_wheel_depth: u8,
    _message_length: u16,
    _message_offset: u32,
    _reserved: u32,
    channel_pan: [u8; 64],
    channel_volume: [u8; 64],
    #[br(count = order_count)]
    orders: Vec<u8>,
    #[br(count = instrument_count)]
    instrument_pointers: Vec<u32>,
    #[br(count = sample_count)]
    sample_pointers: Vec<u32>,
    #[br(count = pattern_count)]
    pattern_pointers: Vec<u32>,
}

#[derive(BinRead, Debug)]
#[br(little, magic = b"IMPS")]
struct RawSample {
    _filename: [u8; 12],
    _zero: u8,
    _global_volume: u8,
    flags: u8,
    volume: u8,
    name: [u8; 26],
    convert: u8,
    default_pan: u8,
    length: u32,
    loop_start: u32,
    loop_end: u32,
    c5_speed: u32,
    _sustain_start: u32,
    _sustain_end: u32,
    pointer: u32,
    _vibrato: [u8; 4],
}

/// Only the fields shared by the old (pre-2.0) and new instrument layouts.
#[derive(BinRead, Debug)]
#[br(little, magic = b"IMPI")]
struct RawInstrument {
    _filename: [u8; 12],
    _zero: u8,
    _envelope_settings: [u8; 15],
    name: [u8; 26],
    _midi: [u8; 6],
    /// 120 (note, sample) pairs
    keyboard: [u8; 240],
}

/// Check for "IMPM" and count tables that fit the buffer.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN || !has_magic(data, 0, b"IMPM") {
        return false;
    }
    let (Some(orders), Some(instruments), Some(samples), Some(patterns)) =
        (u16_le(data, 32), u16_le(data, 34), u16_le(data, 36), u16_le(data, 38))
    else {
        return false;
    };
    if [orders, instruments, samples, patterns].iter().any(|&n| n > MAX_COUNT) {
        return false;
    }
    let pointers = 4 * (instruments as usize + samples as usize + patterns as usize);
    HEADER_LEN + orders as usize + pointers <= data.len()
}

/// Load an IT file from bytes.
pub fn load_it(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let header = Header::read(&mut Cursor::new(data))?;
    let instrument_mode = header.flags & FLAG_INSTRUMENTS != 0;
    debug!(
        orders = header.order_count,
        instruments = header.instrument_count,
        samples = header.sample_count,
        patterns = header.pattern_count,
        instrument_mode,
        "IT header parsed"
    );

    let samples: Vec<Instrument> = header
        .sample_pointers
        .iter()
        .enumerate()
        .map(|(i, &pointer)| read_sample(data, pointer as usize, (i + 1) as u8))
        .collect();
    let instruments = if instrument_mode {
        header
            .instrument_pointers
            .iter()
            .enumerate()
            .map(|(i, &pointer)| read_instrument(data, pointer as usize, &samples, (i + 1) as u8))
            .collect()
    } else {
        samples
    };

    let mut patterns: Vec<Pattern> = header
        .pattern_pointers
        .iter()
        .enumerate()
        .map(|(i, &pointer)| read_pattern(data, pointer as usize, i))
        .collect();

    // Only channels that carry data survive
    let used = patterns
        .iter()
        .filter_map(|p| p.channels.iter().rposition(|c| c.cells.iter().any(|cell| !cell.is_empty())))
        .max()
        .map_or(1, |last| last + 1);
    for pattern in &mut patterns {
        pattern.channels.truncate(used);
    }
    let stereo = header.flags & FLAG_STEREO != 0;
    let channels = (0..used)
        .map(|i| channel_settings(header.channel_pan[i], header.channel_volume[i], stereo))
        .collect();

    let order = header
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
    asm.global_volume = header.global_volume.min(128) / 2;
    asm.linear_slides = Some(header.flags & FLAG_LINEAR != 0);
    asm.channels = channels;
    asm.declared_patterns = header.pattern_count as usize;
    asm.declared_instruments = if instrument_mode {
        header.instrument_count as usize
    } else {
        header.sample_count as usize
    };
    asm.patterns = patterns;
    asm.instruments = instruments;
    asm.order = order;
    Ok(asm.finish())
}

/// IT pan 0..=64 to -64..=64. Values above 64 (surround) are centered.
fn pan_position(pan: u8) -> i8 {
    match pan {
        0..=64 => (pan as i16 * 2 - 64) as i8,
        _ => 0,
    }
}

fn channel_settings(pan: u8, volume: u8, stereo: bool) -> ChannelSettings {
    let mut settings = ChannelSettings::panned(if stereo { pan_position(pan & 0x7F) } else { 0 });
    settings.initial_vol = volume.min(64);
    settings.muted = pan & 0x80 != 0;
    settings
}

fn read_sample(data: &[u8], offset: usize, id: u8) -> Instrument {
    if offset == 0 {
        return Instrument::placeholder(id, "", PlaceholderReason::Empty);
    }
    let raw = match RawSample::read(&mut Cursor::new(data.get(offset..).unwrap_or(&[]))) {
        Ok(raw) => raw,
        Err(_) => {
            warn!(sample = id, "sample header missing");
            return Instrument::placeholder(id, "", PlaceholderReason::Empty);
        }
    };
    let name = read_string(&raw.name);
    if raw.flags & SAMPLE_PRESENT == 0 || raw.length == 0 {
        return Instrument::placeholder(id, &name, PlaceholderReason::Empty);
    }
    if raw.flags & SAMPLE_STEREO != 0 {
        debug!(sample = id, "stereo sample, keeping the left channel");
    }

    let sixteen_bit = raw.flags & SAMPLE_16BIT != 0;
    let signed = raw.convert & 0x01 != 0;
    let big_endian = raw.convert & 0x02 != 0;
    let delta = raw.convert & 0x04 != 0;
    let encoding = match (sixteen_bit, signed, big_endian, delta) {
        (false, _, _, true) => PcmEncoding::Delta8,
        (true, _, _, true) => PcmEncoding::Delta16Le,
        (false, true, _, _) => PcmEncoding::Signed8,
        (false, false, _, _) => PcmEncoding::Unsigned8,
        (true, true, true, _) => PcmEncoding::Signed16Be,
        (true, true, false, _) => PcmEncoding::Signed16Le,
        (true, false, _, _) => PcmEncoding::Unsigned16Le,
    };
    let header = SampleHeader {
        name,
        frames: raw.length as usize,
        encoding,
        rate: raw.c5_speed,
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        looped: raw.flags & SAMPLE_LOOP != 0,
        volume: raw.volume.min(64),
        finetune: 0,
        pan: (raw.default_pan & 0x80 != 0).then(|| pan_position(raw.default_pan & 0x7F)),
    };

    if raw.flags & SAMPLE_COMPRESSED != 0 {
        let packed = data.get(raw.pointer as usize..).unwrap_or(&[]);
        // Convert flag 0x04 selects the IT 2.15 double delta for packed data
        let pcm = decompress(packed, header.frames, sixteen_bit, delta);
        return from_pcm(pcm, &header, id);
    }
    extract(data, raw.pointer as usize, &header, id)
}

fn read_instrument(data: &[u8], offset: usize, samples: &[Instrument], id: u8) -> Instrument {
    let raw = match RawInstrument::read(&mut Cursor::new(data.get(offset..).unwrap_or(&[]))) {
        Ok(raw) => raw,
        Err(_) => {
            warn!(instrument = id, "instrument header missing");
            return Instrument::placeholder(id, "", PlaceholderReason::Empty);
        }
    };
    let name = read_string(&raw.name);
    let sample_at = |note: usize| raw.keyboard[note * 2 + 1];
    let source = std::iter::once(sample_at(KEYBOARD_NOTE))
        .chain((0..120).map(sample_at))
        .find(|&s| s != 0)
        .and_then(|s| samples.get(s as usize - 1));
    match source {
        Some(sample) => {
            let name = if name.is_empty() { sample.name.as_str() } else { name.as_str() };
            Instrument::new(id, name, sample.kind.clone())
        }
        None => Instrument::placeholder(id, &name, PlaceholderReason::Empty),
    }
}

/// Values a channel may recall instead of storing them again.
#[derive(Clone, Copy, Debug, Default)]
struct Recall {
    mask: u8,
    note: u8,
    instrument: u8,
    volume: u8,
    command: (u8, u8),
}

fn read_pattern(data: &[u8], offset: usize, index: usize) -> Pattern {
    let mut reader = ByteReader::at(data, offset);
    let rows = match (offset, reader.read_u16_le(), reader.read_u16_le()) {
        (0, _, _) => return Pattern::new(64, MAX_CHANNELS as u8),
        (_, Ok(_), Ok(rows)) => rows.clamp(1, ml_ir::MAX_ROWS),
        _ => {
            warn!(pattern = index, "pattern header missing");
            return Pattern::new(64, MAX_CHANNELS as u8);
        }
    };
    let mut pattern = Pattern::new(rows, MAX_CHANNELS as u8);
    if reader.skip(4).is_err() {
        return pattern;
    }

    let mut recall = [Recall::default(); MAX_CHANNELS];
    let mut row = 0u16;
    while row < rows {
        let Ok(marker) = reader.read_u8() else {
            warn!(pattern = index, row, "pattern data truncated");
            break;
        };
        if marker == 0 {
            row += 1;
            continue;
        }
        let channel = (marker.wrapping_sub(1) & 0x3F) as usize;
        match read_event(&mut reader, marker, &mut recall[channel]) {
            Ok(cell) => *pattern.cell_mut(row, channel as u8) = cell,
            Err(_) => {
                warn!(pattern = index, row, "pattern data truncated");
                break;
            }
        }
    }
    pattern
}

fn read_event(reader: &mut ByteReader, marker: u8, last: &mut Recall) -> Result<Cell, FormatError> {
    if marker & 0x80 != 0 {
        last.mask = reader.read_u8()?;
    }
    let mask = last.mask;
    let (mut note, mut instrument, mut volume, mut command) = (None, None, None, None);

    if mask & 0x01 != 0 {
        last.note = reader.read_u8()?;
    }
    if mask & 0x11 != 0 {
        note = Some(last.note);
    }
    if mask & 0x02 != 0 {
        last.instrument = reader.read_u8()?;
    }
    if mask & 0x22 != 0 {
        instrument = Some(last.instrument);
    }
    if mask & 0x04 != 0 {
        last.volume = reader.read_u8()?;
    }
    if mask & 0x44 != 0 {
        volume = Some(last.volume);
    }
    if mask & 0x08 != 0 {
        last.command = (reader.read_u8()?, reader.read_u8()?);
    }
    if mask & 0x88 != 0 {
        command = Some(last.command);
    }

    let mut cell = Cell::empty();
    cell.note = note.map_or(Note::None, it_note);
    cell.instrument = instrument.unwrap_or(0);
    let main = command.map_or(Command::None, |(cmd, param)| scream_tracker(cmd, param, Flavor::It).into());
    place(&mut cell, [main, volume.map_or(Command::None, volume_column)]);
    Ok(cell)
}

/// IT notes 0..=119 start at C-0; C-5 (60) is the reference note.
/// Note cut (254), note off (255) and fade (120..=253) all release.
fn it_note(value: u8) -> Note {
    match value {
        0..=119 => Note::from_canonical(value as i32 - 11),
        _ => Note::Off,
    }
}

/// Translate a volume column byte.
fn volume_column(value: u8) -> Command {
    use EffectKind::*;
    match value {
        0..=64 => Command::Volume(value),
        65..=74 => Effect::extended(0xA, value - 65).into(),
        75..=84 => Effect::extended(0xB, value - 75).into(),
        85..=94 => Effect::new(VolumeSlide, (value - 85) << 4).into(),
        95..=104 => Effect::new(VolumeSlide, value - 95).into(),
        105..=114 => Effect::new(PortaDown, (value - 105) * 4).into(),
        115..=124 => Effect::new(PortaUp, (value - 115) * 4).into(),
        128..=192 => Effect::new(SetPan, ((value - 128) as u16 * 255 / 64) as u8).into(),
        193..=202 => Effect::new(TonePorta, VOLUME_PORTA[(value - 193) as usize]).into(),
        203..=212 => Effect::new(Vibrato, value - 203).into(),
        _ => Command::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_ir::VolumeCommand;

    #[test]
    fn note_numbering() {
        assert_eq!(it_note(60), Note::On(49));
        assert_eq!(it_note(12), Note::On(1));
        assert_eq!(it_note(5), Note::None);
        assert_eq!(it_note(254), Note::Off);
        assert_eq!(it_note(130), Note::Off);
    }

    #[test]
    fn volume_column_commands() {
        assert_eq!(volume_column(40), Command::Volume(40));
        assert_eq!(volume_column(88), Command::Effect(Effect::new(EffectKind::VolumeSlide, 0x30)));
        assert_eq!(volume_column(192), Command::Effect(Effect::new(EffectKind::SetPan, 255)));
        assert_eq!(volume_column(194), Command::Effect(Effect::new(EffectKind::TonePorta, 1)));
        assert_eq!(volume_column(250), Command::None);
    }

    #[test]
    fn packed_pattern_with_recall() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0, 0, 2, 0, 0, 0, 0, 0]);
        // row 0: channel 1 note+instrument+volume, channel 3 speed 5
        data.extend_from_slice(&[0x81, 0x07, 60, 1, 32, 0x83, 0x08, 1, 5, 0]);
        // row 1: channel 1 recalls note and instrument
        data.extend_from_slice(&[0x81, 0x30, 0]);
        let pattern = read_pattern(&data, 4, 0);

        assert_eq!(pattern.rows, 2);
        let cell = pattern.cell(0, 0);
        assert_eq!((cell.note, cell.instrument), (Note::On(49), 1));
        assert_eq!(cell.volume, VolumeCommand::Volume(32));
        assert_eq!(pattern.cell(0, 2).effects[0], Effect::new(EffectKind::SpeedTempo, 5));
        let recalled = pattern.cell(1, 0);
        assert_eq!((recalled.note, recalled.instrument), (Note::On(49), 1));
        assert_eq!(recalled.volume, VolumeCommand::None);
    }

    #[test]
    fn truncated_pattern_keeps_decoded_rows() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0, 0, 64, 0, 0, 0, 0, 0, 0x81, 0x01, 60, 0, 0x81]);
        let pattern = read_pattern(&data, 4, 0);
        assert_eq!(pattern.rows, 64);
        assert_eq!(pattern.cell(0, 0).note, Note::On(49));
    }

    #[test]
    fn mono_files_center_channels() {
        assert_eq!(channel_settings(0, 64, true).initial_pan, -64);
        assert_eq!(channel_settings(0, 64, false).initial_pan, 0);
        assert!(channel_settings(0x80 | 32, 64, true).muted);
    }

    #[test]
    fn zeros_are_rejected() {
        assert!(!detect(&[0u8; 1024], None));
    }
}
