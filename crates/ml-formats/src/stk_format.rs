//! Ultimate SoundTracker 15-sample MOD parser.
//!
//! These files carry no signature, so detection samples the content:
//! printable names, legal sample records and order list, and a first
//! pattern made of plausible cells with some actual notes in it.

use ml_ir::Song;
use tracing::debug;

use crate::assemble::SongAssembler;
use crate::mod_format::{extract_samples, has_signature, read_patterns, read_sample_headers, sample_header};
use crate::note::{PeriodTable, AMIGA_PERIODS};
use crate::pcm::SampleHeader;
use crate::reader::{bytes_at, is_printable, read_string, u16_be, u8_at};
use crate::{DecodeContext, FormatError};

const FORMAT: &str = "STK";
const NUM_SAMPLES: usize = 15;
const HEADER_LEN: usize = 600;
const PATTERN_LEN: usize = 1024;
const MAX_PATTERNS: u8 = 64;
const SCANNED_PATTERNS: usize = 4;
const MIN_NOTES: usize = 4;

/// Check for a 15-sample SoundTracker module.
pub fn detect(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < HEADER_LEN + PATTERN_LEN {
        return false;
    }
    // A 31-sample signature means this is something else
    if has_signature(data) {
        return false;
    }
    if !is_printable(&data[0..20]) {
        return false;
    }

    let mut any_sample = false;
    for i in 0..NUM_SAMPLES {
        let base = 20 + i * 30;
        if !is_printable(&data[base..base + 22]) {
            return false;
        }
        let (Some(length), Some(volume), Some(loop_len)) =
            (u16_be(data, base + 22), u8_at(data, base + 25), u16_be(data, base + 28))
        else {
            return false;
        };
        if data[base + 24] > 0x0F || volume > 64 || length > 0x8000 || loop_len > 0x8000 {
            return false;
        }
        any_sample |= length > 0;
    }
    if !any_sample {
        return false;
    }

    let length = data[470];
    if length == 0 || length > 128 {
        return false;
    }
    let orders = &data[472..600];
    if orders.iter().any(|&p| p >= MAX_PATTERNS) {
        return false;
    }

    let highest = orders.iter().copied().max().unwrap_or(0) as usize;
    let mut notes = 0;
    let mut instruments = 0;
    for index in 0..=highest.min(SCANNED_PATTERNS - 1) {
        let Some(pattern) = bytes_at(data, HEADER_LEN + index * PATTERN_LEN, PATTERN_LEN) else {
            break;
        };
        for cell in pattern.chunks_exact(4) {
            let instrument = (cell[0] & 0xF0) | (cell[2] >> 4);
            let period = u16::from_be_bytes([cell[0] & 0x0F, cell[1]]);
            if instrument as usize > NUM_SAMPLES {
                return false;
            }
            if period != 0 {
                if !(AMIGA_PERIODS[59]..=AMIGA_PERIODS[0]).contains(&period) {
                    return false;
                }
                notes += 1;
            }
            instruments += usize::from(instrument != 0);
        }
    }
    notes >= MIN_NOTES && instruments > 0
}

/// Load a 15-sample SoundTracker module.
pub fn load_stk(data: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
    if !detect(data, Some(ctx.filename)) {
        return Err(FormatError::Detection { format: FORMAT });
    }
    let table = PeriodTable::amiga();
    let raw = read_sample_headers(data, 20, NUM_SAMPLES)?;
    // Repeat offsets are stored in bytes
    let headers: Vec<SampleHeader> = raw.iter().map(|r| sample_header(r, &table, 1)).collect();
    let finetunes = vec![0i8; NUM_SAMPLES];

    let length = data[470] as usize;
    let orders = &data[472..600];
    let highest = orders.iter().copied().max().unwrap_or(0) as usize;
    let (patterns, pattern_bytes) = read_patterns(data, HEADER_LEN, highest + 1, 4, &table, &finetunes);
    debug!(patterns = patterns.len(), "SoundTracker header parsed");

    let mut asm = SongAssembler::new(FORMAT, ctx.filename);
    asm.title = read_string(&data[0..20]);
    asm.amiga_channels(4);
    asm.linear_slides = Some(false);
    asm.declared_patterns = patterns.len();
    asm.declared_instruments = NUM_SAMPLES;
    asm.patterns = patterns;
    asm.order = orders[..length].iter().map(|&p| p as usize).collect();
    asm.instruments = extract_samples(data, HEADER_LEN + pattern_bytes, &headers);
    Ok(asm.finish())
}
