//! Sample extraction.
//!
//! Slices raw PCM out of a module, converts it to canonical signed 8 or
//! 16-bit mono, derives the playback rate and sanitizes loop points.

use ml_ir::{Instrument, InstrumentKind, PlaceholderReason, Sample, SampleData};
use tracing::warn;

use crate::note::{PeriodTable, PAL_CLOCK, REFERENCE_PERIOD};

/// Storage encoding of raw sample data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmEncoding {
    Signed8,
    Unsigned8,
    /// Signed 8-bit deltas
    Delta8,
    Signed16Le,
    Signed16Be,
    Unsigned16Le,
    /// Signed 16-bit little-endian deltas
    Delta16Le,
    /// Signed 32-bit big-endian, narrowed to 16 bits
    Signed32Be,
}

impl PcmEncoding {
    /// Bytes per mono frame.
    pub fn frame_size(self) -> usize {
        match self {
            PcmEncoding::Signed8 | PcmEncoding::Unsigned8 | PcmEncoding::Delta8 => 1,
            PcmEncoding::Signed32Be => 4,
            _ => 2,
        }
    }
}

/// Decode `frames` frames of raw data. Missing bytes shorten the result.
pub fn decode(raw: &[u8], encoding: PcmEncoding, frames: usize) -> SampleData {
    let size = encoding.frame_size();
    let frames = frames.min(raw.len() / size);
    let raw = &raw[..frames * size];
    match encoding {
        PcmEncoding::Signed8 => SampleData::Pcm8(raw.iter().map(|&b| b as i8).collect()),
        PcmEncoding::Unsigned8 => SampleData::Pcm8(raw.iter().map(|&b| (b ^ 0x80) as i8).collect()),
        PcmEncoding::Delta8 => {
            let mut acc = 0i8;
            SampleData::Pcm8(
                raw.iter()
                    .map(|&b| {
                        acc = acc.wrapping_add(b as i8);
                        acc
                    })
                    .collect(),
            )
        }
        PcmEncoding::Signed16Le => SampleData::Pcm16(
            raw.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect(),
        ),
        PcmEncoding::Signed16Be => SampleData::Pcm16(
            raw.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]])).collect(),
        ),
        PcmEncoding::Unsigned16Le => SampleData::Pcm16(
            raw.chunks_exact(2)
                .map(|c| (u16::from_le_bytes([c[0], c[1]]) ^ 0x8000) as i16)
                .collect(),
        ),
        PcmEncoding::Delta16Le => {
            let mut acc = 0i16;
            SampleData::Pcm16(
                raw.chunks_exact(2)
                    .map(|c| {
                        acc = acc.wrapping_add(i16::from_le_bytes([c[0], c[1]]));
                        acc
                    })
                    .collect(),
            )
        }
        PcmEncoding::Signed32Be => SampleData::Pcm16(
            raw.chunks_exact(4)
                .map(|c| (i32::from_be_bytes([c[0], c[1], c[2], c[3]]) >> 16) as i16)
                .collect(),
        ),
    }
}

/// Everything a format knows about one sample before extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleHeader {
    pub name: String,
    /// Declared length in frames
    pub frames: usize,
    pub encoding: PcmEncoding,
    pub rate: u32,
    /// Loop start in frames
    pub loop_start: u32,
    /// Loop end in frames (exclusive)
    pub loop_end: u32,
    pub looped: bool,
    /// Default volume (0-64)
    pub volume: u8,
    pub finetune: i8,
    pub pan: Option<i8>,
}

impl Default for SampleHeader {
    fn default() -> Self {
        Self {
            name: String::new(),
            frames: 0,
            encoding: PcmEncoding::Signed8,
            rate: 8363,
            loop_start: 0,
            loop_end: 0,
            looped: false,
            volume: 64,
            finetune: 0,
            pan: None,
        }
    }
}

impl SampleHeader {
    /// Declared size of the PCM payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.frames.saturating_mul(self.encoding.frame_size())
    }
}

/// Build an instrument from a header and the PCM payload at `offset`.
///
/// The declared length is clamped to the buffer. Zero or missing data
/// yields an empty placeholder.
pub fn extract(data: &[u8], offset: usize, header: &SampleHeader, id: u8) -> Instrument {
    if header.frames == 0 {
        return Instrument::placeholder(id, &header.name, PlaceholderReason::Empty);
    }
    let raw = data.get(offset..).unwrap_or(&[]);
    from_pcm(decode(raw, header.encoding, header.frames), header, id)
}

/// Build an instrument from already decoded PCM.
pub fn from_pcm(pcm: SampleData, header: &SampleHeader, id: u8) -> Instrument {
    if header.frames == 0 || pcm.is_empty() {
        warn!(sample = id, "sample data missing");
        return Instrument::placeholder(id, &header.name, PlaceholderReason::Empty);
    }
    if pcm.len() < header.frames {
        warn!(sample = id, declared = header.frames, found = pcm.len(), "sample data truncated");
    }

    let mut sample = Sample::new(pcm, header.rate.max(1));
    sample.volume = header.volume.min(64);
    sample.finetune = header.finetune;
    sample.pan = header.pan;
    if header.looped {
        sample.set_loop(header.loop_start, header.loop_end);
    }
    Instrument::new(id, &header.name, InstrumentKind::Sample(sample))
}

/// Playback rate for a sample that sounds at `period` on C-4.
pub fn period_rate(period: f64) -> u32 {
    if period <= 0.0 {
        return 0;
    }
    libm::round(PAL_CLOCK / (2.0 * period)) as u32
}

/// C-4 playback rate of an Amiga sample with the given fine-tune.
pub fn amiga_rate(table: &PeriodTable, finetune: i8) -> u32 {
    let period = table.row(finetune)[24];
    debug_assert_eq!(table.row(0)[24], REFERENCE_PERIOD);
    period_rate(period as f64)
}

/// C-4 playback rate from a relative note and fine-tune
/// (`8363 * 2^((relative * 128 + finetune) / 1536)`).
pub fn transposed_rate(relative: i8, finetune: i8) -> u32 {
    let exponent = (relative as f64 * 128.0 + finetune as f64) / 1536.0;
    libm::round(8363.0 * libm::pow(2.0, exponent)) as u32
}

/// Loop points within this many bytes of twice the sample length are
/// taken to be stored in bytes rather than frames.
pub const DOUBLED_LOOP_WINDOW: u32 = 16;

/// Halve loop points that were stored in bytes instead of frames.
pub fn fix_doubled_loop(loop_start: u32, loop_end: u32, frames: u32) -> (u32, u32) {
    let doubled = frames.saturating_mul(2);
    let sum = loop_start.saturating_add(loop_end);
    if frames > 0 && loop_end > frames && sum.abs_diff(doubled) <= DOUBLED_LOOP_WINDOW {
        (loop_start / 2, loop_end / 2)
    } else {
        (loop_start, loop_end)
    }
}
