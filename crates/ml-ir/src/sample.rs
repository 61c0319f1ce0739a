//! Sample data types.

use alloc::vec::Vec;

/// A sample-backed instrument payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Audio data
    pub data: SampleData,
    /// Playback rate in Hz at the reference note (C-4)
    pub sample_rate: u32,
    /// Loop start position (in frames)
    pub loop_start: u32,
    /// Loop end position (in frames, exclusive)
    pub loop_end: u32,
    /// Loop type
    pub loop_type: LoopType,
    /// Default volume (0-64)
    pub volume: u8,
    /// Fine-tune carried from the source format (-128 to 127, 0 = none)
    pub finetune: i8,
    /// Default panning (-64 to +64), if the source format stores one
    pub pan: Option<i8>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            data: SampleData::Pcm8(Vec::new()),
            sample_rate: 8363,
            loop_start: 0,
            loop_end: 0,
            loop_type: LoopType::None,
            volume: 64,
            finetune: 0,
            pan: None,
        }
    }
}

impl Sample {
    /// Create a sample around PCM data.
    pub fn new(data: SampleData, sample_rate: u32) -> Self {
        Self { data, sample_rate, ..Self::default() }
    }

    /// Get the length of the sample in frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the sample has no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the sample has an active loop.
    pub fn has_loop(&self) -> bool {
        self.loop_type != LoopType::None && self.loop_end > self.loop_start
    }

    /// Set a forward loop, clamped to the sample length.
    ///
    /// A region that ends up empty after clamping disables the loop.
    pub fn set_loop(&mut self, start: u32, end: u32) {
        let len = self.len() as u32;
        let end = end.min(len);
        let start = start.min(end);
        if end > start {
            self.loop_start = start;
            self.loop_end = end;
            self.loop_type = LoopType::Forward;
        } else {
            self.clear_loop();
        }
    }

    /// Remove any loop.
    pub fn clear_loop(&mut self) {
        self.loop_start = 0;
        self.loop_end = 0;
        self.loop_type = LoopType::None;
    }
}

/// Canonical PCM payload (mono).
#[derive(Clone, Debug, PartialEq)]
pub enum SampleData {
    /// 8-bit signed samples
    Pcm8(Vec<i8>),
    /// 16-bit signed samples
    Pcm16(Vec<i16>),
}

impl SampleData {
    /// Get the number of sample frames.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Pcm8(v) => v.len(),
            SampleData::Pcm16(v) => v.len(),
        }
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bits per sample frame.
    pub fn bits(&self) -> u8 {
        match self {
            SampleData::Pcm8(_) => 8,
            SampleData::Pcm16(_) => 16,
        }
    }

    /// Get a sample value at position, scaled to 16 bits.
    pub fn get(&self, pos: usize) -> i16 {
        match self {
            SampleData::Pcm8(v) => v.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Pcm16(v) => v.get(pos).copied().unwrap_or(0),
        }
    }

    /// Drop everything past `len` frames.
    pub fn truncate(&mut self, len: usize) {
        match self {
            SampleData::Pcm8(v) => v.truncate(len),
            SampleData::Pcm16(v) => v.truncate(len),
        }
    }
}

/// Sample loop type.
///
/// Ping-pong and sustain loops of the source formats are collapsed to
/// `Forward`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopType {
    /// No loop
    #[default]
    None,
    /// Forward loop
    Forward,
}
