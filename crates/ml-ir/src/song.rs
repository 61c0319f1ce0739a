//! Song structure and invariant checking.

use alloc::string::String;
use alloc::vec::Vec;
use arrayvec::ArrayString;
use core::fmt;

use crate::instrument::{Instrument, InstrumentKind};
use crate::pattern::Pattern;

/// A complete, decoded song.
///
/// Built once by a format decoder and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    /// Song title
    pub title: ArrayString<32>,
    /// Short tag of the format the song was decoded from (e.g. "XM")
    pub format: &'static str,
    /// Initial tempo in BPM (32-255)
    pub initial_tempo: u8,
    /// Initial speed (ticks per row, 1-255)
    pub initial_speed: u8,
    /// Global volume (0-64)
    pub global_volume: u8,
    /// Linear (true) or Amiga-period (false) pitch slides, when known
    pub linear_slides: Option<bool>,
    /// Per-channel settings
    pub channels: Vec<ChannelSettings>,
    /// Patterns, indexed by the order list
    pub patterns: Vec<Pattern>,
    /// Instruments; instrument `n` has id `n + 1`
    pub instruments: Vec<Instrument>,
    /// Pattern indices in playback order
    pub order: Vec<u16>,
    /// Order index playback loops back to
    pub restart_position: u16,
}

impl Default for Song {
    fn default() -> Self {
        Self {
            title: ArrayString::new(),
            format: "",
            initial_tempo: 125,
            initial_speed: 6,
            global_volume: 64,
            linear_slides: None,
            channels: Vec::new(),
            patterns: Vec::new(),
            instruments: Vec::new(),
            order: Vec::new(),
            restart_position: 0,
        }
    }
}

impl Song {
    /// Create a new empty song.
    pub fn new(title: &str) -> Self {
        let mut song = Self::default();
        push_truncated(&mut song.title, title);
        song
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length of the order list.
    pub fn song_length(&self) -> usize {
        self.order.len()
    }

    /// Look up an instrument by its 1-based id.
    pub fn instrument(&self, id: u8) -> Option<&Instrument> {
        if id == 0 {
            return None;
        }
        self.instruments.get(id as usize - 1).filter(|i| i.id == id)
    }

    /// Check every structural invariant of the canonical model.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let len = self.order.len();
        if (self.restart_position as usize) >= len.max(1) {
            return Err(InvariantViolation::RestartOutOfRange {
                restart: self.restart_position,
                length: len,
            });
        }
        if let Some((position, &pattern)) = self
            .order
            .iter()
            .enumerate()
            .find(|(_, p)| **p as usize >= self.patterns.len())
        {
            return Err(InvariantViolation::DanglingOrder { position, pattern });
        }

        let channels = self.channels.len();
        for (index, pattern) in self.patterns.iter().enumerate() {
            if pattern.num_channels() != channels {
                return Err(InvariantViolation::ChannelCount {
                    pattern: index,
                    found: pattern.num_channels(),
                    expected: channels,
                });
            }
            if pattern.rows == 0 {
                return Err(InvariantViolation::EmptyPattern { pattern: index });
            }
            if let Some(channel) = pattern
                .channels
                .iter()
                .position(|c| c.cells.len() != pattern.rows as usize)
            {
                return Err(InvariantViolation::RowCount { pattern: index, channel });
            }
            for cell in pattern.cells() {
                if cell.instrument as usize > self.instruments.len() {
                    return Err(InvariantViolation::DanglingInstrument {
                        pattern: index,
                        instrument: cell.instrument,
                    });
                }
            }
        }

        for (index, inst) in self.instruments.iter().enumerate() {
            if inst.id as usize != index + 1 {
                return Err(InvariantViolation::InstrumentId { index, id: inst.id });
            }
            if let InstrumentKind::Sample(sample) = &inst.kind {
                if sample.has_loop() && sample.loop_end as usize > sample.len() {
                    return Err(InvariantViolation::LoopBounds { instrument: inst.id });
                }
                if sample.volume > 64 {
                    return Err(InvariantViolation::Volume { instrument: inst.id });
                }
            }
        }
        Ok(())
    }
}

/// Copy `src` into a fixed-capacity string, cutting at the capacity.
pub fn push_truncated<const N: usize>(dst: &mut ArrayString<N>, src: &str) {
    for ch in src.chars() {
        if dst.try_push(ch).is_err() {
            break;
        }
    }
}

/// Per-channel settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Channel name
    pub name: ArrayString<32>,
    /// Initial panning (-64 to +64, 0 = center)
    pub initial_pan: i8,
    /// Initial volume (0-64)
    pub initial_vol: u8,
    /// Is the channel muted?
    pub muted: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            initial_pan: 0,
            initial_vol: 64,
            muted: false,
        }
    }
}

impl ChannelSettings {
    /// Settings with a pan position and full volume.
    pub fn panned(pan: i8) -> Self {
        Self {
            initial_pan: pan.clamp(-64, 64),
            ..Self::default()
        }
    }

    /// Classic Amiga panning: L R R L.
    pub fn amiga(index: usize) -> Self {
        Self::panned(if index % 4 == 0 || index % 4 == 3 { -64 } else { 64 })
    }
}

/// Where a pattern came from. Diagnostics only, never used for playback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Provenance {
    /// Source format tag
    pub format: &'static str,
    /// Source filename
    pub filename: String,
    /// Channel count declared by the file
    pub original_channels: usize,
    /// Pattern count declared by the file
    pub original_patterns: usize,
    /// Instrument/sample count declared by the file
    pub original_instruments: usize,
}

/// A broken invariant of the canonical model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    RestartOutOfRange { restart: u16, length: usize },
    DanglingOrder { position: usize, pattern: u16 },
    ChannelCount { pattern: usize, found: usize, expected: usize },
    EmptyPattern { pattern: usize },
    RowCount { pattern: usize, channel: usize },
    DanglingInstrument { pattern: usize, instrument: u8 },
    InstrumentId { index: usize, id: u8 },
    LoopBounds { instrument: u8 },
    Volume { instrument: u8 },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RestartOutOfRange { restart, length } => {
                write!(f, "restart position {} outside song of length {}", restart, length)
            }
            Self::DanglingOrder { position, pattern } => {
                write!(f, "order {} references missing pattern {}", position, pattern)
            }
            Self::ChannelCount { pattern, found, expected } => {
                write!(f, "pattern {} has {} channels, expected {}", pattern, found, expected)
            }
            Self::EmptyPattern { pattern } => write!(f, "pattern {} has no rows", pattern),
            Self::RowCount { pattern, channel } => {
                write!(f, "pattern {} channel {} has the wrong row count", pattern, channel)
            }
            Self::DanglingInstrument { pattern, instrument } => {
                write!(f, "pattern {} references missing instrument {}", pattern, instrument)
            }
            Self::InstrumentId { index, id } => {
                write!(f, "instrument at index {} has id {}", index, id)
            }
            Self::LoopBounds { instrument } => {
                write!(f, "instrument {} loop exceeds sample length", instrument)
            }
            Self::Volume { instrument } => write!(f, "instrument {} volume above 64", instrument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::PlaceholderReason;
    use crate::pattern::Note;
    use crate::sample::{Sample, SampleData};

    fn make_test_song() -> Song {
        let mut song = Song::new("test");
        song.channels = (0..4).map(ChannelSettings::amiga).collect();

        let mut pat0 = Pattern::new(4, 4);
        pat0.cell_mut(0, 0).note = Note::On(48);
        pat0.cell_mut(0, 0).instrument = 1;
        pat0.cell_mut(3, 1).note = Note::Off;

        song.patterns = alloc::vec![pat0, Pattern::new(8, 4)];
        song.order = alloc::vec![0, 1, 0];
        song.instruments = alloc::vec![Instrument::placeholder(1, "one", PlaceholderReason::Synth)];
        song
    }

    #[test]
    fn well_formed_song_validates() {
        assert_eq!(make_test_song().validate(), Ok(()));
    }

    #[test]
    fn empty_song_validates() {
        assert_eq!(Song::new("empty").validate(), Ok(()));
    }

    #[test]
    fn restart_must_be_inside_order() {
        let mut song = make_test_song();
        song.restart_position = 3;
        assert!(matches!(
            song.validate(),
            Err(InvariantViolation::RestartOutOfRange { restart: 3, length: 3 })
        ));
    }

    #[test]
    fn dangling_order_is_reported() {
        let mut song = make_test_song();
        song.order.push(7);
        assert_eq!(
            song.validate(),
            Err(InvariantViolation::DanglingOrder { position: 3, pattern: 7 })
        );
    }

    #[test]
    fn ragged_channel_is_reported() {
        let mut song = make_test_song();
        song.patterns[1].channels[2].cells.pop();
        assert_eq!(
            song.validate(),
            Err(InvariantViolation::RowCount { pattern: 1, channel: 2 })
        );
    }

    #[test]
    fn dangling_instrument_is_reported() {
        let mut song = make_test_song();
        song.patterns[0].cell_mut(1, 1).instrument = 2;
        assert!(matches!(
            song.validate(),
            Err(InvariantViolation::DanglingInstrument { pattern: 0, instrument: 2 })
        ));
    }

    #[test]
    fn loop_past_end_is_reported() {
        let mut song = make_test_song();
        let mut sample = Sample::new(SampleData::Pcm8(alloc::vec![0; 8]), 8363);
        sample.loop_type = crate::sample::LoopType::Forward;
        sample.loop_start = 2;
        sample.loop_end = 20;
        song.instruments.push(Instrument::new(2, "two", InstrumentKind::Sample(sample)));
        assert_eq!(song.validate(), Err(InvariantViolation::LoopBounds { instrument: 2 }));
    }

    #[test]
    fn instrument_lookup_by_id() {
        let song = make_test_song();
        assert_eq!(song.instrument(1).map(|i| i.name.as_str()), Some("one"));
        assert!(song.instrument(0).is_none());
        assert!(song.instrument(2).is_none());
    }

    #[test]
    fn amiga_panning_pattern() {
        let pans: Vec<i8> = (0..4).map(|i| ChannelSettings::amiga(i).initial_pan).collect();
        assert_eq!(pans, alloc::vec![-64, 64, 64, -64]);
    }
}
