//! Pattern, channel and cell types.

use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::effects::{Effect, VolumeCommand};
use crate::song::ChannelSettings;
use crate::{NOTE_MAX, NOTE_OFF};

/// A note value in a pattern cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Note {
    /// No note
    #[default]
    None,
    /// Note on with canonical note number (1-96, where 49 = C-4)
    On(u8),
    /// Note off / key release
    Off,
}

impl Note {
    /// Build a note from a computed canonical number.
    ///
    /// Anything outside 1-96 is dropped to `Note::None`.
    pub fn from_canonical(value: i32) -> Self {
        if (1..=NOTE_MAX as i32).contains(&value) {
            Note::On(value as u8)
        } else {
            Note::None
        }
    }

    /// Create a note from octave (0-7) and semitone (0-11).
    pub fn from_octave_semitone(octave: u8, semitone: u8) -> Self {
        if semitone > 11 {
            return Note::None;
        }
        Self::from_canonical(octave as i32 * 12 + semitone as i32 + 1)
    }

    /// Parse the wire value: 0 = empty, 1-96 = pitch, 97 = off.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1..=NOTE_MAX => Note::On(raw),
            NOTE_OFF => Note::Off,
            _ => Note::None,
        }
    }

    /// The wire value of this note.
    pub fn raw(self) -> u8 {
        match self {
            Note::None => 0,
            Note::On(n) => n,
            Note::Off => NOTE_OFF,
        }
    }

    /// Get the octave (0-7) if this is a note on.
    pub const fn octave(self) -> Option<u8> {
        match self {
            Note::On(n) => Some(n.saturating_sub(1) / 12),
            _ => None,
        }
    }

    /// Get the semitone (0-11) if this is a note on.
    pub const fn semitone(self) -> Option<u8> {
        match self {
            Note::On(n) => Some(n.saturating_sub(1) % 12),
            _ => None,
        }
    }

    /// Shift a note by a number of semitones. Off and empty notes are kept.
    pub fn transpose(self, semitones: i32) -> Self {
        match self {
            Note::On(n) => Self::from_canonical(n as i32 + semitones),
            other => other,
        }
    }
}

/// A single cell in a pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    /// Note value
    pub note: Note,
    /// Instrument number (0 = none, 1-255 = instrument id)
    pub instrument: u8,
    /// Volume column command
    pub volume: VolumeCommand,
    /// Effect slots
    pub effects: [Effect; 2],
}

impl Cell {
    /// Create an empty cell.
    pub const fn empty() -> Self {
        Self {
            note: Note::None,
            instrument: 0,
            volume: VolumeCommand::None,
            effects: [Effect::NONE; 2],
        }
    }

    /// Returns true if the cell is completely empty.
    pub fn is_empty(&self) -> bool {
        self.note == Note::None
            && self.instrument == 0
            && self.volume == VolumeCommand::None
            && self.effects.iter().all(Effect::is_none)
    }

    /// Put an effect into the first free slot.
    ///
    /// Returns false (and drops the effect) when both slots are taken.
    pub fn push_effect(&mut self, effect: Effect) -> bool {
        if effect.is_none() {
            return true;
        }
        match self.effects.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = effect;
                true
            }
            None => false,
        }
    }
}

/// One column of a pattern: a voice's cells plus its display state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    /// Channel name
    pub name: ArrayString<32>,
    pub muted: bool,
    pub solo: bool,
    pub collapsed: bool,
    /// Default volume (0-64)
    pub volume: u8,
    /// Default panning (-64 to +64, 0 = center)
    pub pan: i8,
    /// One cell per row
    pub cells: Vec<Cell>,
}

impl Channel {
    /// Create a channel with `rows` empty cells.
    pub fn new(rows: u16) -> Self {
        Self {
            name: ArrayString::new(),
            muted: false,
            solo: false,
            collapsed: false,
            volume: 64,
            pan: 0,
            cells: alloc::vec![Cell::empty(); rows as usize],
        }
    }

    /// Copy name, volume, pan and mute state from channel settings.
    pub fn apply_settings(&mut self, settings: &ChannelSettings) {
        self.name = settings.name;
        self.volume = settings.initial_vol;
        self.pan = settings.initial_pan;
        self.muted = settings.muted;
    }
}

/// A pattern: a grid of cells, one [`Channel`] per voice.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    /// Index of this pattern in the song
    pub id: u16,
    /// Display name
    pub name: ArrayString<32>,
    /// Number of rows (1-256)
    pub rows: u16,
    /// Channels, each holding exactly `rows` cells
    pub channels: Vec<Channel>,
    /// Where this pattern came from (diagnostics only)
    pub provenance: Option<crate::song::Provenance>,
}

impl Pattern {
    /// Create a new pattern with empty cells.
    pub fn new(rows: u16, channels: u8) -> Self {
        Self {
            id: 0,
            name: ArrayString::new(),
            rows,
            channels: (0..channels).map(|_| Channel::new(rows)).collect(),
            provenance: None,
        }
    }

    /// Number of channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Get a reference to a cell.
    pub fn cell(&self, row: u16, channel: u8) -> &Cell {
        debug_assert!(row < self.rows);
        &self.channels[channel as usize].cells[row as usize]
    }

    /// Get a mutable reference to a cell.
    pub fn cell_mut(&mut self, row: u16, channel: u8) -> &mut Cell {
        debug_assert!(row < self.rows);
        &mut self.channels[channel as usize].cells[row as usize]
    }

    /// Get a cell if both coordinates are in range.
    pub fn get(&self, row: u16, channel: u8) -> Option<&Cell> {
        self.channels.get(channel as usize)?.cells.get(row as usize)
    }

    /// Get a mutable cell if both coordinates are in range.
    pub fn get_mut(&mut self, row: u16, channel: u8) -> Option<&mut Cell> {
        self.channels
            .get_mut(channel as usize)?
            .cells
            .get_mut(row as usize)
    }

    /// Iterate over the cells of one row, in channel order.
    pub fn row(&self, row: u16) -> impl Iterator<Item = &Cell> + '_ {
        self.channels.iter().map(move |ch| &ch.cells[row as usize])
    }

    /// Iterate over every cell of the pattern.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.channels.iter().flat_map(|ch| ch.cells.iter())
    }

    /// Resize to `rows` rows and `channels` channels, padding with empty
    /// cells and dropping anything beyond the new bounds.
    pub fn resize(&mut self, rows: u16, channels: u8) {
        self.rows = rows;
        self.channels.resize_with(channels as usize, || Channel::new(rows));
        for channel in &mut self.channels {
            channel.cells.resize(rows as usize, Cell::empty());
        }
    }
}
