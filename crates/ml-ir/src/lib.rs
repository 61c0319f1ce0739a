//! Canonical song model for modloom.
//!
//! Every format decoder emits this representation and the playback
//! engine consumes it. Nothing in here knows about any particular file
//! format: per-format quirks are resolved before a [`Song`] is built.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod effects;
mod instrument;
mod pattern;
mod sample;
pub mod song;

pub use effects::{Effect, EffectKind, VolumeCommand};
pub use instrument::{Instrument, InstrumentKind, PlaceholderReason};
pub use pattern::{Cell, Channel, Note, Pattern};
pub use sample::{LoopType, Sample, SampleData};
pub use song::{push_truncated, ChannelSettings, InvariantViolation, Provenance, Song};

/// Maximum number of channels in a song.
pub const MAX_CHANNELS: usize = 64;
/// Maximum number of rows in a pattern.
pub const MAX_ROWS: u16 = 256;
/// Maximum number of patterns in a song.
pub const MAX_PATTERNS: usize = 1024;
/// Maximum length of the order list.
pub const MAX_ORDERS: usize = 1024;
/// Maximum number of instruments in a song.
pub const MAX_INSTRUMENTS: usize = 255;

/// Canonical C-4: a sample plays at its stored rate on this note.
pub const REFERENCE_NOTE: u8 = 49;
/// Highest playable canonical note (B-7).
pub const NOTE_MAX: u8 = 96;
/// Raw canonical value of a key-off.
pub const NOTE_OFF: u8 = 97;
