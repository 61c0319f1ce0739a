//! Effect command types for canonical pattern cells.
//!
//! Effect types follow the FastTracker 2 command numbering so that the
//! `(type, parameter)` pair of a canonical effect is a plain pair of bytes.

/// Volume column command.
///
/// The canonical volume column only carries "set volume". Other volume
/// column commands of the source formats are routed to an effect slot
/// during translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VolumeCommand {
    #[default]
    None,
    /// Set volume (0-64)
    Volume(u8),
}

impl VolumeCommand {
    /// Build a set-volume command, clamping to 0-64.
    pub fn set(volume: u8) -> Self {
        VolumeCommand::Volume(volume.min(64))
    }

    /// Wire value: 0 = none, `0x10 + v` = set volume `v`.
    pub fn raw(self) -> u8 {
        match self {
            VolumeCommand::None => 0,
            VolumeCommand::Volume(v) => 0x10 + v.min(64),
        }
    }

    /// Parse a wire value. Anything outside the set-volume range is `None`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x10..=0x50 => VolumeCommand::Volume(raw - 0x10),
            _ => VolumeCommand::None,
        }
    }

    /// Returns the volume if this is a set-volume command.
    pub fn volume(self) -> Option<u8> {
        match self {
            VolumeCommand::None => None,
            VolumeCommand::Volume(v) => Some(v),
        }
    }
}

/// Canonical effect type.
///
/// Discriminants are the FastTracker 2 command codes (`0`-`F` for the
/// ProTracker set, then `G` = 16 onward).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EffectKind {
    /// Arpeggio: with a zero parameter this is "no effect"
    #[default]
    Arpeggio = 0x00,
    PortaUp = 0x01,
    PortaDown = 0x02,
    TonePorta = 0x03,
    Vibrato = 0x04,
    TonePortaVolSlide = 0x05,
    VibratoVolSlide = 0x06,
    Tremolo = 0x07,
    /// Set panning (0-255, 128 = center)
    SetPan = 0x08,
    /// Sample offset in 256-frame units
    SampleOffset = 0x09,
    /// Volume slide: high nibble up, low nibble down
    VolumeSlide = 0x0A,
    PositionJump = 0x0B,
    /// Set volume (0-64)
    SetVolume = 0x0C,
    /// Pattern break: parameter is the decimal target row
    PatternBreak = 0x0D,
    /// Extended command: high nibble selects the sub-command
    Extended = 0x0E,
    /// Speed when the parameter is below 32, tempo otherwise
    SpeedTempo = 0x0F,
    /// Set global volume (0-64)
    SetGlobalVolume = 0x10,
    GlobalVolumeSlide = 0x11,
    /// Key off after n ticks
    KeyOff = 0x14,
    SetEnvelopePosition = 0x15,
    PanningSlide = 0x19,
    MultiRetrigger = 0x1B,
    Tremor = 0x1D,
    /// Extra fine porta: `1x` up, `2x` down
    ExtraFinePorta = 0x21,
}

impl EffectKind {
    /// Map a canonical effect code back to its type.
    pub fn from_code(code: u8) -> Option<Self> {
        use EffectKind::*;
        Some(match code {
            0x00 => Arpeggio,
            0x01 => PortaUp,
            0x02 => PortaDown,
            0x03 => TonePorta,
            0x04 => Vibrato,
            0x05 => TonePortaVolSlide,
            0x06 => VibratoVolSlide,
            0x07 => Tremolo,
            0x08 => SetPan,
            0x09 => SampleOffset,
            0x0A => VolumeSlide,
            0x0B => PositionJump,
            0x0C => SetVolume,
            0x0D => PatternBreak,
            0x0E => Extended,
            0x0F => SpeedTempo,
            0x10 => SetGlobalVolume,
            0x11 => GlobalVolumeSlide,
            0x14 => KeyOff,
            0x15 => SetEnvelopePosition,
            0x19 => PanningSlide,
            0x1B => MultiRetrigger,
            0x1D => Tremor,
            0x21 => ExtraFinePorta,
            _ => return None,
        })
    }

    /// The canonical effect code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns the tracker letter used to display this effect.
    pub fn symbol(self) -> char {
        let code = self.code();
        match code {
            0..=9 => (b'0' + code) as char,
            _ => (b'A' + code - 10) as char,
        }
    }
}

/// One canonical effect slot: an `(effect-type, parameter)` pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Effect {
    pub kind: EffectKind,
    pub param: u8,
}

impl Effect {
    /// The empty effect, `(0, 0)`.
    pub const NONE: Effect = Effect { kind: EffectKind::Arpeggio, param: 0 };

    pub const fn new(kind: EffectKind, param: u8) -> Self {
        Self { kind, param }
    }

    /// Build an extended (`E`) effect from a sub-command and value nibble.
    pub const fn extended(sub: u8, value: u8) -> Self {
        Self {
            kind: EffectKind::Extended,
            param: ((sub & 0x0F) << 4) | (value & 0x0F),
        }
    }

    /// Returns true for the `(0, 0)` pair.
    pub fn is_none(&self) -> bool {
        self.kind == EffectKind::Arpeggio && self.param == 0
    }

    /// The `(type, parameter)` pair as raw bytes.
    pub fn raw(&self) -> (u8, u8) {
        (self.kind.code(), self.param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_zero_pair() {
        assert!(Effect::NONE.is_none());
        assert_eq!(Effect::NONE.raw(), (0, 0));
        assert!(!Effect::new(EffectKind::Arpeggio, 0x37).is_none());
    }

    #[test]
    fn codes_round_trip_through_from_code() {
        for code in 0u8..=0x23 {
            if let Some(kind) = EffectKind::from_code(code) {
                assert_eq!(kind.code(), code);
            }
        }
        assert_eq!(EffectKind::from_code(0x12), None);
    }

    #[test]
    fn symbols_match_tracker_letters() {
        assert_eq!(EffectKind::VolumeSlide.symbol(), 'A');
        assert_eq!(EffectKind::SpeedTempo.symbol(), 'F');
        assert_eq!(EffectKind::SetGlobalVolume.symbol(), 'G');
        assert_eq!(EffectKind::ExtraFinePorta.symbol(), 'X');
        assert_eq!(EffectKind::Vibrato.symbol(), '4');
    }

    #[test]
    fn volume_column_wire_values() {
        assert_eq!(VolumeCommand::set(80), VolumeCommand::Volume(64));
        assert_eq!(VolumeCommand::Volume(0).raw(), 0x10);
        assert_eq!(VolumeCommand::from_raw(0x50), VolumeCommand::Volume(64));
        assert_eq!(VolumeCommand::from_raw(0x51), VolumeCommand::None);
        assert_eq!(VolumeCommand::None.raw(), 0);
    }
}
