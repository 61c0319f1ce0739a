//! Shared effect translation.
//!
//! Format modules own their command tables; the pieces several of them
//! share live here: the ProTracker command set, the Scream Tracker letter
//! commands (S3M, IT and PTM-era derivatives), parameter quirks and the
//! routing of "set volume" commands into the volume column.

use ml_ir::{Cell, Effect, EffectKind, VolumeCommand};

/// A translated command before it is placed in a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    None,
    Effect(Effect),
    /// Set volume, routed to the volume column when possible
    Volume(u8),
}

impl From<Effect> for Command {
    fn from(effect: Effect) -> Self {
        if effect.is_none() {
            Command::None
        } else {
            Command::Effect(effect)
        }
    }
}

/// Place translated commands into a cell.
///
/// A set-volume command goes to the volume column. When two commands
/// qualify, the first wins and the second is dropped. If the volume column
/// was already filled by the source, the command keeps an effect slot.
pub fn place(cell: &mut Cell, commands: [Command; 2]) {
    let mut routed = false;
    for command in commands {
        match command {
            Command::None => {}
            Command::Effect(effect) => {
                cell.push_effect(effect);
            }
            Command::Volume(v) if !routed && cell.volume == VolumeCommand::None => {
                cell.volume = VolumeCommand::set(v);
                routed = true;
            }
            Command::Volume(_) if routed => {}
            Command::Volume(v) => {
                cell.push_effect(Effect::new(EffectKind::SetVolume, v.min(64)));
            }
        }
    }
}

/// Decode a binary-coded decimal parameter: `0x23` is 23.
pub fn bcd(param: u8) -> u8 {
    (param >> 4) * 10 + (param & 0x0F)
}

/// Resolve a two-direction slide parameter to a single direction.
///
/// When both nibbles are set the downward (low) nibble wins.
pub fn slide_nibbles(param: u8) -> u8 {
    if param & 0x0F != 0 {
        param & 0x0F
    } else {
        param & 0xF0
    }
}

/// Translate a ProTracker command (`0`-`F`).
pub fn protracker(cmd: u8, param: u8) -> Effect {
    match cmd {
        0x0..=0xC => match EffectKind::from_code(cmd) {
            Some(EffectKind::SetVolume) => Effect::new(EffectKind::SetVolume, param.min(64)),
            Some(kind) => Effect::new(kind, param),
            None => Effect::NONE,
        },
        0xD => Effect::new(EffectKind::PatternBreak, bcd(param)),
        0xE => protracker_extended(param),
        0xF if param == 0 => Effect::NONE,
        0xF => Effect::new(EffectKind::SpeedTempo, param),
        _ => Effect::NONE,
    }
}

/// Translate a ProTracker extended (`Exy`) command.
///
/// The Amiga filter switch (`E0`) and invert loop (`EF`) have no canonical
/// equivalent.
pub fn protracker_extended(param: u8) -> Effect {
    match param >> 4 {
        0x0 | 0xF => Effect::NONE,
        sub => Effect::extended(sub, param & 0x0F),
    }
}

/// Which Scream Tracker descendant a letter command comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    S3m,
    It,
}

/// Translate a Scream Tracker letter command (`A` = 1).
pub fn scream_tracker(cmd: u8, param: u8, flavor: Flavor) -> Effect {
    use EffectKind::*;
    match cmd {
        // A: speed
        1 if param == 0 => Effect::NONE,
        1 => Effect::new(SpeedTempo, param.min(31)),
        2 => Effect::new(PositionJump, param),
        3 => match flavor {
            Flavor::S3m => Effect::new(PatternBreak, bcd(param)),
            Flavor::It => Effect::new(PatternBreak, param),
        },
        4 => volume_slide(param),
        5 => porta(param, PortaDown, 0x2),
        6 => porta(param, PortaUp, 0x1),
        7 => Effect::new(TonePorta, param),
        8 => Effect::new(Vibrato, param),
        9 => Effect::new(Tremor, param),
        10 => Effect::new(Arpeggio, param),
        11 => Effect::new(VibratoVolSlide, slide_nibbles(param)),
        12 => Effect::new(TonePortaVolSlide, slide_nibbles(param)),
        15 => Effect::new(SampleOffset, param),
        16 if flavor == Flavor::It => Effect::new(PanningSlide, slide_nibbles(param.rotate_left(4))),
        17 => Effect::new(MultiRetrigger, param),
        18 => Effect::new(Tremolo, param),
        19 => special(param),
        // T: tempo; T0x/T1x are tempo slides
        20 if param >= 0x20 => Effect::new(SpeedTempo, param),
        22 => match flavor {
            Flavor::S3m => Effect::new(SetGlobalVolume, param.min(64)),
            Flavor::It => Effect::new(SetGlobalVolume, param.min(128) / 2),
        },
        23 if flavor == Flavor::It => Effect::new(GlobalVolumeSlide, slide_nibbles(param)),
        24 => match flavor {
            Flavor::S3m if param <= 0x80 => Effect::new(SetPan, param.saturating_mul(2)),
            Flavor::S3m => Effect::NONE,
            Flavor::It => Effect::new(SetPan, param),
        },
        _ => Effect::NONE,
    }
}

/// Scream Tracker `Dxy`: `DxF` fine up, `DFy` fine down, otherwise a
/// regular slide with the downward nibble taking priority.
pub fn volume_slide(param: u8) -> Effect {
    let (hi, lo) = (param >> 4, param & 0x0F);
    match (hi, lo) {
        (0, 0) => Effect::NONE,
        (h, 0xF) if h != 0 => Effect::extended(0xA, h),
        (0xF, l) if l != 0 => Effect::extended(0xB, l),
        _ => Effect::new(EffectKind::VolumeSlide, slide_nibbles(param)),
    }
}

/// Scream Tracker `E`/`F` portamento: `xFy` is fine, `xEy` extra fine.
fn porta(param: u8, kind: EffectKind, direction: u8) -> Effect {
    match param >> 4 {
        0xF => Effect::extended(direction, param & 0x0F),
        0xE => Effect::new(EffectKind::ExtraFinePorta, (direction << 4) | (param & 0x0F)),
        _ => Effect::new(kind, param),
    }
}

/// Scream Tracker `Sxy` special commands.
fn special(param: u8) -> Effect {
    let value = param & 0x0F;
    match param >> 4 {
        0x1 => Effect::extended(0x3, value),
        0x2 => Effect::extended(0x5, value),
        0x3 => Effect::extended(0x4, value),
        0x4 => Effect::extended(0x7, value),
        0x8 => Effect::extended(0x8, value),
        0xB => Effect::extended(0x6, value),
        0xC => Effect::extended(0xC, value),
        0xD => Effect::extended(0xD, value),
        0xE => Effect::extended(0xE, value),
        _ => Effect::NONE,
    }
}
