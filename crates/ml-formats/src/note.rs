//! Note and period translation.
//!
//! Amiga formats store pitch as a Paula period. Those are looked up in a
//! fine-tune-indexed period table; everything else is plain arithmetic
//! with a per-format offset onto the canonical note scale.

use ml_ir::Note;

/// PAL Amiga clock in Hz.
pub const PAL_CLOCK: f64 = 7_093_789.2;

/// Period of canonical C-4 at fine-tune 0.
pub const REFERENCE_PERIOD: u16 = 428;

/// Canonical note of the first period-table entry (1712).
pub const PERIOD_NOTE_OFFSET: i32 = 25;

/// Five octaves of ProTracker periods at fine-tune 0, starting at 1712.
pub const AMIGA_PERIODS: [u16; 60] = [
    1712, 1616, 1525, 1440, 1357, 1281, 1209, 1141, 1077, 1017, 961, 907,
    856, 808, 762, 720, 678, 640, 604, 570, 538, 508, 480, 453,
    428, 404, 381, 360, 339, 320, 302, 285, 269, 254, 240, 226,
    214, 202, 190, 180, 170, 160, 151, 143, 135, 127, 120, 113,
    107, 101, 95, 90, 85, 80, 76, 71, 67, 64, 60, 57,
];

/// Fine-tune-indexed period table.
///
/// Row `ft & 15` holds the periods for fine-tune `ft` (-8..=7). Built once
/// per decode and shared by reference.
pub struct PeriodTable {
    rows: [[u16; 60]; 16],
}

impl PeriodTable {
    pub fn amiga() -> Self {
        let mut rows = [[0u16; 60]; 16];
        for (index, row) in rows.iter_mut().enumerate() {
            let finetune = ((index as i8) << 4) >> 4;
            let scale = libm::pow(2.0, -(finetune as f64) / 96.0);
            for (dst, &base) in row.iter_mut().zip(AMIGA_PERIODS.iter()) {
                *dst = libm::round(base as f64 * scale) as u16;
            }
        }
        Self { rows }
    }

    /// The periods for a fine-tune value (-8..=7).
    pub fn row(&self, finetune: i8) -> &[u16; 60] {
        &self.rows[(finetune as u8 & 0x0F) as usize]
    }

    /// Index of the table entry nearest to `period`, or None when the
    /// period is zero or outside the table range.
    pub fn index_of(&self, period: u16, finetune: i8) -> Option<usize> {
        let row = self.row(finetune);
        let (hi, lo) = (row[0], row[59]);
        // A quarter tone of slack at both ends.
        if period == 0 || period as u32 * 100 > hi as u32 * 103 || period as u32 * 103 < lo as u32 * 100 {
            return None;
        }
        row.iter()
            .enumerate()
            .min_by_key(|(_, p)| (**p as i32 - period as i32).unsigned_abs())
            .map(|(i, _)| i)
    }

    /// Translate a period to a canonical note.
    pub fn note(&self, period: u16, finetune: i8) -> Note {
        match self.index_of(period, finetune) {
            Some(index) => Note::from_canonical(index as i32 + PERIOD_NOTE_OFFSET),
            None => Note::None,
        }
    }
}

/// `index + offset`, with zero meaning "no note".
pub fn offset_note(raw: u8, offset: i32) -> Note {
    if raw == 0 {
        Note::None
    } else {
        Note::from_canonical(raw as i32 + offset)
    }
}

/// `octave * 12 + semitone + offset` from a packed octave/semitone byte
/// (high nibble octave, low nibble semitone).
pub fn octave_note(packed: u8, offset: i32) -> Note {
    let (octave, semitone) = (packed >> 4, packed & 0x0F);
    if semitone > 11 {
        return Note::None;
    }
    Note::from_canonical(octave as i32 * 12 + semitone as i32 + offset)
}

/// Sign-extend a 4-bit fine-tune nibble to -8..=7.
pub fn finetune_nibble(raw: u8) -> i8 {
    ((raw << 4) as i8) >> 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finetune_zero_row_is_the_base_table() {
        let table = PeriodTable::amiga();
        assert_eq!(table.row(0), &AMIGA_PERIODS);
    }

    #[test]
    fn reference_period_is_c4() {
        let table = PeriodTable::amiga();
        assert_eq!(table.note(REFERENCE_PERIOD, 0), Note::On(49));
        assert_eq!(table.note(1712, 0), Note::On(25));
        assert_eq!(table.note(57, 0), Note::On(84));
    }

    #[test]
    fn finetuned_rows_match_protracker() {
        let table = PeriodTable::amiga();
        // ProTracker fine-tune +7 and -8 rows at C-1
        assert_eq!(table.row(7)[12], 814);
        assert_eq!(table.row(-8)[12], 907);
        assert_eq!(table.note(814, 7), Note::On(37));
    }

    #[test]
    fn near_miss_snaps_to_nearest() {
        let table = PeriodTable::amiga();
        assert_eq!(table.note(430, 0), Note::On(49));
        assert_eq!(table.note(0, 0), Note::None);
        assert_eq!(table.note(4000, 0), Note::None);
        assert_eq!(table.note(20, 0), Note::None);
    }

    #[test]
    fn arithmetic_offsets() {
        assert_eq!(octave_note(0x40, 1), Note::On(49));
        assert_eq!(octave_note(0x4C, 1), Note::None);
        assert_eq!(offset_note(60, -11), Note::On(49));
        assert_eq!(offset_note(0, 24), Note::None);
        assert_eq!(offset_note(5, -11), Note::None);
    }

    #[test]
    fn finetune_nibbles_are_signed() {
        assert_eq!(finetune_nibble(0x07), 7);
        assert_eq!(finetune_nibble(0x08), -8);
        assert_eq!(finetune_nibble(0x0F), -1);
    }
}
