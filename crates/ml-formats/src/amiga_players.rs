//! Detectors for Amiga formats that only an emulator can play.
//!
//! These files carry their own replay code or synthesize every voice from
//! a program; there is no pattern/sample structure to decode.

use crate::reader::{has_magic, u32_be, u8_at};

/// AmigaDOS executable hunk header.
const HUNK_HEADER: u32 = 0x0000_03F3;
/// "J.FL" tag inside the player hunk.
const JMF_TAG: u32 = 0x4A2E_464C;

/// Future Composer 1.3 ("SMOD") or 1.4 ("FC14").
pub fn detect_future_composer(data: &[u8], _filename: Option<&str>) -> bool {
    data.len() >= 4 && (has_magic(data, 0, b"SMOD") || has_magic(data, 0, b"FC14"))
}

/// HivelyTracker: "HVL" and a version byte.
pub fn detect_hively(data: &[u8], _filename: Option<&str>) -> bool {
    data.len() >= 14 && has_magic(data, 0, b"HVL") && matches!(u8_at(data, 3), Some(0 | 1))
}

/// Janko Mrsic-Flogel player: an executable hunk file whose code hunk
/// carries the "J.FL" tag and three non-null entry points.
pub fn detect_janko_mrsic_flogel(data: &[u8], _filename: Option<&str>) -> bool {
    if data.len() < 60 || u32_be(data, 0) != Some(HUNK_HEADER) {
        return false;
    }
    if u8_at(data, 20) == Some(0) || u32_be(data, 36) != Some(JMF_TAG) {
        return false;
    }
    [48, 52, 56].iter().all(|&offset| u32_be(data, offset).is_some_and(|v| v != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jmf_buffer() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(&HUNK_HEADER.to_be_bytes());
        data[20] = 1;
        data[36..40].copy_from_slice(&JMF_TAG.to_be_bytes());
        for offset in [48, 52, 56] {
            data[offset..offset + 4].copy_from_slice(&0x100u32.to_be_bytes());
        }
        data
    }

    #[test]
    fn jmf_needs_every_entry_point() {
        let data = jmf_buffer();
        assert!(detect_janko_mrsic_flogel(&data, None));
        for offset in [20, 36, 48, 52, 56] {
            let mut broken = data.clone();
            broken[offset..offset + 4].fill(0);
            assert!(!detect_janko_mrsic_flogel(&broken, None), "offset {offset}");
        }
    }

    #[test]
    fn future_composer_tags() {
        assert!(detect_future_composer(b"SMOD\0\0\0\0", None));
        assert!(detect_future_composer(b"FC14\0\0\0\0", None));
        assert!(!detect_future_composer(b"FC13\0\0\0\0", None));
    }

    #[test]
    fn hively_versions() {
        let mut data = vec![0u8; 32];
        data[..3].copy_from_slice(b"HVL");
        assert!(detect_hively(&data, None));
        data[3] = 2;
        assert!(!detect_hively(&data, None));
    }

    #[test]
    fn zeros_are_rejected() {
        let data = [0u8; 256];
        assert!(!detect_future_composer(&data, None));
        assert!(!detect_hively(&data, None));
        assert!(!detect_janko_mrsic_flogel(&data, None));
    }
}
