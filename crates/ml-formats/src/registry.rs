//! The static format registry.
//!
//! One entry per supported format, in detection priority order. Formats
//! with a strong magic come first; the magic-less SoundTracker detector,
//! which samples pattern content, runs after every native format so that
//! it never claims a buffer something stricter would have accepted.

use ml_ir::Song;

use crate::{
    ahx_format, amiga_players, dbm_format, f669_format, far_format, it_format, med_format,
    mod_format, mtm_format, okt_format, ptm_format, s3m_format, stk_format, stm_format,
    ult_format, xm_format, FormatError,
};

/// Identifies a registered format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatTag {
    Xm,
    It,
    S3m,
    Ptm,
    Mtm,
    Ult,
    Far,
    Stm,
    Composer669,
    Okt,
    Dbm,
    Med,
    Ahx,
    ProTracker,
    SoundTracker,
    FutureComposer,
    Hively,
    JankoMrsicFlogel,
}

impl FormatTag {
    /// Short tag stored in [`Song::format`].
    pub const fn short(self) -> &'static str {
        match self {
            FormatTag::Xm => "XM",
            FormatTag::It => "IT",
            FormatTag::S3m => "S3M",
            FormatTag::Ptm => "PTM",
            FormatTag::Mtm => "MTM",
            FormatTag::Ult => "ULT",
            FormatTag::Far => "FAR",
            FormatTag::Stm => "STM",
            FormatTag::Composer669 => "669",
            FormatTag::Okt => "OKT",
            FormatTag::Dbm => "DBM",
            FormatTag::Med => "MED",
            FormatTag::Ahx => "AHX",
            FormatTag::ProTracker => "MOD",
            FormatTag::SoundTracker => "STK",
            FormatTag::FutureComposer => "FC",
            FormatTag::Hively => "HVL",
            FormatTag::JankoMrsicFlogel => "JMF",
        }
    }
}

/// Per-call decoding parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeContext<'a> {
    pub filename: &'a str,
    /// Requested sub-song; out-of-range values fall back to 0
    pub subsong: usize,
}

impl<'a> DecodeContext<'a> {
    pub fn new(filename: &'a str) -> Self {
        Self { filename, subsong: 0 }
    }
}

pub type DetectFn = fn(&[u8], Option<&str>) -> bool;
pub type DecodeFn = fn(&[u8], &DecodeContext) -> Result<Song, FormatError>;

/// How a detected format is turned into a song.
#[derive(Clone, Copy)]
pub enum Decoder {
    Native(DecodeFn),
    /// Only an emulator can play this format
    Emulated,
}

/// A registered format.
pub struct FormatEntry {
    pub tag: FormatTag,
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub detect: DetectFn,
    pub decoder: Decoder,
}

impl FormatEntry {
    pub fn is_native(&self) -> bool {
        matches!(self.decoder, Decoder::Native(_))
    }
}

/// Every supported format, in detection priority order.
pub static FORMATS: &[FormatEntry] = &[
    FormatEntry {
        tag: FormatTag::Xm,
        name: "FastTracker 2",
        extensions: &["xm"],
        detect: xm_format::detect,
        decoder: Decoder::Native(xm_format::load_xm),
    },
    FormatEntry {
        tag: FormatTag::It,
        name: "Impulse Tracker",
        extensions: &["it"],
        detect: it_format::detect,
        decoder: Decoder::Native(it_format::load_it),
    },
    FormatEntry {
        tag: FormatTag::S3m,
        name: "Scream Tracker 3",
        extensions: &["s3m"],
        detect: s3m_format::detect,
        decoder: Decoder::Native(s3m_format::load_s3m),
    },
    FormatEntry {
        tag: FormatTag::Ptm,
        name: "PolyTracker",
        extensions: &["ptm"],
        detect: ptm_format::detect,
        decoder: Decoder::Native(ptm_format::load_ptm),
    },
    FormatEntry {
        tag: FormatTag::Mtm,
        name: "MultiTracker",
        extensions: &["mtm"],
        detect: mtm_format::detect,
        decoder: Decoder::Native(mtm_format::load_mtm),
    },
    FormatEntry {
        tag: FormatTag::Ult,
        name: "UltraTracker",
        extensions: &["ult"],
        detect: ult_format::detect,
        decoder: Decoder::Native(ult_format::load_ult),
    },
    FormatEntry {
        tag: FormatTag::Far,
        name: "Farandole Composer",
        extensions: &["far"],
        detect: far_format::detect,
        decoder: Decoder::Native(far_format::load_far),
    },
    FormatEntry {
        tag: FormatTag::Stm,
        name: "Scream Tracker 2",
        extensions: &["stm"],
        detect: stm_format::detect,
        decoder: Decoder::Native(stm_format::load_stm),
    },
    FormatEntry {
        tag: FormatTag::Composer669,
        name: "Composer 669",
        extensions: &["669"],
        detect: f669_format::detect,
        decoder: Decoder::Native(f669_format::load_669),
    },
    FormatEntry {
        tag: FormatTag::Okt,
        name: "Oktalyzer",
        extensions: &["okt", "okta"],
        detect: okt_format::detect,
        decoder: Decoder::Native(okt_format::load_okt),
    },
    FormatEntry {
        tag: FormatTag::Dbm,
        name: "DigiBooster Pro",
        extensions: &["dbm"],
        detect: dbm_format::detect,
        decoder: Decoder::Native(dbm_format::load_dbm),
    },
    FormatEntry {
        tag: FormatTag::Med,
        name: "OctaMED",
        extensions: &["med", "mmd0", "mmd1"],
        detect: med_format::detect,
        decoder: Decoder::Native(med_format::load_med),
    },
    FormatEntry {
        tag: FormatTag::Ahx,
        name: "AHX",
        extensions: &["ahx", "thx"],
        detect: ahx_format::detect,
        decoder: Decoder::Native(ahx_format::load_ahx),
    },
    FormatEntry {
        tag: FormatTag::ProTracker,
        name: "ProTracker",
        extensions: &["mod"],
        detect: mod_format::detect,
        decoder: Decoder::Native(mod_format::load_mod),
    },
    FormatEntry {
        tag: FormatTag::FutureComposer,
        name: "Future Composer",
        extensions: &["fc", "fc13", "fc14", "smod"],
        detect: amiga_players::detect_future_composer,
        decoder: Decoder::Emulated,
    },
    FormatEntry {
        tag: FormatTag::Hively,
        name: "HivelyTracker",
        extensions: &["hvl"],
        detect: amiga_players::detect_hively,
        decoder: Decoder::Emulated,
    },
    FormatEntry {
        tag: FormatTag::JankoMrsicFlogel,
        name: "Janko Mrsic-Flogel",
        extensions: &["jmf"],
        detect: amiga_players::detect_janko_mrsic_flogel,
        decoder: Decoder::Emulated,
    },
    FormatEntry {
        tag: FormatTag::SoundTracker,
        name: "Ultimate SoundTracker",
        extensions: &["mod", "stk"],
        detect: stk_format::detect,
        decoder: Decoder::Native(stk_format::load_stk),
    },
];

/// Look up the registry entry of a format.
pub fn entry(tag: FormatTag) -> &'static FormatEntry {
    FORMATS
        .iter()
        .find(|e| e.tag == tag)
        .unwrap_or(&FORMATS[0])
}

/// Lower-case extension candidates of a filename.
///
/// The usual suffix (`song.mod`) comes first. An Amiga-style prefix
/// (`mod.song`) follows when it names a registered format.
pub fn extensions_of(filename: &str) -> Vec<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let mut out = Vec::new();
    if let Some((_, suffix)) = base.rsplit_once('.') {
        if !suffix.is_empty() {
            out.push(suffix.to_ascii_lowercase());
        }
    }
    if let Some((prefix, _)) = base.split_once('.') {
        let prefix = prefix.to_ascii_lowercase();
        if by_extension(&prefix).next().is_some() && !out.contains(&prefix) {
            out.push(prefix);
        }
    }
    out
}

/// Registered formats claiming an extension, in priority order.
pub fn by_extension(extension: &str) -> impl Iterator<Item = &'static FormatEntry> + '_ {
    FORMATS
        .iter()
        .filter(move |e| e.extensions.iter().any(|x| x.eq_ignore_ascii_case(extension)))
}

/// First registered format whose detector accepts the buffer.
pub fn detect(data: &[u8], filename: Option<&str>) -> Option<&'static FormatEntry> {
    FORMATS.iter().find(|e| (e.detect)(data, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_is_registered_once() {
        for (i, a) in FORMATS.iter().enumerate() {
            assert_eq!(entry(a.tag).tag, a.tag);
            assert!(FORMATS[i + 1..].iter().all(|b| b.tag != a.tag));
        }
        assert_eq!(FORMATS.len(), 18);
    }

    #[test]
    fn extension_candidates() {
        assert_eq!(extensions_of("music/Song.XM"), vec!["xm"]);
        assert_eq!(extensions_of("mod.intro"), vec!["intro", "mod"]);
        assert_eq!(extensions_of("C:\\tunes\\jmf.theme"), vec!["theme", "jmf"]);
        assert!(extensions_of("README").is_empty());
    }

    #[test]
    fn shared_extensions_keep_priority_order() {
        let tags: Vec<FormatTag> = by_extension("MOD").map(|e| e.tag).collect();
        assert_eq!(tags, vec![FormatTag::ProTracker, FormatTag::SoundTracker]);
    }

    #[test]
    fn all_zero_buffer_is_not_detected() {
        assert!(detect(&[0u8; 4096], None).is_none());
    }
}
