//! Format dispatch: the single entry point for importing a module.
//!
//! Candidates are tried as an ordered list of fallible strategies:
//! formats claiming the file's extension first, then every detector in
//! registry order, and finally the emulator collaborator.

use ml_ir::Song;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Attempt, EmulatorError, ImportError};
use crate::registry::{extensions_of, DecodeContext, Decoder, FormatEntry, FormatTag, FORMATS};

/// Which strategy to try first for an extension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    #[default]
    Native,
    Emulator,
}

/// A per-extension routing override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPreference {
    pub extension: String,
    pub prefer: Preference,
}

/// Dispatcher configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Hand files no native decoder could import to the emulator
    pub emulator_fallback: bool,
    pub preferences: Vec<ExtensionPreference>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { emulator_fallback: true, preferences: Vec::new() }
    }
}

impl ImportOptions {
    fn preference(&self, extension: &str) -> Preference {
        self.preferences
            .iter()
            .find(|p| p.extension.eq_ignore_ascii_case(extension))
            .map(|p| p.prefer)
            .unwrap_or_default()
    }
}

/// An external player able to render formats without a native decoder.
pub trait Emulator {
    fn name(&self) -> &str;

    /// Load a module. `hint` names the format when a detector matched.
    fn load(
        &self,
        data: &[u8],
        filename: &str,
        subsong: usize,
        hint: Option<FormatTag>,
    ) -> Result<Song, EmulatorError>;
}

/// Imports modules using the registry and an optional emulator.
pub struct Importer<'e> {
    options: ImportOptions,
    emulator: Option<&'e dyn Emulator>,
    formats: &'static [FormatEntry],
}

impl<'e> Importer<'e> {
    pub fn new(options: ImportOptions) -> Self {
        Self { options, emulator: None, formats: FORMATS }
    }

    pub fn with_emulator(mut self, emulator: &'e dyn Emulator) -> Self {
        self.emulator = Some(emulator);
        self
    }

    #[cfg(test)]
    fn with_formats(mut self, formats: &'static [FormatEntry]) -> Self {
        self.formats = formats;
        self
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import a module from its bytes and filename.
    pub fn import_module(
        &self,
        data: &[u8],
        filename: &str,
        subsong: Option<usize>,
    ) -> Result<Song, ImportError> {
        let ctx = DecodeContext { filename, subsong: subsong.unwrap_or(0) };
        // The full registry scan only runs when extension routing finds nothing
        // or every routed decoder fails
        let mut candidates: Vec<&'static FormatEntry> = routed(self.formats, data, filename).into_iter().collect();
        let mut scanned = false;
        if candidates.is_empty() {
            candidates = scan(self.formats, data, filename, &[]);
            scanned = true;
        }
        let hint = candidates.first().map(|e| e.tag);
        debug!(
            filename,
            candidates = ?candidates.iter().map(|e| e.tag).collect::<Vec<_>>(),
            "dispatching"
        );

        let mut attempts = Vec::new();
        let mut emulator_tried = false;

        let prefers_emulator = extensions_of(filename)
            .first()
            .is_some_and(|ext| self.options.preference(ext) == Preference::Emulator);
        if prefers_emulator {
            emulator_tried = true;
            if let Some(song) = self.try_emulator(data, &ctx, hint, &mut attempts) {
                return Ok(song);
            }
        }

        let mut next = 0;
        loop {
            if next == candidates.len() {
                if scanned {
                    break;
                }
                scanned = true;
                let rest = scan(self.formats, data, filename, &candidates);
                if rest.is_empty() {
                    break;
                }
                candidates.extend(rest);
            }
            let entry = candidates[next];
            next += 1;
            match entry.decoder {
                Decoder::Native(decode) => match decode(data, &ctx) {
                    Ok(song) => {
                        info!(filename, format = entry.name, "imported");
                        return Ok(song);
                    }
                    Err(e) if e.is_detection() => {
                        debug!(format = entry.name, "decoder rejected buffer");
                    }
                    Err(e) => {
                        warn!(format = entry.name, error = %e, "decoder failed");
                        attempts.push(Attempt { strategy: entry.name.to_string(), reason: e.to_string() });
                    }
                },
                Decoder::Emulated if !emulator_tried => {
                    emulator_tried = true;
                    if let Some(song) = self.try_emulator(data, &ctx, Some(entry.tag), &mut attempts) {
                        return Ok(song);
                    }
                }
                Decoder::Emulated => {}
            }
        }

        if !emulator_tried && (!candidates.is_empty() || self.can_emulate()) {
            if let Some(song) = self.try_emulator(data, &ctx, hint, &mut attempts) {
                return Ok(song);
            }
        }

        if candidates.is_empty() && !self.can_emulate() {
            return Err(ImportError::Unrecognized { filename: filename.to_string() });
        }
        Err(ImportError::AllFailed { filename: filename.to_string(), attempts })
    }

    fn can_emulate(&self) -> bool {
        self.options.emulator_fallback && self.emulator.is_some()
    }

    fn try_emulator(
        &self,
        data: &[u8],
        ctx: &DecodeContext,
        hint: Option<FormatTag>,
        attempts: &mut Vec<Attempt>,
    ) -> Option<Song> {
        let emulator = match self.emulator {
            Some(emulator) if self.options.emulator_fallback => emulator,
            Some(_) => {
                attempts.push(Attempt { strategy: "emulator".into(), reason: "emulator fallback disabled".into() });
                return None;
            }
            None => {
                attempts.push(Attempt { strategy: "emulator".into(), reason: "no emulator available".into() });
                return None;
            }
        };
        match emulator.load(data, ctx.filename, ctx.subsong, hint) {
            Ok(song) => {
                info!(filename = ctx.filename, emulator = emulator.name(), "imported through emulator");
                Some(song)
            }
            Err(e) => {
                warn!(emulator = emulator.name(), error = %e, "emulator failed");
                attempts.push(Attempt { strategy: emulator.name().to_string(), reason: e.to_string() });
                None
            }
        }
    }
}

/// First format claiming the file's extension whose detector accepts the
/// buffer.
fn routed(formats: &'static [FormatEntry], data: &[u8], filename: &str) -> Option<&'static FormatEntry> {
    extensions_of(filename).iter().find_map(|ext| {
        formats
            .iter()
            .filter(|e| e.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .find(|e| (e.detect)(data, Some(filename)))
    })
}

/// Every format in registry order whose detector accepts the buffer,
/// skipping those already tried.
fn scan(
    formats: &'static [FormatEntry],
    data: &[u8],
    filename: &str,
    tried: &[&'static FormatEntry],
) -> Vec<&'static FormatEntry> {
    formats
        .iter()
        .filter(|e| !tried.iter().any(|t| t.tag == e.tag) && (e.detect)(data, Some(filename)))
        .collect()
}

/// Import with default options and no emulator.
pub fn import_module(data: &[u8], filename: &str, subsong: Option<usize>) -> Result<Song, ImportError> {
    Importer::new(ImportOptions::default()).import_module(data, filename, subsong)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatError;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmulator {
        calls: RefCell<Vec<Option<FormatTag>>>,
        succeed: bool,
    }

    impl FakeEmulator {
        fn new(succeed: bool) -> Self {
            Self { calls: RefCell::new(Vec::new()), succeed }
        }
    }

    impl Emulator for FakeEmulator {
        fn name(&self) -> &str {
            "fake"
        }

        fn load(&self, _: &[u8], _: &str, _: usize, hint: Option<FormatTag>) -> Result<Song, EmulatorError> {
            self.calls.borrow_mut().push(hint);
            if self.succeed {
                Ok(Song::new("emulated"))
            } else {
                Err(EmulatorError("cannot play".into()))
            }
        }
    }

    static UNROUTED_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn starts_with_aaaa(data: &[u8], _: Option<&str>) -> bool {
        data.starts_with(b"AAAA")
    }

    fn counting_reject(_: &[u8], _: Option<&str>) -> bool {
        UNROUTED_CALLS.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn decode_ok(_: &[u8], ctx: &DecodeContext) -> Result<Song, FormatError> {
        Ok(Song::new(ctx.filename))
    }

    fn decode_broken(_: &[u8], _: &DecodeContext) -> Result<Song, FormatError> {
        Err(FormatError::structural("AAA", "broken"))
    }

    static ROUTED_FORMATS: [FormatEntry; 2] = [
        FormatEntry {
            tag: FormatTag::Xm,
            name: "counting",
            extensions: &["bbb"],
            detect: counting_reject,
            decoder: Decoder::Native(decode_ok),
        },
        FormatEntry {
            tag: FormatTag::It,
            name: "aaa",
            extensions: &["aaa"],
            detect: starts_with_aaaa,
            decoder: Decoder::Native(decode_ok),
        },
    ];

    static FALLTHROUGH_FORMATS: [FormatEntry; 2] = [
        FormatEntry {
            tag: FormatTag::S3m,
            name: "broken",
            extensions: &["aaa"],
            detect: starts_with_aaaa,
            decoder: Decoder::Native(decode_broken),
        },
        FormatEntry {
            tag: FormatTag::Ptm,
            name: "working",
            extensions: &[],
            detect: starts_with_aaaa,
            decoder: Decoder::Native(decode_ok),
        },
    ];

    #[test]
    fn routed_extension_skips_other_detectors() {
        let importer = Importer::new(ImportOptions::default()).with_formats(&ROUTED_FORMATS);
        let song = importer.import_module(b"AAAA....", "song.aaa", None).unwrap();
        assert_eq!(song.title.as_str(), "song.aaa");
        assert_eq!(UNROUTED_CALLS.load(Ordering::SeqCst), 0);

        importer.import_module(b"AAAA....", "song.bin", None).unwrap();
        assert_eq!(UNROUTED_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn routed_decoder_failure_falls_through_to_registry_scan() {
        let importer = Importer::new(ImportOptions::default()).with_formats(&FALLTHROUGH_FORMATS);
        let song = importer.import_module(b"AAAA....", "song.aaa", None).unwrap();
        assert_eq!(song.title.as_str(), "song.aaa");

        let err = Importer::new(ImportOptions::default())
            .with_formats(&FALLTHROUGH_FORMATS[..1])
            .import_module(b"AAAA....", "song.aaa", None)
            .unwrap_err();
        let ImportError::AllFailed { attempts, .. } = err else {
            panic!("expected every strategy to fail");
        };
        assert_eq!(attempts[0], Attempt { strategy: "broken".into(), reason: "AAA: broken".into() });
    }

    #[test]
    fn unknown_bytes_without_emulator_are_unrecognized() {
        let err = import_module(&[0u8; 2048], "noise.bin", None).unwrap_err();
        assert_eq!(err, ImportError::Unrecognized { filename: "noise.bin".into() });
    }

    #[test]
    fn unknown_bytes_fall_back_to_emulator() {
        let emulator = FakeEmulator::new(true);
        let importer = Importer::new(ImportOptions::default()).with_emulator(&emulator);
        let song = importer.import_module(&[0u8; 2048], "noise.bin", None).unwrap();
        assert_eq!(song.title.as_str(), "emulated");
        assert_eq!(*emulator.calls.borrow(), vec![None]);
    }

    #[test]
    fn emulator_failure_is_reported() {
        let emulator = FakeEmulator::new(false);
        let importer = Importer::new(ImportOptions::default()).with_emulator(&emulator);
        match importer.import_module(&[0u8; 2048], "noise.bin", None) {
            Err(ImportError::AllFailed { attempts, .. }) => {
                assert_eq!(attempts, vec![Attempt { strategy: "fake".into(), reason: "cannot play".into() }]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn disabled_fallback_skips_emulator() {
        let emulator = FakeEmulator::new(true);
        let options = ImportOptions { emulator_fallback: false, ..ImportOptions::default() };
        let importer = Importer::new(options).with_emulator(&emulator);
        assert!(importer.import_module(&[0u8; 2048], "x.bin", None).is_err());
        assert!(emulator.calls.borrow().is_empty());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: ImportOptions = toml::from_str(
            r#"
            [[preferences]]
            extension = "mod"
            prefer = "emulator"
            "#,
        )
        .unwrap();
        assert!(options.emulator_fallback);
        assert_eq!(options.preference("MOD"), Preference::Emulator);
        assert_eq!(options.preference("xm"), Preference::Native);
    }
}
