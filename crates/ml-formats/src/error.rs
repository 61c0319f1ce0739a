//! Error types for format detection and decoding.

use thiserror::Error;

/// Error type for format parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The buffer does not carry this format's structural signature.
    /// The caller should not have invoked the decoder.
    #[error("not a {format} module")]
    Detection { format: &'static str },
    /// A required section is absent or a declared count is out of range.
    #[error("{format}: {reason}")]
    Structural { format: &'static str, reason: String },
    /// A read ran past the end of the buffer.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof { offset: usize },
    /// A fixed-layout header could not be read.
    #[error("invalid header layout: {0}")]
    Layout(String),
}

impl FormatError {
    /// Shorthand for a structural violation.
    pub fn structural(format: &'static str, reason: impl Into<String>) -> Self {
        FormatError::Structural { format, reason: reason.into() }
    }

    /// Returns true for the error kinds a dispatcher resolves by trying the
    /// next decoder without reporting anything.
    pub fn is_detection(&self) -> bool {
        matches!(self, FormatError::Detection { .. })
    }
}

impl From<binrw::Error> for FormatError {
    fn from(e: binrw::Error) -> Self {
        if e.is_eof() {
            FormatError::UnexpectedEof { offset: 0 }
        } else {
            FormatError::Layout(e.to_string())
        }
    }
}

/// Error returned by the dispatcher when no strategy produced a song.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// No detector accepted the buffer and the emulator is unavailable.
    #[error("unrecognized module format: {filename}")]
    Unrecognized { filename: String },
    /// Every candidate decoder (and the emulator, if enabled) failed.
    #[error("could not import {filename}: {}", summarize(attempts))]
    AllFailed { filename: String, attempts: Vec<Attempt> },
}

/// One failed decoding strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Strategy name (format name or "emulator")
    pub strategy: String,
    /// Why it failed
    pub reason: String,
}

fn summarize(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error reported by an emulator collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EmulatorError(pub String);
