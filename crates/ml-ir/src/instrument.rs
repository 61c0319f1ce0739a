//! Instrument types.

use arrayvec::ArrayString;

use crate::sample::Sample;

/// An instrument definition.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    /// 1-based id; cells reference instruments by this number
    pub id: u8,
    /// Instrument name
    pub name: ArrayString<32>,
    /// Sample payload or silent stand-in
    pub kind: InstrumentKind,
}

impl Instrument {
    /// Create an instrument. Names longer than 32 bytes are cut.
    pub fn new(id: u8, name: &str, kind: InstrumentKind) -> Self {
        let mut inst = Self { id, name: ArrayString::new(), kind };
        for ch in name.chars() {
            if inst.name.try_push(ch).is_err() {
                break;
            }
        }
        inst
    }

    /// Create a placeholder instrument.
    pub fn placeholder(id: u8, name: &str, reason: PlaceholderReason) -> Self {
        Self::new(id, name, InstrumentKind::Placeholder(reason))
    }

    /// The sample, if this instrument has one.
    pub fn sample(&self) -> Option<&Sample> {
        match &self.kind {
            InstrumentKind::Sample(s) => Some(s),
            InstrumentKind::Placeholder(_) => None,
        }
    }

    /// Returns true for silent stand-ins.
    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, InstrumentKind::Placeholder(_))
    }
}

/// What an instrument plays.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrumentKind {
    /// PCM sample
    Sample(Sample),
    /// Silent stand-in
    Placeholder(PlaceholderReason),
}

/// Why an instrument could not be represented as a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderReason {
    /// No sample data (zero length, or data missing from the file)
    Empty,
    /// Wavetable or software synthesis instrument
    Synth,
    /// FM / AdLib instrument
    Fm,
    /// Sample data uses a compression scheme that is not decoded
    Compressed,
    /// Any other construct without a canonical equivalent
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_cut() {
        let inst = Instrument::placeholder(1, "a name that is definitely longer than 32 bytes", PlaceholderReason::Empty);
        assert_eq!(inst.name.len(), 32);
        assert!(inst.is_placeholder());
        assert!(inst.sample().is_none());
    }
}
