//! Format detectors and decoders for modloom.
//!
//! Every supported tracker format has a cheap detector and a decoder that
//! produces an [`ml_ir::Song`]. The [`registry`] lists them in detection
//! priority order and the [`dispatch`] module picks one for a file.

pub mod assemble;
pub mod chunk;
pub mod dispatch;
pub mod effect_parser;
mod error;
pub mod note;
pub mod packing;
pub mod pcm;
pub mod reader;
pub mod registry;

pub mod ahx_format;
pub mod amiga_players;
pub mod dbm_format;
pub mod f669_format;
pub mod far_format;
pub mod it_format;
mod it_compression;
pub mod med_format;
pub mod mod_format;
pub mod mtm_format;
pub mod okt_format;
pub mod ptm_format;
pub mod s3m_format;
pub mod stk_format;
pub mod stm_format;
pub mod ult_format;
pub mod xm_format;

pub use dispatch::{import_module, Emulator, ExtensionPreference, ImportOptions, Importer, Preference};
pub use error::{Attempt, EmulatorError, FormatError, ImportError};
pub use registry::{DecodeContext, FormatEntry, FormatTag, FORMATS};
