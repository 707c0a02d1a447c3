//! MIME parsing: header scanning, entity decoding, multipart splitting and tree walking.

pub mod decode;
pub mod entity;
pub mod header;
pub mod limit;
pub mod media_type;
pub mod multipart;
pub mod replay;
pub mod walk;

use serde::{Deserialize, Serialize};

/// Default maximum multipart nesting depth (to prevent runaway work on adversarial input).
pub const MAX_DEPTH: usize = 10;

/// Upper bound for a configured `max_depth`. Every level adds a buffered
/// reader to a leaf's read path.
pub const MAX_DEPTH_CEILING: usize = 64;

/// How malformed input is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Any structural ambiguity aborts the parse.
    Strict,
    /// Recover from common real-world damage and report what was recovered.
    #[default]
    Tolerant,
}

impl ParseMode {
    pub fn is_tolerant(self) -> bool {
        self == Self::Tolerant
    }
}

/// Options for one top-level parse, passed down unchanged to every nested
/// scan and split it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub mode: ParseMode,
    /// Ceiling on the top-level header block, in bytes.
    pub max_header_bytes: u64,
    /// Multipart levels the walker will descend into.
    pub max_depth: usize,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            mode: ParseMode::Strict,
            ..Self::default()
        }
    }

    pub fn tolerant() -> Self {
        Self::default()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            mode: ParseMode::Tolerant,
            max_header_bytes: limit::MAX_HEADER_BYTES,
            max_depth: MAX_DEPTH,
        }
    }
}

impl From<ParseMode> for ParseOptions {
    fn from(mode: ParseMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}
