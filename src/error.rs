use std::str::FromStr;

use thiserror::Error;

use crate::types::TokenId;

/// Errors surfaced by training, model I/O and decoding.
#[derive(Debug, Error)]
pub enum BpeError {
    /// Underlying file or stream operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The model file does not start with the expected magic number.
    #[error("not a tokenizer model file (bad magic 0x{0:08x})")]
    BadMagic(u32),

    /// The model file uses a format version this build cannot read.
    #[error("unsupported model version {0}")]
    UnsupportedVersion(u32),

    /// The model file is structurally invalid.
    #[error("corrupt model file: {0}")]
    CorruptModel(String),

    /// Requested target vocabulary size is outside the accepted range.
    #[error("target vocab size {0} out of range (256..=1000000)")]
    InvalidVocabSize(u32),

    /// Minimum merge frequency must be at least 1.
    #[error("min frequency must be at least 1")]
    InvalidMinFreq,

    /// Token ID not present in the vocabulary.
    #[error("unknown token id: {0}")]
    UnknownToken(TokenId),

    /// Decoded bytes are not valid UTF-8 (strict text decoding only).
    #[error("decoded bytes are not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Controls how invalid UTF-8 is handled when decoding tokens to text.
///
/// Unknown token IDs always produce errors regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Error out on invalid UTF-8.
    Strict,
    /// Substitute invalid sequences with U+FFFD.
    #[default]
    Replace,
}

impl FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "replace" => Ok(Self::Replace),
            _ => Err(format!("unknown error mode: {s:?}")),
        }
    }
}
