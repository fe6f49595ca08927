//! Error type for fingerprint parsing.

use thiserror::Error;

/// Errors that can occur when parsing a fingerprint from a string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("fingerprint must not be empty")]
    Empty,

    #[error("fingerprint has wrong length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("fingerprint is not valid hex: {0}")]
    NotHex(String),
}
