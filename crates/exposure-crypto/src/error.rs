//! Validation errors for derivation inputs.
//!
//! Every derivation entry point checks its inputs before touching a cipher, so
//! these are the only errors the crate produces. None of them are transient:
//! retrying with the same input fails the same way.

use thiserror::Error;

/// Input rejected before any cryptographic operation ran.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// A key (TEK, RPIK or AEMK) had the wrong length
    #[error("invalid {kind} length: expected {expected} bytes, got {actual}")]
    KeyLength {
        /// Which key was malformed
        kind: KeyKind,
        /// Required length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Metadata plaintext was not exactly 4 bytes
    #[error("invalid metadata length: expected {expected} bytes, got {actual}")]
    MetadataLength {
        /// Required length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Interval number does not fit in an unsigned 32-bit integer
    #[error("interval number {0} out of range")]
    IntervalOutOfRange(u64),
}

/// Key material named in [`ValidationError::KeyLength`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Temporary Exposure Key
    Tek,
    /// Rolling Proximity Identifier Key
    Rpik,
    /// Associated Encrypted Metadata Key
    Aemk,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tek => "TEK",
            Self::Rpik => "RPIK",
            Self::Aemk => "AEMK",
        };
        f.write_str(name)
    }
}
