//! Protocol error types

use thiserror::Error;

/// Result alias for wire-format operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from encoding or parsing wire data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Beacon frame too short to contain an RPI
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum length
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Control message declares or encodes more than the size cap
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Declared or encoded size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Buffer ends before the declared message length
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    MessageTruncated {
        /// Declared body length
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// CBOR serialization failed
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),
}
