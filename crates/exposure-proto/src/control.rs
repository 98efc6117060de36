//! Control-plane messages.
//!
//! One request and one response per connection. Each message is CBOR preceded
//! by a 4-byte big-endian body length:
//!
//! ```text
//! [len: u32 BE] [CBOR body: len bytes]
//! ```
//!
//! The length is checked against [`MAX_MESSAGE_SIZE`] before any body byte is
//! read or parsed.

use bytes::BufMut;
use exposure_crypto::{EnIntervalNumber, KEY_LEN, TemporaryExposureKey};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{ProtocolError, Result};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest accepted message body (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A published (TEK, ENIN) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosisKey {
    /// Published temporary exposure key
    pub tek: [u8; KEY_LEN],
    /// Interval the key was issued for
    pub enin: u32,
}

impl DiagnosisKey {
    /// Pair a key with its interval.
    pub const fn new(tek: [u8; KEY_LEN], enin: u32) -> Self {
        Self { tek, enin }
    }

    /// The key as typed key material.
    pub fn temporary_exposure_key(&self) -> TemporaryExposureKey {
        TemporaryExposureKey::from_bytes(self.tek)
    }

    /// The interval as a typed interval number.
    pub const fn interval(&self) -> EnIntervalNumber {
        EnIntervalNumber::new(self.enin)
    }
}

/// Request from a node to the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Fetch the current set of published diagnosis keys
    Refresh,
    /// Publish this device's keys after a positive diagnosis
    Upload {
        /// One-time password authorizing the upload
        otp: String,
        /// Keys to publish, oldest first
        keys: Vec<DiagnosisKey>,
    },
}

/// Response from the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Published diagnosis keys, in server order
    DiagnosisKeys(Vec<DiagnosisKey>),
    /// Whether an upload was accepted
    UploadAccepted(bool),
}

impl ControlRequest {
    /// Write the length-prefixed message.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        encode_message(self, dst)
    }

    /// Parse a length-prefixed message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_message(bytes)
    }
}

impl ControlResponse {
    /// Write the length-prefixed message.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        encode_message(self, dst)
    }

    /// Parse a length-prefixed message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_message(bytes)
    }
}

/// Serialize `msg` as CBOR and write it with its length prefix.
///
/// # Errors
///
/// - `ProtocolError::CborEncode` if serialization fails
/// - `ProtocolError::MessageTooLarge` if the body exceeds 1 MiB
pub fn encode_message<T: Serialize>(msg: &T, dst: &mut impl BufMut) -> Result<()> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(msg, &mut body)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: body.len(), max: MAX_MESSAGE_SIZE });
    }

    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Validate a length prefix and return the body length it declares.
///
/// Stream readers call this after reading the first four bytes so that an
/// oversized body is rejected before it is buffered.
pub fn body_len(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    Ok(len)
}

/// Deserialize a CBOR body that has already been stripped of its prefix.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: body.len(), max: MAX_MESSAGE_SIZE });
    }
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Parse a complete length-prefixed message.
///
/// Trailing bytes after the declared body are ignored.
///
/// # Errors
///
/// - `ProtocolError::MessageTruncated` if the prefix or body is incomplete
/// - `ProtocolError::MessageTooLarge` if the prefix exceeds 1 MiB
/// - `ProtocolError::CborDecode` if the body is not a valid message
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let Some((prefix, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Err(ProtocolError::MessageTruncated {
            expected: LENGTH_PREFIX_SIZE,
            actual: bytes.len(),
        });
    };

    let len = body_len(*prefix)?;
    let Some(body) = rest.get(..len) else {
        return Err(ProtocolError::MessageTruncated { expected: len, actual: rest.len() });
    };

    decode_body(body)
}
