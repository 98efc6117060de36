//! Exposure Notification Wire Formats
//!
//! Two wire formats, both pure byte transformations with no I/O:
//!
//! - Beacon advertisements: a fixed 31-byte payload carrying the current RPI
//!   and AEM, and the positional parser for frames received from peers.
//! - Control-plane messages: length-prefixed CBOR requests and responses for
//!   fetching published diagnosis keys and uploading this device's keys.
//!
//! # Security
//!
//! Parsing provides structural validity only. An observed beacon is not
//! authenticated: any peer can broadcast any RPI. Control-plane messages are
//! size-capped before deserialization so a hostile peer cannot force large
//! allocations.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod advertisement;
pub mod control;
pub mod error;

pub use advertisement::{AdvertisementPayload, MIN_FRAME_SIZE, ObservedBeacon, PAYLOAD_SIZE};
pub use control::{
    ControlRequest, ControlResponse, DiagnosisKey, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE, body_len,
    decode_body, decode_message, encode_message,
};
pub use error::{ProtocolError, Result};
