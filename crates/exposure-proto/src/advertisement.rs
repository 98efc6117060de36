//! Beacon advertisement payload.
//!
//! Outbound layout (31 bytes):
//!
//! ```text
//! [Flags: 02 01 1A] [UUID list: 03 03 FD 6F] [Service data: 17 16 FD 6F] [RPI: 16] [AEM: 4]
//! ```
//!
//! Inbound frames are parsed positionally: the first 11 bytes are framing and
//! are not inspected, the next 16 are the RPI and whatever follows is the AEM.

use bytes::BufMut;
use exposure_crypto::{AssociatedEncryptedMetadata, RPI_LEN, RollingProximityIdentifier};

use crate::error::{ProtocolError, Result};

/// Flags AD structure: LE General Discoverable, BR/EDR not supported
pub const FLAGS: [u8; 3] = [0x02, 0x01, 0x1A];

/// Complete 16-bit Service UUID list carrying the exposure notification UUID
pub const SERVICE_UUID: [u8; 4] = [0x03, 0x03, 0xFD, 0x6F];

/// Service Data AD header: length 0x17, type 0x16, UUID 0xFD6F
pub const SERVICE_DATA_HEADER: [u8; 4] = [0x17, 0x16, 0xFD, 0x6F];

/// Bytes preceding the RPI
pub const HEADER_SIZE: usize = FLAGS.len() + SERVICE_UUID.len() + SERVICE_DATA_HEADER.len();

/// Total outbound payload size
pub const PAYLOAD_SIZE: usize = HEADER_SIZE + RPI_LEN + 4;

/// Smallest inbound frame that still carries a full RPI
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + RPI_LEN;

/// Identifier pair broadcast by this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementPayload {
    /// Current rolling identifier
    pub rpi: RollingProximityIdentifier,
    /// Metadata ciphertext bound to `rpi`
    pub aem: AssociatedEncryptedMetadata,
}

impl AdvertisementPayload {
    /// Pair an RPI with its AEM.
    pub const fn new(rpi: RollingProximityIdentifier, aem: AssociatedEncryptedMetadata) -> Self {
        Self { rpi, aem }
    }

    /// Write the 31-byte payload.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&FLAGS);
        dst.put_slice(&SERVICE_UUID);
        dst.put_slice(&SERVICE_DATA_HEADER);
        dst.put_slice(self.rpi.as_bytes());
        dst.put_slice(self.aem.as_bytes());
    }

    /// The payload as a fixed-size array.
    pub fn to_bytes(&self) -> [u8; PAYLOAD_SIZE] {
        let mut out = [0u8; PAYLOAD_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }
}

/// Identifier pair observed from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBeacon {
    /// Peer's rolling identifier
    pub rpi: RollingProximityIdentifier,
    /// Everything after the RPI, stored opaque
    pub aem: Vec<u8>,
}

impl ObservedBeacon {
    /// Parse an inbound frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 27 bytes arrived
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let Some(body) = frame.get(HEADER_SIZE..) else {
            return Err(ProtocolError::FrameTooShort { expected: MIN_FRAME_SIZE, actual: frame.len() });
        };

        let Some((rpi, aem)) = body.split_first_chunk::<RPI_LEN>() else {
            return Err(ProtocolError::FrameTooShort { expected: MIN_FRAME_SIZE, actual: frame.len() });
        };

        Ok(Self { rpi: RollingProximityIdentifier::from_bytes(*rpi), aem: aem.to_vec() })
    }
}
