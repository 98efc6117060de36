//! Key material and identifier newtypes.
//!
//! Secret keys (TEK, RPIK, AEMK) zeroize on drop and redact their `Debug`
//! output. Broadcast values (RPI, AEM) are public and `Copy`.

use zeroize::Zeroize;

use crate::error::{KeyKind, ValidationError};

/// Length of every symmetric key in the hierarchy.
pub const KEY_LEN: usize = 16;

/// Length of a Rolling Proximity Identifier.
pub const RPI_LEN: usize = 16;

/// Length of the metadata plaintext and its ciphertext.
pub const METADATA_LEN: usize = 4;

/// Metadata version byte: major 01, minor 00.
const METADATA_VERSION_1_0: u8 = 0b0100_0000;

fn key_from_slice(kind: KeyKind, bytes: &[u8]) -> Result<[u8; KEY_LEN], ValidationError> {
    bytes.try_into().map_err(|_| ValidationError::KeyLength {
        kind,
        expected: KEY_LEN,
        actual: bytes.len(),
    })
}

/// Temporary Exposure Key: 16 random bytes bound to one rolling period.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryExposureKey([u8; KEY_LEN]);

impl TemporaryExposureKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse key bytes, rejecting anything but 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        key_from_slice(KeyKind::Tek, bytes).map(Self)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for TemporaryExposureKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for TemporaryExposureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemporaryExposureKey(..)")
    }
}

/// Rolling Proximity Identifier Key, derived from a TEK.
#[derive(Clone, PartialEq, Eq)]
pub struct RollingProximityIdentifierKey(pub(crate) [u8; KEY_LEN]);

impl RollingProximityIdentifierKey {
    /// Parse key bytes, rejecting anything but 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        key_from_slice(KeyKind::Rpik, bytes).map(Self)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for RollingProximityIdentifierKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for RollingProximityIdentifierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RollingProximityIdentifierKey(..)")
    }
}

/// Associated Encrypted Metadata Key, derived from a TEK.
#[derive(Clone, PartialEq, Eq)]
pub struct AssociatedEncryptedMetadataKey(pub(crate) [u8; KEY_LEN]);

impl AssociatedEncryptedMetadataKey {
    /// Parse key bytes, rejecting anything but 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        key_from_slice(KeyKind::Aemk, bytes).map(Self)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for AssociatedEncryptedMetadataKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for AssociatedEncryptedMetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AssociatedEncryptedMetadataKey(..)")
    }
}

/// Rolling Proximity Identifier: the 16-byte value broadcast over the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RollingProximityIdentifier([u8; RPI_LEN]);

impl RollingProximityIdentifier {
    /// Wrap raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; RPI_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub const fn as_bytes(&self) -> &[u8; RPI_LEN] {
        &self.0
    }
}

impl std::fmt::Display for RollingProximityIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Associated Encrypted Metadata: metadata ciphertext bound to one RPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociatedEncryptedMetadata([u8; METADATA_LEN]);

impl AssociatedEncryptedMetadata {
    /// Wrap raw ciphertext bytes.
    pub const fn from_bytes(bytes: [u8; METADATA_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw ciphertext bytes.
    pub const fn as_bytes(&self) -> &[u8; METADATA_LEN] {
        &self.0
    }
}

/// Metadata plaintext carried alongside each RPI.
///
/// Layout (LSB first):
/// - byte 0: version, bits 7:6 major, bits 5:4 minor
/// - byte 1: transmit power in dBm (signed)
/// - bytes 2-3: reserved, zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata([u8; METADATA_LEN]);

impl Metadata {
    /// Version 1.0 metadata with the given transmit power.
    pub const fn v1(tx_power_dbm: i8) -> Self {
        Self([METADATA_VERSION_1_0, tx_power_dbm as u8, 0, 0])
    }

    /// Parse metadata bytes, rejecting anything but 4 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        bytes.try_into().map(Self).map_err(|_| ValidationError::MetadataLength {
            expected: METADATA_LEN,
            actual: bytes.len(),
        })
    }

    /// Raw plaintext bytes.
    pub const fn as_bytes(&self) -> &[u8; METADATA_LEN] {
        &self.0
    }

    /// Version byte.
    pub const fn version(&self) -> u8 {
        self.0[0]
    }

    /// Transmit power in dBm.
    pub const fn tx_power_dbm(&self) -> i8 {
        self.0[1] as i8
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::v1(0)
    }
}
