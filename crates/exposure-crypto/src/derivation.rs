//! Subkey derivation and identifier encryption.
//!
//! The slice-based functions validate every input before any cipher is
//! constructed. The typed methods on the key newtypes are infallible because
//! their lengths are already guaranteed.

use aes::{
    Aes128,
    cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{
    error::ValidationError,
    interval::{EnIntervalNumber, TEK_ROLLING_PERIOD},
    keys::{
        AssociatedEncryptedMetadata, AssociatedEncryptedMetadataKey, KEY_LEN, Metadata,
        RPI_LEN, RollingProximityIdentifier, RollingProximityIdentifierKey, TemporaryExposureKey,
    },
};

/// HKDF info label for the RPIK
const RPIK_INFO: &[u8] = b"EN-RPIK";

/// HKDF info label for the AEMK
const AEMK_INFO: &[u8] = b"EN-AEMK";

/// Prefix of the padded RPI plaintext block
const RPI_LABEL: &[u8; 6] = b"EN-RPI";

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Derive the RPIK from raw TEK bytes.
pub fn derive_rpik(tek: &[u8]) -> Result<RollingProximityIdentifierKey, ValidationError> {
    Ok(TemporaryExposureKey::from_slice(tek)?.rpik())
}

/// Derive the AEMK from raw TEK bytes.
pub fn derive_aemk(tek: &[u8]) -> Result<AssociatedEncryptedMetadataKey, ValidationError> {
    Ok(TemporaryExposureKey::from_slice(tek)?.aemk())
}

/// Encrypt the padded interval block under raw RPIK bytes.
pub fn derive_rpi(rpik: &[u8], enin: u64) -> Result<RollingProximityIdentifier, ValidationError> {
    let rpik = RollingProximityIdentifierKey::from_slice(rpik)?;
    let enin = EnIntervalNumber::try_from_u64(enin)?;
    Ok(rpik.rpi(enin))
}

/// Encrypt metadata under raw AEMK bytes, keyed to one RPI.
pub fn derive_aem(
    aemk: &[u8],
    rpi: &RollingProximityIdentifier,
    metadata: &[u8],
) -> Result<AssociatedEncryptedMetadata, ValidationError> {
    let aemk = AssociatedEncryptedMetadataKey::from_slice(aemk)?;
    let metadata = Metadata::from_slice(metadata)?;
    Ok(aemk.aem(rpi, &metadata))
}

impl TemporaryExposureKey {
    /// HKDF-SHA256(tek, salt = none, info = "EN-RPIK", 16 bytes).
    pub fn rpik(&self) -> RollingProximityIdentifierKey {
        RollingProximityIdentifierKey(hkdf_expand(self.as_bytes(), RPIK_INFO))
    }

    /// HKDF-SHA256(tek, salt = none, info = "EN-AEMK", 16 bytes).
    pub fn aemk(&self) -> AssociatedEncryptedMetadataKey {
        AssociatedEncryptedMetadataKey(hkdf_expand(self.as_bytes(), AEMK_INFO))
    }
}

impl RollingProximityIdentifierKey {
    /// RPI for one interval: AES-128 over a single padded block, no chaining.
    pub fn rpi(&self, enin: EnIntervalNumber) -> RollingProximityIdentifier {
        let mut block = GenericArray::from(padded_rpi_block(enin));
        Aes128::new(GenericArray::from_slice(&self.0)).encrypt_block(&mut block);

        let mut rpi = [0u8; RPI_LEN];
        rpi.copy_from_slice(&block);
        RollingProximityIdentifier::from_bytes(rpi)
    }

    /// RPIs for the whole rolling period starting at `period`, in order.
    ///
    /// # Errors
    ///
    /// `IntervalOutOfRange` if the last interval of the period overflows u32.
    pub fn rpi_sequence(
        &self,
        period: EnIntervalNumber,
    ) -> Result<Vec<RollingProximityIdentifier>, ValidationError> {
        let last = u64::from(period.value()) + u64::from(TEK_ROLLING_PERIOD - 1);
        if period.checked_add(TEK_ROLLING_PERIOD - 1).is_none() {
            return Err(ValidationError::IntervalOutOfRange(last));
        }

        let cipher = Aes128::new(GenericArray::from_slice(&self.0));

        let sequence = (0..TEK_ROLLING_PERIOD)
            .map(|offset| {
                let enin = EnIntervalNumber::new(period.value() + offset);
                let mut block = GenericArray::from(padded_rpi_block(enin));
                cipher.encrypt_block(&mut block);

                let mut rpi = [0u8; RPI_LEN];
                rpi.copy_from_slice(&block);
                RollingProximityIdentifier::from_bytes(rpi)
            })
            .collect();

        Ok(sequence)
    }
}

impl AssociatedEncryptedMetadataKey {
    /// AES-128-CTR over the metadata with the RPI as the initial counter block.
    pub fn aem(
        &self,
        rpi: &RollingProximityIdentifier,
        metadata: &Metadata,
    ) -> AssociatedEncryptedMetadata {
        let mut buf = *metadata.as_bytes();
        let mut cipher = Aes128Ctr::new(
            GenericArray::from_slice(&self.0),
            GenericArray::from_slice(rpi.as_bytes()),
        );
        cipher.apply_keystream(&mut buf);
        AssociatedEncryptedMetadata::from_bytes(buf)
    }
}

/// `"EN-RPI" || 0x000000000000 || LE32(enin)`
fn padded_rpi_block(enin: EnIntervalNumber) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[..6].copy_from_slice(RPI_LABEL);
    block[12..].copy_from_slice(&enin.value().to_le_bytes());
    block
}

fn hkdf_expand(ikm: &[u8], info: &[u8]) -> [u8; KEY_LEN] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };

    okm
}
