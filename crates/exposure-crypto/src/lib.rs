//! Exposure Notification Key Derivation
//!
//! Pure functions from key material to broadcast identifiers. No I/O, no
//! clocks, no randomness: callers supply the TEK and the interval number, so
//! every output is reproducible.
//!
//! # Key Hierarchy
//!
//! One random TEK is generated per rolling period (144 intervals of 10
//! minutes). Two subkeys are derived from it, and each interval's RPI and AEM
//! are derived from the subkeys.
//!
//! ```text
//! TEK (16 random bytes, one per rolling period)
//!   │
//!   ├── HKDF-SHA256 "EN-RPIK" → RPIK
//!   │                            │
//!   │                            ▼
//!   │          AES-128("EN-RPI" || 0^6 || LE32(ENIN)) → RPI (per interval)
//!   │                                                     │
//!   └── HKDF-SHA256 "EN-AEMK" → AEMK                      │ IV
//!                                │                        ▼
//!                                └──────── AES-128-CTR(metadata) → AEM
//! ```
//!
//! # Security
//!
//! Unlinkability:
//! - RPIs of different intervals are independent AES outputs
//! - Without the TEK, two RPIs cannot be tied to the same device
//!
//! Disclosure:
//! - Publishing a TEK reveals exactly one rolling period of RPIs
//! - Other periods use unrelated random TEKs
//!
//! Key hygiene:
//! - TEK, RPIK and AEMK are zeroized on drop
//! - `Debug` output of secret keys is redacted

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derivation;
pub mod error;
pub mod interval;
pub mod keys;

pub use derivation::{derive_aem, derive_aemk, derive_rpi, derive_rpik};
pub use error::{KeyKind, ValidationError};
pub use interval::{
    EnIntervalNumber, INTERVAL_SECS, RETENTION_DAYS, RETENTION_INTERVALS, RETENTION_SECS,
    TEK_ROLLING_PERIOD,
};
pub use keys::{
    AssociatedEncryptedMetadata, AssociatedEncryptedMetadataKey, KEY_LEN, METADATA_LEN, Metadata,
    RPI_LEN, RollingProximityIdentifier, RollingProximityIdentifierKey, TemporaryExposureKey,
};
