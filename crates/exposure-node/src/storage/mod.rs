//! Storage abstraction for keys, exposures and diagnoses
//!
//! Trait-based abstraction over the four logical logs: own TEKs, observed
//! exposures, matched diagnosis keys and the close contacts linking them. The
//! trait is synchronous; every method is one transaction, so concurrent
//! writers never observe a partial record.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::collections::HashSet;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
use exposure_crypto::{
    EnIntervalNumber, RETENTION_INTERVALS, RETENTION_SECS, RollingProximityIdentifier,
    TemporaryExposureKey, ValidationError,
};
use exposure_proto::DiagnosisKey;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// A persisted TEK and the rolling period it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTek {
    /// First interval of the rolling period
    pub period: EnIntervalNumber,
    /// Key material
    pub tek: TemporaryExposureKey,
}

/// A beacon observed from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureRecord {
    /// Store-assigned identifier, increasing in insertion order
    pub id: u64,
    /// Peer's rolling identifier
    pub rpi: RollingProximityIdentifier,
    /// Peer's encrypted metadata, opaque
    pub aem: Vec<u8>,
    /// Arrival time, Unix seconds
    pub observed_at_secs: u64,
}

/// A diagnosis key confirmed to intersect the exposure log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisRecord {
    /// Store-assigned identifier
    pub id: u64,
    /// The matched (TEK, ENIN) pair
    pub key: DiagnosisKey,
}

/// Outcome of [`Storage::record_diagnosis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisInsert {
    /// New record created with this id, close contacts written
    Inserted(u64),
    /// A record for this TEK already existed; nothing was written
    AlreadyRecorded(u64),
}

/// Oldest data that survives a prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCutoff {
    /// TEKs and diagnosis keys issued before this interval are removed
    pub interval: EnIntervalNumber,
    /// Exposures observed before this Unix time are removed
    pub observed_before_secs: u64,
}

impl RetentionCutoff {
    /// Cutoff for a 14-day window ending at `now_secs`.
    pub fn at(now_secs: u64) -> Result<Self, ValidationError> {
        let now = EnIntervalNumber::from_unix_secs(now_secs)?;
        Ok(Self {
            interval: now.saturating_sub(RETENTION_INTERVALS),
            observed_before_secs: now_secs.saturating_sub(RETENTION_SECS),
        })
    }
}

/// Rows removed by one prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// TEK entries removed
    pub teks: usize,
    /// Exposure records removed
    pub exposures: usize,
    /// Diagnosis records removed
    pub diagnoses: usize,
    /// Close-contact rows removed
    pub close_contacts: usize,
}

impl PruneSummary {
    /// Total rows removed.
    pub fn total(&self) -> usize {
        self.teks + self.exposures + self.diagnoses + self.close_contacts
    }
}

/// Storage abstraction for the exposure notification logs
///
/// Must be Clone (shared by the key store, the receive task and the match
/// engine), Send + Sync (thread-safe), and synchronous (no async methods).
/// Implementations share internal state via Arc, so clones access the same
/// underlying store.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned. Acceptable for test/simulation code.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Most recent TEK by period. `None` if no key has been stored.
    fn latest_tek(&self) -> Result<Option<StoredTek>, StorageError>;

    /// Store `tek` for `period` unless a key for that period already exists.
    ///
    /// Returns the key that is persisted for `period` after the call: either
    /// `tek` or the one that was already there.
    ///
    /// # Invariants
    ///
    /// - Post: exactly one key exists for `period`, even under concurrent
    ///   callers racing with different keys
    fn insert_tek_if_absent(
        &self,
        period: EnIntervalNumber,
        tek: &TemporaryExposureKey,
    ) -> Result<StoredTek, StorageError>;

    /// All stored TEKs in ascending period order.
    fn load_teks(&self) -> Result<Vec<StoredTek>, StorageError>;

    /// Append an observed beacon. Returns the new record id.
    fn append_exposure(
        &self,
        rpi: &RollingProximityIdentifier,
        aem: &[u8],
        observed_at_secs: u64,
    ) -> Result<u64, StorageError>;

    /// Every exposure whose RPI is in `rpis`, ordered by id.
    fn exposures_matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError>;

    /// All exposures ordered by id.
    fn load_exposures(&self) -> Result<Vec<ExposureRecord>, StorageError>;

    /// Id of the diagnosis record for `tek`, if one exists.
    fn find_diagnosis(&self, tek: &[u8; 16]) -> Result<Option<u64>, StorageError>;

    /// Atomically record a diagnosis and its close contacts.
    ///
    /// # Invariants
    ///
    /// - Post: at most one diagnosis record exists per TEK
    /// - Post: if `Inserted`, one close-contact row exists per entry of
    ///   `exposure_ids`
    fn record_diagnosis(
        &self,
        key: &DiagnosisKey,
        exposure_ids: &[u64],
    ) -> Result<DiagnosisInsert, StorageError>;

    /// All diagnosis records ordered by id.
    fn load_diagnoses(&self) -> Result<Vec<DiagnosisRecord>, StorageError>;

    /// Exposure ids linked to a diagnosis, ascending.
    fn close_contacts(&self, diagnosis_id: u64) -> Result<Vec<u64>, StorageError>;

    /// Delete everything older than `cutoff` from all logs, plus close
    /// contacts left dangling by those deletions.
    fn prune(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_spans_fourteen_days() {
        let now = 1_585_785_600 + 3 * 600;
        let cutoff = RetentionCutoff::at(now).unwrap();

        assert_eq!(cutoff.interval.value(), 2_642_979 - 2016);
        assert_eq!(cutoff.observed_before_secs, now - 1_209_600);
    }

    #[test]
    fn cutoff_saturates_near_epoch() {
        let cutoff = RetentionCutoff::at(600).unwrap();
        assert_eq!(cutoff.interval.value(), 0);
        assert_eq!(cutoff.observed_before_secs, 0);
    }
}
