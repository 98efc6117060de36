use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use exposure_crypto::{EnIntervalNumber, RollingProximityIdentifier, TemporaryExposureKey};
use exposure_proto::DiagnosisKey;

use super::{
    DiagnosisInsert, DiagnosisRecord, ExposureRecord, PruneSummary, RetentionCutoff, Storage,
    StorageError, StoredTek,
};

/// In-memory storage implementation for testing and simulation
///
/// Ordered maps keep TEKs by period and records by id, so iteration order
/// matches the durable backend. All state is wrapped in Arc<Mutex<>> to allow
/// Clone and concurrent access. Uses `lock().expect()` which will panic if the
/// mutex is poisoned - acceptable for test code.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Own TEKs by period
    teks: BTreeMap<u32, [u8; 16]>,

    /// Observed beacons by id
    exposures: BTreeMap<u64, ExposureRecord>,

    /// Matched diagnosis keys by id
    diagnoses: BTreeMap<u64, DiagnosisKey>,

    /// TEK -> diagnosis id
    diagnosis_by_tek: HashMap<[u8; 16], u64>,

    /// (diagnosis id, exposure id)
    close_contacts: BTreeSet<(u64, u64)>,

    next_exposure_id: u64,
    next_diagnosis_id: u64,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Total number of close-contact rows.
    ///
    /// Useful for debugging and testing.
    #[allow(clippy::expect_used)]
    pub fn close_contact_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").close_contacts.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn stored_tek(period: u32, tek: &[u8; 16]) -> StoredTek {
    StoredTek {
        period: EnIntervalNumber::new(period),
        tek: TemporaryExposureKey::from_bytes(*tek),
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    fn latest_tek(&self) -> Result<Option<StoredTek>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.teks.last_key_value().map(|(period, tek)| stored_tek(*period, tek)))
    }

    #[allow(clippy::expect_used)]
    fn insert_tek_if_absent(
        &self,
        period: EnIntervalNumber,
        tek: &TemporaryExposureKey,
    ) -> Result<StoredTek, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let persisted = inner.teks.entry(period.value()).or_insert(*tek.as_bytes());
        Ok(stored_tek(period.value(), persisted))
    }

    #[allow(clippy::expect_used)]
    fn load_teks(&self) -> Result<Vec<StoredTek>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.teks.iter().map(|(period, tek)| stored_tek(*period, tek)).collect())
    }

    #[allow(clippy::expect_used)]
    fn append_exposure(
        &self,
        rpi: &RollingProximityIdentifier,
        aem: &[u8],
        observed_at_secs: u64,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let id = inner.next_exposure_id;
        inner.next_exposure_id += 1;
        inner
            .exposures
            .insert(id, ExposureRecord { id, rpi: *rpi, aem: aem.to_vec(), observed_at_secs });

        Ok(id)
    }

    #[allow(clippy::expect_used)]
    fn exposures_matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.exposures.values().filter(|record| rpis.contains(&record.rpi)).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn load_exposures(&self) -> Result<Vec<ExposureRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.exposures.values().cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn find_diagnosis(&self, tek: &[u8; 16]) -> Result<Option<u64>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.diagnosis_by_tek.get(tek).copied())
    }

    #[allow(clippy::expect_used)]
    fn record_diagnosis(
        &self,
        key: &DiagnosisKey,
        exposure_ids: &[u64],
    ) -> Result<DiagnosisInsert, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if let Some(&existing) = inner.diagnosis_by_tek.get(&key.tek) {
            return Ok(DiagnosisInsert::AlreadyRecorded(existing));
        }

        let id = inner.next_diagnosis_id;
        inner.next_diagnosis_id += 1;
        inner.diagnoses.insert(id, *key);
        inner.diagnosis_by_tek.insert(key.tek, id);
        for &exposure_id in exposure_ids {
            inner.close_contacts.insert((id, exposure_id));
        }

        Ok(DiagnosisInsert::Inserted(id))
    }

    #[allow(clippy::expect_used)]
    fn load_diagnoses(&self) -> Result<Vec<DiagnosisRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.diagnoses.iter().map(|(&id, &key)| DiagnosisRecord { id, key }).collect())
    }

    #[allow(clippy::expect_used)]
    fn close_contacts(&self, diagnosis_id: u64) -> Result<Vec<u64>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .close_contacts
            .range((diagnosis_id, 0)..=(diagnosis_id, u64::MAX))
            .map(|&(_, exposure_id)| exposure_id)
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn prune(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError> {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        let inner = &mut *guard;
        let mut summary = PruneSummary::default();

        let before = inner.teks.len();
        inner.teks.retain(|&period, _| period >= cutoff.interval.value());
        summary.teks = before - inner.teks.len();

        let before = inner.exposures.len();
        inner.exposures.retain(|_, record| record.observed_at_secs >= cutoff.observed_before_secs);
        summary.exposures = before - inner.exposures.len();

        let before = inner.diagnoses.len();
        inner.diagnoses.retain(|_, key| key.enin >= cutoff.interval.value());
        summary.diagnoses = before - inner.diagnoses.len();

        let diagnoses = &inner.diagnoses;
        inner.diagnosis_by_tek.retain(|_, id| diagnoses.contains_key(id));

        let before = inner.close_contacts.len();
        let exposures = &inner.exposures;
        inner.close_contacts.retain(|(diagnosis_id, exposure_id)| {
            diagnoses.contains_key(diagnosis_id) && exposures.contains_key(exposure_id)
        });
        summary.close_contacts = before - inner.close_contacts.len();

        Ok(summary)
    }
}
