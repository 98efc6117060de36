//! End-to-end matching: one device broadcasts, another logs and later matches
//! the first device's published keys.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use exposure_crypto::{
    EnIntervalNumber, INTERVAL_SECS, Metadata, RollingProximityIdentifier, TemporaryExposureKey,
};
use exposure_node::{
    Environment, ExposureLog, KeyStore, ManualEnv, MatchEngine, RollingIdentifierScheduler,
    storage::{
        DiagnosisInsert, DiagnosisRecord, ExposureRecord, MemoryStorage, PruneSummary,
        RetentionCutoff, Storage, StorageError, StoredTek,
    },
};
use exposure_proto::{DiagnosisKey, ObservedBeacon, PAYLOAD_SIZE};

/// 2020-04-02 00:00:00 UTC
const START: u64 = 1_585_785_600;

/// Broadcast `intervals` consecutive payloads from a fresh device and log each
/// one on `receiver`. Returns the broadcaster's published key.
fn broadcast_into(receiver: &ExposureLog<MemoryStorage>, seed: u64, intervals: u64) -> DiagnosisKey {
    let env = ManualEnv::new(START, seed);
    let key_store = KeyStore::new(MemoryStorage::new(), env.clone());
    let mut scheduler = RollingIdentifierScheduler::local(key_store, Metadata::v1(-10)).unwrap();

    for _ in 0..intervals {
        let frame = scheduler.refresh().unwrap().to_bytes();
        assert_eq!(frame.len(), PAYLOAD_SIZE);

        let beacon = ObservedBeacon::parse(&frame).unwrap();
        receiver.record(&beacon, env.wall_clock_secs()).unwrap();
        env.advance(INTERVAL_SECS);
    }

    let stored = scheduler.key_store().history().unwrap().remove(0);
    DiagnosisKey::new(*stored.tek.as_bytes(), stored.period.value())
}

#[test]
fn test_published_key_matches_observed_beacons() {
    let storage = MemoryStorage::new();
    let log = ExposureLog::new(storage.clone());
    let published = broadcast_into(&log, 11, 6);

    let engine = MatchEngine::new(storage.clone());
    assert!(engine.match_diagnosis_keys(&[published]).unwrap());

    let diagnoses = storage.load_diagnoses().unwrap();
    assert_eq!(diagnoses.len(), 1);
    assert_eq!(diagnoses[0].key, published);

    let all: Vec<u64> = log.all().unwrap().iter().map(|record| record.id).collect();
    assert_eq!(storage.close_contacts(diagnoses[0].id).unwrap(), all);
}

#[test]
fn test_matching_is_idempotent() {
    let storage = MemoryStorage::new();
    let log = ExposureLog::new(storage.clone());
    let published = broadcast_into(&log, 12, 3);

    let engine = MatchEngine::new(storage.clone());
    assert!(engine.match_diagnosis_keys(&[published]).unwrap());
    assert!(!engine.match_diagnosis_keys(&[published]).unwrap());
    assert!(!engine.match_diagnosis_keys(&[published, published]).unwrap());

    assert_eq!(storage.load_diagnoses().unwrap().len(), 1);
    assert_eq!(storage.close_contact_count(), 3);
}

#[test]
fn test_unrelated_key_does_not_match() {
    let storage = MemoryStorage::new();
    let log = ExposureLog::new(storage.clone());
    broadcast_into(&log, 13, 4);

    let stranger = DiagnosisKey::new([0xEE; 16], 2_642_976);
    assert!(!MatchEngine::new(storage.clone()).match_diagnosis_keys(&[stranger]).unwrap());

    assert!(storage.load_diagnoses().unwrap().is_empty());
    assert_eq!(storage.close_contact_count(), 0);
}

#[test]
fn test_only_matching_candidates_are_recorded() {
    let storage = MemoryStorage::new();
    let log = ExposureLog::new(storage.clone());
    let first = broadcast_into(&log, 14, 2);
    let second = broadcast_into(&log, 15, 5);
    let stranger = DiagnosisKey::new([0xEE; 16], first.enin);

    let engine = MatchEngine::new(storage.clone());
    assert!(engine.match_diagnosis_keys(&[stranger, first, second]).unwrap());

    let recorded: HashSet<DiagnosisKey> =
        storage.load_diagnoses().unwrap().into_iter().map(|record| record.key).collect();
    assert_eq!(recorded, HashSet::from([first, second]));
    assert_eq!(storage.close_contact_count(), 7);
}

/// Store whose `record_diagnosis` fails while `failing` is set.
#[derive(Clone)]
struct FlakyDiagnoses {
    inner: MemoryStorage,
    failing: Arc<AtomicBool>,
}

impl Storage for FlakyDiagnoses {
    fn latest_tek(&self) -> Result<Option<StoredTek>, StorageError> {
        self.inner.latest_tek()
    }

    fn insert_tek_if_absent(
        &self,
        period: EnIntervalNumber,
        tek: &TemporaryExposureKey,
    ) -> Result<StoredTek, StorageError> {
        self.inner.insert_tek_if_absent(period, tek)
    }

    fn load_teks(&self) -> Result<Vec<StoredTek>, StorageError> {
        self.inner.load_teks()
    }

    fn append_exposure(
        &self,
        rpi: &RollingProximityIdentifier,
        aem: &[u8],
        observed_at_secs: u64,
    ) -> Result<u64, StorageError> {
        self.inner.append_exposure(rpi, aem, observed_at_secs)
    }

    fn exposures_matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError> {
        self.inner.exposures_matching(rpis)
    }

    fn load_exposures(&self) -> Result<Vec<ExposureRecord>, StorageError> {
        self.inner.load_exposures()
    }

    fn find_diagnosis(&self, tek: &[u8; 16]) -> Result<Option<u64>, StorageError> {
        self.inner.find_diagnosis(tek)
    }

    fn record_diagnosis(
        &self,
        key: &DiagnosisKey,
        exposure_ids: &[u64],
    ) -> Result<DiagnosisInsert, StorageError> {
        if self.failing.load(Ordering::SeqCst) && key.tek == [0xF0; 16] {
            return Err(StorageError::Io("disk unplugged".to_string()));
        }
        self.inner.record_diagnosis(key, exposure_ids)
    }

    fn load_diagnoses(&self) -> Result<Vec<DiagnosisRecord>, StorageError> {
        self.inner.load_diagnoses()
    }

    fn close_contacts(&self, diagnosis_id: u64) -> Result<Vec<u64>, StorageError> {
        self.inner.close_contacts(diagnosis_id)
    }

    fn prune(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError> {
        self.inner.prune(cutoff)
    }
}

#[test]
fn test_storage_failure_is_isolated_and_retried() {
    let inner = MemoryStorage::new();
    let storage = FlakyDiagnoses { inner: inner.clone(), failing: Arc::new(AtomicBool::new(true)) };

    let period = EnIntervalNumber::new(2_642_976);
    for tek in [[0xF0u8; 16], [0x0Fu8; 16]] {
        let rpi = TemporaryExposureKey::from_bytes(tek).rpik().rpi(period);
        inner.append_exposure(&rpi, &[0; 4], START).unwrap();
    }

    let failing = DiagnosisKey::new([0xF0; 16], period.value());
    let healthy = DiagnosisKey::new([0x0F; 16], period.value());
    let engine = MatchEngine::new(storage.clone());

    // The failing candidate is skipped, the healthy one still lands
    assert!(engine.match_diagnosis_keys(&[failing, healthy]).unwrap());
    let recorded: Vec<DiagnosisKey> =
        inner.load_diagnoses().unwrap().into_iter().map(|record| record.key).collect();
    assert_eq!(recorded, vec![healthy]);

    // Nothing was written for the failed candidate, so the next batch retries it
    storage.failing.store(false, Ordering::SeqCst);
    assert!(engine.match_diagnosis_keys(&[failing, healthy]).unwrap());
    assert_eq!(inner.load_diagnoses().unwrap().len(), 2);
}

#[test]
fn test_intersection_counts_as_match_when_write_fails() {
    let inner = MemoryStorage::new();
    let storage = FlakyDiagnoses { inner: inner.clone(), failing: Arc::new(AtomicBool::new(true)) };

    let period = EnIntervalNumber::new(2_642_976);
    let rpi = TemporaryExposureKey::from_bytes([0xF0; 16]).rpik().rpi(period);
    inner.append_exposure(&rpi, &[0; 4], START).unwrap();

    let failing = DiagnosisKey::new([0xF0; 16], period.value());
    let engine = MatchEngine::new(storage.clone());

    // The sighting is in the log, so the caller hears about the exposure
    assert!(engine.match_diagnosis_keys(&[failing]).unwrap());
    assert!(inner.load_diagnoses().unwrap().is_empty());
    assert_eq!(inner.close_contact_count(), 0);

    storage.failing.store(false, Ordering::SeqCst);
    assert!(engine.match_diagnosis_keys(&[failing]).unwrap());
    assert_eq!(inner.load_diagnoses().unwrap().len(), 1);
    assert_eq!(inner.close_contact_count(), 1);
}
