//! Concurrent key creation and diagnosis recording must never duplicate a
//! record.

use std::thread;

use exposure_crypto::{EnIntervalNumber, TemporaryExposureKey};
use exposure_node::{
    KeyStore, ManualEnv, MatchEngine,
    storage::{MemoryStorage, RedbStorage, Storage, StoredTek},
};
use exposure_proto::DiagnosisKey;
use tempfile::tempdir;

/// 2020-04-02 00:00:00 UTC
const START: u64 = 1_585_785_600;
const THREADS: u64 = 8;

fn race_for_key<S: Storage>(storage: &S) -> Vec<StoredTek> {
    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            // Distinct seeds: every thread would generate a different key
            let store = KeyStore::new(storage.clone(), ManualEnv::new(START, seed + 100));
            thread::spawn(move || store.current_local_key().unwrap())
        })
        .collect();

    handles.into_iter().map(|handle| handle.join().unwrap()).collect()
}

fn check_single_key<S: Storage>(storage: S) {
    let keys = race_for_key(&storage);

    assert!(keys.windows(2).all(|pair| pair[0] == pair[1]), "every caller sees the same key");
    assert_eq!(storage.load_teks().unwrap(), vec![keys[0].clone()]);
}

#[test]
fn test_memory_single_key_per_period() {
    check_single_key(MemoryStorage::new());
}

#[test]
fn test_redb_single_key_per_period() {
    let dir = tempdir().unwrap();
    check_single_key(RedbStorage::open(dir.path().join("test.redb")).unwrap());
}

fn race_for_diagnosis<S: Storage>(storage: S) {
    let period = EnIntervalNumber::new(2_642_976);
    let tek = [0x3C; 16];
    let rpi = TemporaryExposureKey::from_bytes(tek).rpik().rpi(period);
    storage.append_exposure(&rpi, &[0; 4], START).unwrap();

    let key = DiagnosisKey::new(tek, period.value());
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = MatchEngine::new(storage.clone());
            thread::spawn(move || engine.match_diagnosis_keys(&[key]).unwrap())
        })
        .collect();

    let winners = handles.into_iter().map(|handle| handle.join().unwrap()).filter(|won| *won).count();

    assert_eq!(winners, 1, "exactly one batch records the diagnosis");
    let diagnoses = storage.load_diagnoses().unwrap();
    assert_eq!(diagnoses.len(), 1);
    assert_eq!(storage.close_contacts(diagnoses[0].id).unwrap().len(), 1);
}

#[test]
fn test_memory_single_diagnosis_per_key() {
    race_for_diagnosis(MemoryStorage::new());
}

#[test]
fn test_redb_single_diagnosis_per_key() {
    let dir = tempdir().unwrap();
    race_for_diagnosis(RedbStorage::open(dir.path().join("test.redb")).unwrap());
}
