//! Retention: nothing older than 14 days survives a key lookup.

use exposure_crypto::{EnIntervalNumber, INTERVAL_SECS, RETENTION_SECS, TEK_ROLLING_PERIOD};
use exposure_node::{
    Environment, KeyStore, ManualEnv, MatchEngine,
    storage::{MemoryStorage, RedbStorage, RetentionCutoff, Storage},
};
use exposure_proto::DiagnosisKey;
use tempfile::tempdir;

/// 2020-04-02 00:00:00 UTC
const START: u64 = 1_585_785_600;
const DAY_SECS: u64 = TEK_ROLLING_PERIOD as u64 * INTERVAL_SECS;

/// One TEK per day for `days` days, plus one exposure per day and a diagnosis
/// matching each exposure.
fn populate<S: Storage>(storage: &S, days: u64) {
    let env = ManualEnv::new(START, 21);
    let store = KeyStore::new(storage.clone(), env.clone());
    let engine = MatchEngine::new(storage.clone());

    for day in 0..days {
        let key = store.current_local_key().unwrap();
        let rpi = key.tek.rpik().rpi(key.period);
        storage.append_exposure(&rpi, &[0; 4], env.wall_clock_secs()).unwrap();

        let published = DiagnosisKey::new(*key.tek.as_bytes(), key.period.value());
        assert!(engine.match_diagnosis_keys(&[published]).unwrap(), "day {day} should match");

        env.advance(DAY_SECS);
    }
}

fn check_window<S: Storage>(storage: S) {
    populate(&storage, 20);

    let now = START + 20 * DAY_SECS;
    let store = KeyStore::new(storage.clone(), ManualEnv::new(now, 99));
    store.current_local_key().unwrap();

    let cutoff = RetentionCutoff::at(now).unwrap();
    assert_eq!(cutoff.observed_before_secs, now - RETENTION_SECS);

    let teks = store.history().unwrap();
    assert!(teks.iter().all(|stored| stored.period >= cutoff.interval));
    // Days 6..=19 plus today's new key
    assert_eq!(teks.len(), 15);

    let exposures = storage.load_exposures().unwrap();
    assert!(exposures.iter().all(|record| record.observed_at_secs >= cutoff.observed_before_secs));
    assert_eq!(exposures.len(), 14);

    let diagnoses = storage.load_diagnoses().unwrap();
    assert!(diagnoses.iter().all(|record| record.key.interval() >= cutoff.interval));
    assert_eq!(diagnoses.len(), 14);

    for diagnosis in &diagnoses {
        let contacts = storage.close_contacts(diagnosis.id).unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(exposures.iter().any(|record| record.id == contacts[0]));
    }
}

#[test]
fn test_memory_retention_window() {
    check_window(MemoryStorage::new());
}

#[test]
fn test_redb_retention_window() {
    let dir = tempdir().unwrap();
    check_window(RedbStorage::open(dir.path().join("test.redb")).unwrap());
}

#[test]
fn test_prune_is_noop_inside_window() {
    let storage = MemoryStorage::new();
    populate(&storage, 3);

    let store = KeyStore::new(storage.clone(), ManualEnv::new(START + 3 * DAY_SECS, 1));
    let summary = store.prune_older_than(&RetentionCutoff::at(START + 3 * DAY_SECS).unwrap()).unwrap();

    assert_eq!(summary.total(), 0);
    assert_eq!(storage.load_teks().unwrap().len(), 3);
    assert_eq!(storage.close_contact_count(), 3);
}

#[test]
fn test_cutoff_interval_is_fourteen_days_back() {
    let cutoff = RetentionCutoff::at(START).unwrap();
    assert_eq!(cutoff.interval, EnIntervalNumber::new(2_642_976 - 14 * TEK_ROLLING_PERIOD));
}
