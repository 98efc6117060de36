//! Fuzz target for key lifecycle and matching under storage failures
//!
//! Drives a KeyStore, an ExposureLog and a MatchEngine over a ChaoticStorage
//! with arbitrary clock jumps, sightings and diagnosis batches.
//!
//! # Invariants
//!
//! - Nothing panics on storage errors
//! - A returned key is persisted and covers the current period
//! - At most one key per period and one diagnosis per TEK
//! - No close contact outlives its exposure

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use exposure_crypto::{EnIntervalNumber, TemporaryExposureKey};
use exposure_node::{
    Environment, ExposureLog, KeyStore, ManualEnv, MatchEngine,
    storage::{ChaoticStorage, MemoryStorage, Storage},
};
use exposure_proto::{DiagnosisKey, ObservedBeacon};
use libfuzzer_sys::fuzz_target;

/// 2020-04-02 00:00:00 UTC
const START: u64 = 1_585_785_600;

#[derive(Debug, Clone, Arbitrary)]
struct ChaosScenario {
    /// Seed for ChaoticStorage RNG (deterministic failures)
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Sequence of operations to perform
    operations: Vec<ChaosOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum ChaosOperation {
    /// Move the clock forward by this many minutes
    Advance { minutes: u16 },
    /// Fetch the current local key
    CurrentKey,
    /// Log a sighting of peer `peer` at interval offset `offset` into today
    Observe { peer: u8, offset: u8 },
    /// Match today's keys of these peers
    Match { peers: Vec<u8> },
}

fn peer_tek(peer: u8) -> [u8; 16] {
    [peer % 8; 16]
}

fuzz_target!(|scenario: ChaosScenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let inner = MemoryStorage::new();
    let storage = ChaoticStorage::with_seed(inner.clone(), failure_rate, scenario.chaos_seed);

    let env = ManualEnv::new(START, scenario.chaos_seed);
    let store = KeyStore::new(storage.clone(), env.clone());
    let log = ExposureLog::new(storage.clone());
    let engine = MatchEngine::new(storage);

    for op in scenario.operations {
        let today = env.current_interval().expect("clock stays in range").tek_period();

        match op {
            ChaosOperation::Advance { minutes } => env.advance(u64::from(minutes) * 60),
            ChaosOperation::CurrentKey => {
                if let Ok(key) = store.current_local_key() {
                    assert_eq!(key.period, today);
                    assert!(inner.load_teks().expect("inner store is reliable").contains(&key));
                }
            },
            ChaosOperation::Observe { peer, offset } => {
                let enin = EnIntervalNumber::new(today.value() + u32::from(offset % 144));
                let rpi = TemporaryExposureKey::from_bytes(peer_tek(peer)).rpik().rpi(enin);
                let beacon = ObservedBeacon { rpi, aem: vec![0; 4] };
                let _ = log.record(&beacon, env.wall_clock_secs());
            },
            ChaosOperation::Match { peers } => {
                let batch: Vec<DiagnosisKey> = peers
                    .iter()
                    .map(|&peer| DiagnosisKey::new(peer_tek(peer), today.value()))
                    .collect();
                engine.match_diagnosis_keys(&batch).expect("periods are in range");
            },
        }
    }

    let teks = inner.load_teks().expect("inner store is reliable");
    let periods: HashSet<u32> = teks.iter().map(|stored| stored.period.value()).collect();
    assert_eq!(periods.len(), teks.len());

    let diagnoses = inner.load_diagnoses().expect("inner store is reliable");
    let diagnosed: HashSet<[u8; 16]> = diagnoses.iter().map(|record| record.key.tek).collect();
    assert_eq!(diagnosed.len(), diagnoses.len());

    let exposures: HashSet<u64> = inner
        .load_exposures()
        .expect("inner store is reliable")
        .iter()
        .map(|record| record.id)
        .collect();
    for record in diagnoses {
        let contacts = inner.close_contacts(record.id).expect("inner store is reliable");
        assert!(contacts.iter().all(|id| exposures.contains(id)));
    }
});
