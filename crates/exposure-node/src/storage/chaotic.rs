//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails operations so tests can check that key creation never falls
//! back to an unpersisted key and that one failing diagnosis candidate does not
//! take the rest of the batch down with it.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use exposure_crypto::{EnIntervalNumber, RollingProximityIdentifier, TemporaryExposureKey};
use exposure_proto::DiagnosisKey;

use super::{
    DiagnosisInsert, DiagnosisRecord, ExposureRecord, PruneSummary, RetentionCutoff, Storage,
    StorageError, StoredTek,
};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// based on a configured failure rate. A failed operation never reaches the
/// inner store, so injected failures are clean aborts, not partial writes.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, including failed ones
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator, reproducible from its seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with a fixed seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        #[allow(clippy::expect_used)]
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
        drop(count);

        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").next() < self.failure_rate;

        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn latest_tek(&self) -> Result<Option<StoredTek>, StorageError> {
        self.inject()?;
        self.inner.latest_tek()
    }

    fn insert_tek_if_absent(
        &self,
        period: EnIntervalNumber,
        tek: &TemporaryExposureKey,
    ) -> Result<StoredTek, StorageError> {
        self.inject()?;
        self.inner.insert_tek_if_absent(period, tek)
    }

    fn load_teks(&self) -> Result<Vec<StoredTek>, StorageError> {
        self.inject()?;
        self.inner.load_teks()
    }

    fn append_exposure(
        &self,
        rpi: &RollingProximityIdentifier,
        aem: &[u8],
        observed_at_secs: u64,
    ) -> Result<u64, StorageError> {
        self.inject()?;
        self.inner.append_exposure(rpi, aem, observed_at_secs)
    }

    fn exposures_matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError> {
        self.inject()?;
        self.inner.exposures_matching(rpis)
    }

    fn load_exposures(&self) -> Result<Vec<ExposureRecord>, StorageError> {
        self.inject()?;
        self.inner.load_exposures()
    }

    fn find_diagnosis(&self, tek: &[u8; 16]) -> Result<Option<u64>, StorageError> {
        self.inject()?;
        self.inner.find_diagnosis(tek)
    }

    fn record_diagnosis(
        &self,
        key: &DiagnosisKey,
        exposure_ids: &[u64],
    ) -> Result<DiagnosisInsert, StorageError> {
        self.inject()?;
        self.inner.record_diagnosis(key, exposure_ids)
    }

    fn load_diagnoses(&self) -> Result<Vec<DiagnosisRecord>, StorageError> {
        self.inject()?;
        self.inner.load_diagnoses()
    }

    fn close_contacts(&self, diagnosis_id: u64) -> Result<Vec<u64>, StorageError> {
        self.inject()?;
        self.inner.close_contacts(diagnosis_id)
    }

    fn prune(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError> {
        self.inject()?;
        self.inner.prune(cutoff)
    }
}
