//! Lifecycle of this device's temporary exposure keys.
//!
//! One TEK per rolling period, created lazily on first use and persisted
//! before it is returned. The state machine per period is:
//!
//! ```text
//! Absent ──current_local_key()──▶ ValidForPeriod(p) ──clock passes p──▶ ValidForPeriod(p')
//! ```
//!
//! Keys older than the retention window are pruned from the store before each
//! key lookup.

use exposure_crypto::{EnIntervalNumber, KEY_LEN, TemporaryExposureKey};
use exposure_proto::DiagnosisKey;
use tracing::{debug, info, warn};

use crate::{
    env::Environment,
    error::SchedulerError,
    storage::{PruneSummary, RetentionCutoff, Storage, StorageError, StoredTek},
    transport::ControlPlane,
};

/// Owner of the local TEK log.
#[derive(Clone)]
pub struct KeyStore<S: Storage, E: Environment> {
    storage: S,
    env: E,
}

impl<S: Storage, E: Environment> KeyStore<S, E> {
    /// Create a key store over `storage`, reading time and randomness from
    /// `env`.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env }
    }

    /// Underlying store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Time and randomness source.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// TEK for the period containing the current wall-clock time.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Storage` if the store is unreachable. No key is
    ///   returned unless it has been persisted.
    /// - `SchedulerError::Validation` if the clock is beyond the u32 interval
    ///   range
    pub fn current_local_key(&self) -> Result<StoredTek, SchedulerError> {
        let enin = self.env.current_interval()?;
        self.key_for_interval(enin)
    }

    /// TEK for the period containing `enin`, creating it if absent.
    ///
    /// Concurrent callers for the same period all receive the same key: the
    /// store's compare-and-insert decides the winner.
    pub fn key_for_interval(&self, enin: EnIntervalNumber) -> Result<StoredTek, SchedulerError> {
        let period = enin.tek_period();

        self.prune_expired()?;

        if let Some(latest) = self.storage.latest_tek()? {
            if latest.period == period {
                return Ok(latest);
            }
        }

        let mut bytes = [0u8; KEY_LEN];
        self.env.random_bytes(&mut bytes);
        let candidate = TemporaryExposureKey::from_bytes(bytes);

        let stored = self.storage.insert_tek_if_absent(period, &candidate)?;
        if stored.tek == candidate {
            info!(period = period.value(), "generated temporary exposure key");
        } else {
            debug!(period = period.value(), "temporary exposure key created concurrently");
        }

        Ok(stored)
    }

    /// All persisted keys, oldest period first.
    pub fn history(&self) -> Result<Vec<StoredTek>, StorageError> {
        self.storage.load_teks()
    }

    /// Delete keys, exposures and diagnoses older than `cutoff`.
    pub fn prune_older_than(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError> {
        let summary = self.storage.prune(cutoff)?;

        if summary.total() > 0 {
            info!(
                teks = summary.teks,
                exposures = summary.exposures,
                diagnoses = summary.diagnoses,
                close_contacts = summary.close_contacts,
                "pruned expired records"
            );
        }

        Ok(summary)
    }

    /// Publish every stored key to the control plane.
    ///
    /// Returns the server's acknowledgement. A control-plane failure is logged
    /// and reported as `false`; it is not retried.
    ///
    /// # Errors
    ///
    /// - `StorageError` if the key history cannot be read
    pub async fn upload_diagnosis<C: ControlPlane>(
        &self,
        control: &C,
        otp: &str,
    ) -> Result<bool, StorageError> {
        let keys: Vec<DiagnosisKey> = self
            .history()?
            .iter()
            .map(|stored| DiagnosisKey::new(*stored.tek.as_bytes(), stored.period.value()))
            .collect();

        let count = keys.len();
        match control.upload(otp, keys).await {
            Ok(accepted) => {
                info!(keys = count, accepted, "diagnosis upload finished");
                Ok(accepted)
            },
            Err(e) => {
                warn!(error = %e, "diagnosis upload failed");
                Ok(false)
            },
        }
    }

    /// Opportunistic retention pass. Failure is logged, not fatal.
    fn prune_expired(&self) -> Result<(), SchedulerError> {
        let cutoff = RetentionCutoff::at(self.env.wall_clock_secs())?;

        if let Err(e) = self.prune_older_than(&cutoff) {
            warn!(error = %e, "retention prune failed");
        }

        Ok(())
    }
}
