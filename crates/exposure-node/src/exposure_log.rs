//! Append-only log of beacons observed from peers.

use std::collections::HashSet;

use exposure_crypto::RollingProximityIdentifier;
use exposure_proto::ObservedBeacon;
use tracing::trace;

use crate::storage::{ExposureRecord, Storage, StorageError};

/// Write and query side of the exposure log.
#[derive(Clone)]
pub struct ExposureLog<S: Storage> {
    storage: S,
}

impl<S: Storage> ExposureLog<S> {
    /// Log backed by `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Append one observation. Returns the record id.
    pub fn record(&self, beacon: &ObservedBeacon, observed_at_secs: u64) -> Result<u64, StorageError> {
        let id = self.storage.append_exposure(&beacon.rpi, &beacon.aem, observed_at_secs)?;
        trace!(id, rpi = %beacon.rpi, "logged beacon");
        Ok(id)
    }

    /// Observations whose RPI is in `rpis`.
    pub fn matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError> {
        self.storage.exposures_matching(rpis)
    }

    /// Every observation still retained.
    pub fn all(&self) -> Result<Vec<ExposureRecord>, StorageError> {
        self.storage.load_exposures()
    }
}
