//! Rolling identifier scheduler.
//!
//! Holds the derived state for one TEK: the subkeys plus the identifier pair
//! for the current interval. Two modes, fixed at construction:
//!
//! - [`LocalScheduler`]: TEK from the [`KeyStore`], rolled automatically as
//!   the wall clock crosses period boundaries.
//! - [`ExternalScheduler`]: TEK supplied by the caller (a published diagnosis
//!   key). Has no `refresh`, so it cannot change after construction.

use exposure_crypto::{
    AssociatedEncryptedMetadataKey, EnIntervalNumber, Metadata, RollingProximityIdentifier,
    RollingProximityIdentifierKey, TEK_ROLLING_PERIOD, TemporaryExposureKey, ValidationError,
};
use exposure_proto::AdvertisementPayload;
use tracing::{debug, info};

use crate::{env::Environment, error::SchedulerError, key_store::KeyStore, storage::Storage};

/// Scheduler whose TEK is owned by this device.
pub type LocalScheduler<S, E> = RollingIdentifierScheduler<Local<S, E>>;

/// Scheduler reconstructing another device's identifiers.
pub type ExternalScheduler = RollingIdentifierScheduler<External>;

/// Local mode: key source for automatic rolling.
pub struct Local<S: Storage, E: Environment> {
    key_store: KeyStore<S, E>,
}

/// External mode: no key source, immutable.
pub struct External;

/// Derived identifier state for one TEK.
pub struct RollingIdentifierScheduler<M> {
    mode: M,
    tek: TemporaryExposureKey,
    tek_period: EnIntervalNumber,
    rpik: RollingProximityIdentifierKey,
    aemk: AssociatedEncryptedMetadataKey,
    metadata: Metadata,
    enin: EnIntervalNumber,
    current: AdvertisementPayload,
}

impl<M> RollingIdentifierScheduler<M> {
    fn derive(
        mode: M,
        tek: TemporaryExposureKey,
        tek_period: EnIntervalNumber,
        metadata: Metadata,
        enin: EnIntervalNumber,
    ) -> Self {
        let rpik = tek.rpik();
        let aemk = tek.aemk();
        let current = pair_for(&rpik, &aemk, &metadata, enin);

        Self { mode, tek, tek_period, rpik, aemk, metadata, enin, current }
    }

    /// First interval of the TEK's rolling period.
    pub fn tek_period(&self) -> EnIntervalNumber {
        self.tek_period
    }

    /// Interval the current pair was derived for.
    pub fn interval(&self) -> EnIntervalNumber {
        self.enin
    }

    /// Current identifier pair.
    pub fn current(&self) -> AdvertisementPayload {
        self.current
    }

    /// Metadata plaintext encrypted into each AEM.
    pub fn metadata(&self) -> Metadata {
        self.metadata
    }

    /// The TEK this state is derived from.
    pub fn tek(&self) -> &TemporaryExposureKey {
        &self.tek
    }

    /// All 144 RPIs of the TEK's rolling period, in interval order.
    ///
    /// Never broadcast; used only to test a diagnosis key against the
    /// exposure log.
    pub fn day_sequence(&self) -> Result<Vec<RollingProximityIdentifier>, ValidationError> {
        self.rpik.rpi_sequence(self.tek_period)
    }
}

impl<S: Storage, E: Environment> RollingIdentifierScheduler<Local<S, E>> {
    /// Scheduler for this device's own identifiers, initialised for the
    /// current interval.
    pub fn local(key_store: KeyStore<S, E>, metadata: Metadata) -> Result<Self, SchedulerError> {
        let enin = key_store.env().current_interval()?;
        let stored = key_store.key_for_interval(enin)?;

        Ok(Self::derive(Local { key_store }, stored.tek, stored.period, metadata, enin))
    }

    /// Identifier pair to transmit now.
    ///
    /// Rolls to a new TEK if the wall clock has left the current period, then
    /// re-derives the pair for the current interval. Must be called before
    /// every transmission and on every address rotation.
    pub fn refresh(&mut self) -> Result<AdvertisementPayload, SchedulerError> {
        let enin = self.mode.key_store.env().current_interval()?;

        if enin.tek_period() != self.tek_period {
            let stored = self.mode.key_store.key_for_interval(enin)?;
            info!(
                from = self.tek_period.value(),
                to = stored.period.value(),
                "rolling to new temporary exposure key"
            );

            self.rpik = stored.tek.rpik();
            self.aemk = stored.tek.aemk();
            self.tek = stored.tek;
            self.tek_period = stored.period;
        }

        if enin != self.enin {
            debug!(enin = enin.value(), "rotating identifier");
        }

        self.enin = enin;
        self.current = pair_for(&self.rpik, &self.aemk, &self.metadata, enin);

        Ok(self.current)
    }

    /// Key store backing this scheduler.
    pub fn key_store(&self) -> &KeyStore<S, E> {
        &self.mode.key_store
    }
}

impl RollingIdentifierScheduler<External> {
    /// Scheduler for a published (TEK, period) pair.
    ///
    /// The current pair is derived for `tek_period` with default metadata.
    ///
    /// # Errors
    ///
    /// - `ValidationError::IntervalOutOfRange` if the rolling period starting
    ///   at `tek_period` extends past `u32::MAX`
    pub fn external(
        tek: TemporaryExposureKey,
        tek_period: EnIntervalNumber,
    ) -> Result<Self, ValidationError> {
        if tek_period.checked_add(TEK_ROLLING_PERIOD - 1).is_none() {
            return Err(ValidationError::IntervalOutOfRange(
                u64::from(tek_period.value()) + u64::from(TEK_ROLLING_PERIOD - 1),
            ));
        }

        Ok(Self::derive(External, tek, tek_period, Metadata::default(), tek_period))
    }
}

fn pair_for(
    rpik: &RollingProximityIdentifierKey,
    aemk: &AssociatedEncryptedMetadataKey,
    metadata: &Metadata,
    enin: EnIntervalNumber,
) -> AdvertisementPayload {
    let rpi = rpik.rpi(enin);
    let aem = aemk.aem(&rpi, metadata);
    AdvertisementPayload::new(rpi, aem)
}

#[cfg(test)]
mod tests {
    use exposure_crypto::{INTERVAL_SECS, derive_rpi, derive_rpik};

    use super::*;
    use crate::{env::ManualEnv, storage::MemoryStorage};

    const START: u64 = 1_585_785_600;
    const DAY_SECS: u64 = TEK_ROLLING_PERIOD as u64 * INTERVAL_SECS;

    fn local() -> (LocalScheduler<MemoryStorage, ManualEnv>, ManualEnv) {
        let env = ManualEnv::new(START, 3);
        let store = KeyStore::new(MemoryStorage::new(), env.clone());
        (RollingIdentifierScheduler::local(store, Metadata::v1(-8)).unwrap(), env)
    }

    #[test]
    fn refresh_within_interval_is_idempotent() {
        let (mut scheduler, env) = local();

        let first = scheduler.refresh().unwrap();
        env.advance(INTERVAL_SECS - 1);
        let second = scheduler.refresh().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn refresh_rotates_rpi_each_interval() {
        let (mut scheduler, env) = local();

        let first = scheduler.refresh().unwrap();
        env.advance(INTERVAL_SECS);
        let second = scheduler.refresh().unwrap();

        assert_ne!(first.rpi, second.rpi);
        assert_ne!(first.aem, second.aem);
        assert_eq!(scheduler.tek_period().value(), 2_642_976);
    }

    #[test]
    fn refresh_across_period_boundary_rolls_key() {
        let (mut scheduler, env) = local();

        let before = scheduler.refresh().unwrap();
        let old_tek = scheduler.tek().clone();

        env.advance(DAY_SECS);
        let after = scheduler.refresh().unwrap();

        assert_ne!(before, after);
        assert_ne!(scheduler.tek(), &old_tek);
        assert_eq!(scheduler.tek_period().value(), 2_642_976 + 144);

        let history = scheduler.key_store().history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tek, old_tek, "previous TEK stays retrievable until pruned");
    }

    #[test]
    fn broadcast_pair_comes_from_current_period_key() {
        let (mut scheduler, env) = local();
        env.advance(DAY_SECS + 5 * INTERVAL_SECS);

        let pair = scheduler.refresh().unwrap();
        let stored = scheduler.key_store().current_local_key().unwrap();

        let expected = stored.tek.rpik().rpi(env.current_interval().unwrap());
        assert_eq!(pair.rpi, expected);
    }

    #[test]
    fn external_day_sequence_matches_derivation() {
        let tek = [0x42u8; 16];
        let period = EnIntervalNumber::new(2_642_976);
        let scheduler =
            ExternalScheduler::external(TemporaryExposureKey::from_bytes(tek), period).unwrap();

        let sequence = scheduler.day_sequence().unwrap();
        let rpik = derive_rpik(&tek).unwrap();

        assert_eq!(sequence.len(), 144);
        for (i, rpi) in sequence.iter().enumerate() {
            assert_eq!(*rpi, derive_rpi(rpik.as_bytes(), 2_642_976 + i as u64).unwrap());
        }
        assert_eq!(scheduler.current().rpi, sequence[0]);
    }

    #[test]
    fn external_rejects_overflowing_period() {
        let result = ExternalScheduler::external(
            TemporaryExposureKey::from_bytes([0; 16]),
            EnIntervalNumber::new(u32::MAX - 10),
        );
        assert!(matches!(result, Err(ValidationError::IntervalOutOfRange(_))));
    }
}
