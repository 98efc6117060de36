//! Long-running node tasks.
//!
//! [`spawn_node`] starts three independent tokio tasks that share nothing but
//! the store:
//!
//! - broadcast: refresh the identifier pair and advertise it, on a fixed
//!   cadence or when the radio rotates its address
//! - receive: log every beacon the radio hands over
//! - diagnosis: fetch published keys and match them against the log
//!
//! Each task runs until [`NodeHandle::shutdown`] aborts it. Aborting is
//! immediate, including for a receive task parked in `accept`.
//!
//! Store calls block, so every task runs them through `spawn_blocking`.

use std::{sync::Arc, time::Duration};

use exposure_crypto::Metadata;
use exposure_proto::ObservedBeacon;
use tokio::{
    sync::Notify,
    task::{self, AbortHandle},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    env::Environment,
    error::{SchedulerError, TransportError},
    exposure_log::ExposureLog,
    key_store::KeyStore,
    matcher::MatchEngine,
    scheduler::{LocalScheduler, RollingIdentifierScheduler},
    storage::Storage,
    transport::{Advertiser, BeaconReceiver, ControlPlane},
};

/// Pause after a failed receive before accepting again
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Task cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIntervals {
    /// Time between advertisements
    pub broadcast: Duration,
    /// Time between diagnosis key fetches
    pub refresh: Duration,
}

impl Default for NodeIntervals {
    fn default() -> Self {
        Self { broadcast: Duration::from_secs(900), refresh: Duration::from_secs(7200) }
    }
}

/// Control handle for the running node tasks.
///
/// Dropping the handle leaves the tasks running. Call
/// [`shutdown`](Self::shutdown) to stop them.
#[derive(Debug)]
pub struct NodeHandle {
    rotation: Arc<Notify>,
    diagnosis: Arc<Notify>,
    tasks: [AbortHandle; 3],
}

impl NodeHandle {
    /// The radio changed its address. Re-derive and advertise immediately.
    pub fn notify_address_rotation(&self) {
        self.rotation.notify_one();
    }

    /// Fetch and match diagnosis keys now instead of waiting for the next
    /// cycle.
    pub fn trigger_diagnosis_refresh(&self) {
        self.diagnosis.notify_one();
    }

    /// Abort all three tasks.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("node tasks stopped");
    }

    /// True once every task has stopped.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(AbortHandle::is_finished)
    }
}

/// Start the broadcast, receive and diagnosis tasks.
///
/// The broadcast scheduler is built before anything is spawned, so a store
/// that cannot produce a key fails here and nothing is advertised.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// - `SchedulerError` if the initial key cannot be loaded or created
pub fn spawn_node<S, E, A, R, C>(
    key_store: KeyStore<S, E>,
    metadata: Metadata,
    advertiser: A,
    receiver: R,
    control: C,
    intervals: NodeIntervals,
) -> Result<NodeHandle, SchedulerError>
where
    S: Storage,
    E: Environment,
    A: Advertiser,
    R: BeaconReceiver,
    C: ControlPlane,
{
    let storage = key_store.storage().clone();
    let env = key_store.env().clone();
    let scheduler = RollingIdentifierScheduler::local(key_store, metadata)?;

    let rotation = Arc::new(Notify::new());
    let diagnosis = Arc::new(Notify::new());

    let broadcast =
        tokio::spawn(broadcast_loop(scheduler, advertiser, intervals.broadcast, rotation.clone()));
    let receive = tokio::spawn(receive_loop(receiver, ExposureLog::new(storage.clone()), env));
    let matching = tokio::spawn(diagnosis_loop(
        MatchEngine::new(storage),
        control,
        intervals.refresh,
        diagnosis.clone(),
    ));

    info!(
        broadcast_secs = intervals.broadcast.as_secs(),
        refresh_secs = intervals.refresh.as_secs(),
        "node tasks started"
    );

    Ok(NodeHandle {
        rotation,
        diagnosis,
        tasks: [broadcast.abort_handle(), receive.abort_handle(), matching.abort_handle()],
    })
}

async fn broadcast_loop<S, E, A>(
    mut scheduler: LocalScheduler<S, E>,
    advertiser: A,
    every: Duration,
    rotation: Arc<Notify>,
) where
    S: Storage,
    E: Environment,
    A: Advertiser,
{
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            () = rotation.notified() => debug!("address rotated"),
        }

        let (returned, refreshed) = match task::spawn_blocking(move || {
            let refreshed = scheduler.refresh();
            (scheduler, refreshed)
        })
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "identifier refresh task failed, stopping broadcast");
                return;
            },
        };
        scheduler = returned;

        let payload = match refreshed {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "identifier refresh failed, not advertising");
                continue;
            },
        };

        if let Err(e) = advertiser.advertise(&payload).await {
            warn!(error = %e, enin = scheduler.interval().value(), "advertisement failed");
        }
    }
}

async fn receive_loop<S, E, R>(mut receiver: R, log: ExposureLog<S>, env: E)
where
    S: Storage,
    E: Environment,
    R: BeaconReceiver,
{
    loop {
        let frame = match receiver.receive().await {
            Ok(frame) => frame,
            Err(e @ (TransportError::FrameTooLarge { .. } | TransportError::ReadTimeout { .. })) => {
                debug!(error = %e, "dropping inbound connection");
                continue;
            },
            Err(e) => {
                warn!(error = %e, "receive failed");
                time::sleep(RECEIVE_BACKOFF).await;
                continue;
            },
        };

        let beacon = match ObservedBeacon::parse(&frame) {
            Ok(beacon) => beacon,
            Err(e) => {
                debug!(error = %e, "discarding malformed frame");
                continue;
            },
        };

        let rpi = beacon.rpi;
        let observed_at = env.wall_clock_secs();
        let log = log.clone();
        match task::spawn_blocking(move || log.record(&beacon, observed_at)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => error!(error = %e, %rpi, "failed to log beacon"),
            Err(e) => error!(error = %e, %rpi, "logging task failed"),
        }
    }
}

async fn diagnosis_loop<S, C>(
    engine: MatchEngine<S>,
    control: C,
    every: Duration,
    trigger: Arc<Notify>,
) where
    S: Storage,
    C: ControlPlane,
{
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            () = trigger.notified() => debug!("diagnosis refresh requested"),
        }

        let candidates = match control.refresh().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "diagnosis key fetch failed, treating as empty");
                continue;
            },
        };

        if candidates.is_empty() {
            continue;
        }

        let engine = engine.clone();
        let count = candidates.len();
        match task::spawn_blocking(move || engine.match_diagnosis_keys(&candidates)).await {
            Ok(Ok(true)) => info!(candidates = count, "new exposure recorded"),
            Ok(Ok(false)) => debug!(candidates = count, "no new exposures"),
            Ok(Err(e)) => warn!(error = %e, "diagnosis batch rejected"),
            Err(e) => error!(error = %e, "matching task failed"),
        }
    }
}
