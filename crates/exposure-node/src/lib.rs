//! Exposure notification node.
//!
//! Everything that touches the outside world: the clock and RNG, the durable
//! store, the radio and the control plane. Derivation and wire formats live in
//! [`exposure_crypto`] and [`exposure_proto`]; this crate wires them into the
//! key lifecycle and the three long-running tasks.
//!
//! # Components
//!
//! - [`KeyStore`]: one TEK per rolling period, created lazily and persisted
//!   before use
//! - [`RollingIdentifierScheduler`]: current (RPI, AEM) pair for the local
//!   TEK, or the full day sequence for a published one
//! - [`ExposureLog`]: append-only log of observed beacons
//! - [`MatchEngine`]: tests published diagnosis keys against the log
//! - [`spawn_node`]: broadcast, receive and diagnosis tasks
//! - [`Storage`]: store abstraction with [`MemoryStorage`], [`RedbStorage`]
//!   and [`ChaoticStorage`]
//!
//! # Data flow
//!
//! ```text
//! KeyStore ──TEK──▶ Scheduler ──payload──▶ Advertiser
//! BeaconReceiver ──frame──▶ ExposureLog
//! ControlPlane ──diagnosis keys──▶ MatchEngine ──▶ close contacts
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod exposure_log;
pub mod key_store;
pub mod matcher;
pub mod report;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod transport;

pub use config::{DEFAULT_READ_TIMEOUT, NodeConfig, ResolvedAddresses};
pub use env::{Environment, ManualEnv, SystemEnv};
pub use error::{ControlPlaneError, NodeError, SchedulerError, TransportError};
use exposure_crypto::Metadata;
pub use exposure_log::ExposureLog;
pub use key_store::KeyStore;
pub use matcher::{CandidateOutcome, MatchEngine, MatchError};
pub use report::{DurationEstimate, ExposureSummary, exposure_report};
pub use runtime::{NodeHandle, NodeIntervals, spawn_node};
pub use scheduler::{ExternalScheduler, LocalScheduler, RollingIdentifierScheduler};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use transport::{
    Advertiser, BeaconReceiver, ControlPlane, TcpAdvertiser, TcpBeaconReceiver, TcpControlPlane,
};

/// Start a node on the durable store with TCP transports.
///
/// # Errors
///
/// - `NodeError::Config` if the configuration does not validate
/// - `NodeError::Storage` if the database cannot be opened
/// - `NodeError::Transport` if the radio listener cannot bind
/// - `NodeError::Scheduler` if the initial key cannot be created
pub async fn start_node(config: &NodeConfig) -> Result<NodeHandle, NodeError> {
    let addrs = config.validate()?;

    let storage = RedbStorage::open(&config.db_path)?;
    let key_store = KeyStore::new(storage, SystemEnv::new());

    let receiver =
        TcpBeaconReceiver::bind(addrs.listen, config.max_frame_size, config.read_timeout).await?;
    tracing::info!(listen = %receiver.local_addr()?, peers = addrs.peers.len(), "radio bound");

    let handle = spawn_node(
        key_store,
        Metadata::v1(config.tx_power_dbm),
        TcpAdvertiser::new(addrs.peers),
        receiver,
        TcpControlPlane::new(addrs.control_plane),
        NodeIntervals { broadcast: config.broadcast_interval, refresh: config.refresh_interval },
    )?;

    Ok(handle)
}
