//! Node error types.

use exposure_crypto::ValidationError;
use exposure_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors from key lifecycle and identifier scheduling.
///
/// Storage failures surface unchanged: a key that could not be persisted is
/// never broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Clock or key input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Key store unreachable
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Radio transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket I/O failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound frame exceeded the configured maximum
    #[error("frame too large: more than {max} bytes")]
    FrameTooLarge {
        /// Configured maximum
        max: usize,
    },

    /// Peer did not finish sending its frame in time
    #[error("peer {peer} did not send a frame in time")]
    ReadTimeout {
        /// Remote address of the connection
        peer: std::net::SocketAddr,
    },

    /// No peer accepted the advertisement
    #[error("advertisement reached none of {peers} peers")]
    Unreachable {
        /// Number of peers attempted
        peers: usize,
    },
}

/// Control-plane exchange errors.
///
/// Callers treat any of these as an empty or unsuccessful result for the
/// current cycle.
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Connection or socket I/O failed
    #[error("control plane I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be encoded or decoded
    #[error("control plane protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered with the wrong message kind
    #[error("unexpected control plane response: {0}")]
    UnexpectedResponse(String),
}

/// Top-level errors for the node binary.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Store failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key lifecycle failure
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Radio transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Control-plane failure
    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}
