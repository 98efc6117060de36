//! Node configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::NodeError;

/// Largest inbound radio frame accepted by default
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Time a peer gets to send its frame by default
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime configuration for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Path to the redb database file
    pub db_path: PathBuf,
    /// Address the radio receiver listens on (e.g., "0.0.0.0:7000")
    pub listen_address: String,
    /// Addresses advertisements are sent to
    pub peers: Vec<String>,
    /// Control-plane server address
    pub control_plane_address: String,
    /// Time between advertisements
    pub broadcast_interval: Duration,
    /// Time between diagnosis key fetches
    pub refresh_interval: Duration,
    /// Transmit power written into the metadata, in dBm
    pub tx_power_dbm: i8,
    /// Largest inbound frame, in bytes
    pub max_frame_size: usize,
    /// Time an inbound connection gets to deliver its frame
    pub read_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("exposure.redb"),
            listen_address: "0.0.0.0:7000".to_string(),
            peers: Vec::new(),
            control_plane_address: "127.0.0.1:7100".to_string(),
            broadcast_interval: Duration::from_secs(900),
            refresh_interval: Duration::from_secs(7200),
            tx_power_dbm: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Socket addresses from a validated [`NodeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddresses {
    /// Radio listen address
    pub listen: SocketAddr,
    /// Advertisement peers
    pub peers: Vec<SocketAddr>,
    /// Control-plane server
    pub control_plane: SocketAddr,
}

impl NodeConfig {
    /// Check the configuration and parse its addresses.
    ///
    /// # Errors
    ///
    /// - `NodeError::Config` if an interval, the frame size or the read
    ///   timeout is zero, or an address does not parse
    pub fn validate(&self) -> Result<ResolvedAddresses, NodeError> {
        if self.broadcast_interval.is_zero() {
            return Err(NodeError::Config("broadcast interval must be non-zero".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(NodeError::Config("refresh interval must be non-zero".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(NodeError::Config("max frame size must be non-zero".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(NodeError::Config("read timeout must be non-zero".to_string()));
        }

        let peers = self
            .peers
            .iter()
            .map(|peer| parse_addr("peer", peer))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedAddresses {
            listen: parse_addr("listen", &self.listen_address)?,
            peers,
            control_plane: parse_addr("control plane", &self.control_plane_address)?,
        })
    }
}

fn parse_addr(what: &str, address: &str) -> Result<SocketAddr, NodeError> {
    address
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid {what} address '{address}': {e}")))
}
