//! Transport seams and their TCP implementations.
//!
//! The node talks to two collaborators it does not own: the radio, which
//! carries advertisement payloads to nearby devices, and the control plane,
//! which publishes diagnosis keys. Both sit behind traits so the tasks in
//! [`crate::runtime`] can run against in-process fakes under test.
//!
//! The TCP radio is a stand-in: one connection per advertisement, one frame
//! per connection. Each inbound connection is read on its own task under a
//! deadline, so a silent peer cannot hold up frames queued behind it. The TCP control plane carries exactly one request and one
//! response per connection, with no retry and no timeout.

use std::{future::Future, net::SocketAddr, time::Duration};

use bytes::BytesMut;
use exposure_proto::{
    AdvertisementPayload, ControlRequest, ControlResponse, DiagnosisKey, LENGTH_PREFIX_SIZE,
    body_len, decode_body,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, trace};

use crate::error::{ControlPlaneError, TransportError};

/// Outbound half of the radio.
pub trait Advertiser: Send + Sync + 'static {
    /// Hand one payload to the radio for transmission.
    fn advertise(
        &self,
        payload: &AdvertisementPayload,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Inbound half of the radio.
pub trait BeaconReceiver: Send + 'static {
    /// Wait for the next inbound frame and return its raw bytes.
    ///
    /// May park indefinitely. Callers stop it by aborting the owning task.
    fn receive(&mut self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// Source of published diagnosis keys and sink for uploads.
pub trait ControlPlane: Send + Sync + 'static {
    /// Fetch the currently published diagnosis keys.
    fn refresh(&self) -> impl Future<Output = Result<Vec<DiagnosisKey>, ControlPlaneError>> + Send;

    /// Publish `keys`, authorized by `otp`. Returns the server's verdict.
    fn upload(
        &self,
        otp: &str,
        keys: Vec<DiagnosisKey>,
    ) -> impl Future<Output = Result<bool, ControlPlaneError>> + Send;
}

/// Advertiser that writes each payload to every configured peer.
#[derive(Debug, Clone)]
pub struct TcpAdvertiser {
    peers: Vec<SocketAddr>,
}

impl TcpAdvertiser {
    /// Advertise to `peers`.
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        Self { peers }
    }

    /// Configured peers.
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }
}

impl Advertiser for TcpAdvertiser {
    /// Succeeds if at least one peer took the payload, or if no peers are
    /// configured.
    async fn advertise(&self, payload: &AdvertisementPayload) -> Result<(), TransportError> {
        let bytes = payload.to_bytes();
        let mut delivered = 0usize;

        for peer in &self.peers {
            match send_frame(*peer, &bytes).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(%peer, error = %e, "peer did not take advertisement"),
            }
        }

        if delivered == 0 && !self.peers.is_empty() {
            return Err(TransportError::Unreachable { peers: self.peers.len() });
        }

        trace!(delivered, rpi = %payload.rpi, "advertised");
        Ok(())
    }
}

async fn send_frame(peer: SocketAddr, frame: &[u8]) -> Result<(), TransportError> {
    let mut stream = TcpStream::connect(peer).await?;
    stream.write_all(frame).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Receiver that accepts one connection per inbound frame.
#[derive(Debug)]
pub struct TcpBeaconReceiver {
    listener: TcpListener,
    max_frame_size: usize,
    read_timeout: Duration,
    reads: JoinSet<Result<Vec<u8>, TransportError>>,
}

impl TcpBeaconReceiver {
    /// Bind the listening socket. A peer gets `read_timeout` to send its
    /// frame and close the connection.
    pub async fn bind(
        addr: SocketAddr,
        max_frame_size: usize,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, max_frame_size, read_timeout, reads: JoinSet::new() })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

impl BeaconReceiver for TcpBeaconReceiver {
    /// Returns frames in completion order, not connection order.
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let read = read_frame(stream, peer, self.max_frame_size, self.read_timeout);
                    self.reads.spawn(read);
                },
                Some(read) = self.reads.join_next() => {
                    return read.map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
                },
            }
        }
    }
}

async fn read_frame(
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_size: usize,
    deadline: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut frame = Vec::new();
    let mut limited = stream.take(max_frame_size as u64 + 1);

    timeout(deadline, limited.read_to_end(&mut frame))
        .await
        .map_err(|_| TransportError::ReadTimeout { peer })??;

    if frame.len() > max_frame_size {
        return Err(TransportError::FrameTooLarge { max: max_frame_size });
    }

    trace!(%peer, len = frame.len(), "received frame");
    Ok(frame)
}

/// Control-plane client over TCP.
#[derive(Debug, Clone)]
pub struct TcpControlPlane {
    addr: SocketAddr,
}

impl TcpControlPlane {
    /// Client for the server at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn exchange(&self, request: &ControlRequest) -> Result<ControlResponse, ControlPlaneError> {
        let mut buf = BytesMut::new();
        request.encode(&mut buf)?;

        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&buf).await?;

        let body = read_message_body(&mut stream).await?;
        Ok(decode_body(&body)?)
    }
}

impl ControlPlane for TcpControlPlane {
    async fn refresh(&self) -> Result<Vec<DiagnosisKey>, ControlPlaneError> {
        match self.exchange(&ControlRequest::Refresh).await? {
            ControlResponse::DiagnosisKeys(keys) => {
                debug!(keys = keys.len(), "fetched diagnosis keys");
                Ok(keys)
            },
            other => Err(ControlPlaneError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn upload(&self, otp: &str, keys: Vec<DiagnosisKey>) -> Result<bool, ControlPlaneError> {
        let request = ControlRequest::Upload { otp: otp.to_string(), keys };

        match self.exchange(&request).await? {
            ControlResponse::UploadAccepted(accepted) => Ok(accepted),
            ControlResponse::DiagnosisKeys(keys) => Err(ControlPlaneError::UnexpectedResponse(
                format!("{} diagnosis keys in reply to upload", keys.len()),
            )),
        }
    }
}

/// Read one length-prefixed control message and return its body.
///
/// The prefix is validated before the body is buffered.
pub async fn read_message_body<R>(reader: &mut R) -> Result<Vec<u8>, ControlPlaneError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;

    let len = body_len(prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(body)
}
