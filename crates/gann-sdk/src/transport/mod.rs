//! The transport seam: traits mirroring the native QUIC/relay primitives.
//!
//! The negotiation core only sees these traits; [`quic`] binds them to quinn
//! and test harnesses bind scripted doubles.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gann_common::seal::{open_payload, seal_payload};
use gann_common::{QuicOffer, QuicRelayInfo};

use crate::error::{Error, Result};

pub mod quic;

/// One frame forwarded by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDataFrame {
    /// Session the frame belongs to.
    #[serde(default)]
    pub session_id: String,
    /// Sending agent id.
    #[serde(default)]
    pub from: String,
    /// Receiving agent id.
    #[serde(default)]
    pub to: String,
    /// Application payload (possibly a sealed envelope).
    #[serde(default)]
    pub payload: Value,
}

/// A bidirectional application stream.
#[async_trait]
pub trait BiStream: Send + Sync {
    /// Writes bytes to the send half.
    async fn write(&mut self, data: &[u8]) -> Result<()>;
    /// Finishes the send half; further writes fail.
    async fn finish(&mut self) -> Result<()>;
    /// Reads up to `max_bytes` (default 64 KiB); `None` signals FIN.
    async fn read(&mut self, max_bytes: Option<usize>) -> Result<Option<Vec<u8>>>;
}

/// An established peer-to-peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Opens a bidirectional stream towards the peer.
    async fn open_bi(&self) -> Result<Box<dyn BiStream>>;
    /// Accepts a peer-initiated bidirectional stream.
    async fn accept_bi(&self) -> Result<Box<dyn BiStream>>;
    /// Closes the connection. Idempotent.
    fn close(&self);
}

/// The listening side of a direct connection attempt.
#[async_trait]
pub trait PeerServer: Send + Sync {
    /// Builds the offer advertising this endpoint. Candidates are normalized
    /// so remote peers never receive an any-address.
    fn offer(&self, advertised_candidates: Option<&[String]>) -> QuicOffer;
    /// Waits for one peer to complete a handshake.
    async fn accept(&self) -> Result<Box<dyn PeerConnection>>;
    /// Stops listening. Idempotent.
    fn close(&self);
}

/// The dialing side of a direct connection attempt.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Dials the candidates in an offer until one handshake succeeds.
    async fn connect(&self, offer: &QuicOffer) -> Result<Box<dyn PeerConnection>>;
}

/// Dials relay coordinates into a relay transport.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Connects to the relay described by `relay`.
    async fn connect_transport(&self, relay: &QuicRelayInfo) -> Result<Box<dyn RelayTransport>>;
}

/// A connection to the directory-operated relay, scoped by session ids.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Registers this side of a session. Returns `true` iff the peer is
    /// already bound; `false` is a signal to retry.
    async fn relay_bind(&self, token: &str, session_id: &str) -> Result<bool>;

    /// Forwards a payload to the session peer. May block server-side until
    /// the peer binds.
    async fn relay_send(&self, token: &str, session_id: &str, payload: &Value) -> Result<()>;

    /// Receives the next frame forwarded to this side.
    async fn recv_relay_data(&self) -> Result<RelayDataFrame>;

    /// Seals a payload with the shared session key before forwarding it.
    async fn relay_send_e2ee(
        &self,
        token: &str,
        session_id: &str,
        shared_key: &[u8; 32],
        plaintext: &Value,
    ) -> Result<()> {
        let sealed = seal_payload(shared_key, session_id, plaintext)
            .map_err(Error::transport)?;
        self.relay_send(token, session_id, &sealed).await
    }

    /// Receives the next frame and opens its sealed payload.
    async fn recv_relay_data_e2ee(&self, shared_key: &[u8; 32]) -> Result<RelayDataFrame> {
        let mut frame = self.recv_relay_data().await?;
        frame.payload = open_payload(shared_key, &frame.session_id, &frame.payload)
            .map_err(Error::transport)?;
        Ok(frame)
    }

    /// Closes the relay connection. Idempotent.
    fn close(&self);
}

/// Creates transport endpoints for the negotiation core.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Binds a direct-path listener.
    async fn peer_server(&self, bind_addr: SocketAddr) -> Result<Box<dyn PeerServer>>;
    /// Binds a direct-path dialer.
    async fn peer_client(&self, bind_addr: SocketAddr) -> Result<Box<dyn PeerClient>>;
    /// Binds a relay dialer.
    async fn relay_client(&self, bind_addr: SocketAddr) -> Result<Box<dyn RelayClient>>;
}
