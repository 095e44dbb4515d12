//! The session handle: a uniform view over either negotiated transport.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::debug;

use gann_common::QuicRelayInfo;

use crate::error::{Error, Result};
use crate::transport::{PeerConnection, RelayTransport};

const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Which transport a negotiation settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// End-to-end QUIC connection.
    Direct,
    /// Directory-operated relay.
    Relay,
}

/// An established session towards one peer.
///
/// The handle exclusively owns its transport resource; closing the handle
/// closes the resource. Closing the signaling channel does not close handles.
impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct {
                session_id,
                peer_agent_id,
                ..
            } => f
                .debug_struct("Direct")
                .field("session_id", session_id)
                .field("peer_agent_id", peer_agent_id)
                .finish_non_exhaustive(),
            Self::Relay {
                session_id,
                peer_agent_id,
                relay,
                peer_ready,
                ..
            } => f
                .debug_struct("Relay")
                .field("session_id", session_id)
                .field("peer_agent_id", peer_agent_id)
                .field("relay", relay)
                .field("peer_ready", peer_ready)
                .finish_non_exhaustive(),
        }
    }
}

pub enum SessionHandle {
    /// Direct QUIC session.
    Direct {
        /// Directory-assigned session id (may be empty under
        /// [`crate::options::DirectPolicy::UseDirectWithoutSessionId`]).
        session_id: String,
        /// The peer agent.
        peer_agent_id: String,
        /// The established connection.
        connection: Box<dyn PeerConnection>,
        /// Set once the handle has been closed.
        closed: AtomicBool,
    },
    /// Relay-mediated session.
    Relay {
        /// Directory-assigned session id.
        session_id: String,
        /// The peer agent.
        peer_agent_id: String,
        /// The relay coordinates this transport was dialed from.
        relay: QuicRelayInfo,
        /// The bound relay connection.
        transport: Box<dyn RelayTransport>,
        /// Whether the peer was already bound when negotiation returned.
        /// `false` is not an error: callers may wait it out or send
        /// best-effort.
        peer_ready: bool,
        /// Bearer used for the bind; reused for sends.
        token: String,
        /// Set once the handle has been closed.
        closed: AtomicBool,
    },
}

impl SessionHandle {
    pub(crate) fn direct(
        session_id: String,
        peer_agent_id: String,
        connection: Box<dyn PeerConnection>,
    ) -> Self {
        Self::Direct {
            session_id,
            peer_agent_id,
            connection,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn relay(
        session_id: String,
        peer_agent_id: String,
        relay: QuicRelayInfo,
        transport: Box<dyn RelayTransport>,
        peer_ready: bool,
        token: String,
    ) -> Self {
        Self::Relay {
            session_id,
            peer_agent_id,
            relay,
            transport,
            peer_ready,
            token,
            closed: AtomicBool::new(false),
        }
    }

    /// The transport this session settled on.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        match self {
            Self::Direct { .. } => SessionMode::Direct,
            Self::Relay { .. } => SessionMode::Relay,
        }
    }

    /// The directory-assigned session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Direct { session_id, .. } | Self::Relay { session_id, .. } => session_id,
        }
    }

    /// The peer agent id.
    #[must_use]
    pub fn peer_agent_id(&self) -> &str {
        match self {
            Self::Direct { peer_agent_id, .. } | Self::Relay { peer_agent_id, .. } => peer_agent_id,
        }
    }

    /// Whether the peer is known to be reachable right now. Always `true`
    /// for direct sessions.
    #[must_use]
    pub fn peer_ready(&self) -> bool {
        match self {
            Self::Direct { .. } => true,
            Self::Relay { peer_ready, .. } => *peer_ready,
        }
    }

    /// Sends one JSON payload to the peer.
    ///
    /// Direct sessions carry each payload on its own bidirectional stream;
    /// relay sessions forward through the relay under the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a closed handle and
    /// [`Error::Transport`] for transport failures.
    pub async fn send_payload(&self, payload: &Value) -> Result<()> {
        self.ensure_open()?;
        match self {
            Self::Direct { connection, .. } => {
                let mut stream = connection.open_bi().await?;
                let bytes = serde_json::to_vec(payload).map_err(Error::transport)?;
                stream.write(&bytes).await?;
                stream.finish().await
            }
            Self::Relay {
                transport,
                token,
                session_id,
                ..
            } => transport.relay_send(token, session_id, payload).await,
        }
    }

    /// Receives the next JSON payload from the peer.
    ///
    /// Returns `None` when a direct peer finishes a stream without data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a closed handle and
    /// [`Error::Transport`] for transport failures or non-JSON payloads.
    pub async fn recv_payload(&self) -> Result<Option<Value>> {
        self.ensure_open()?;
        match self {
            Self::Direct { connection, .. } => {
                let mut stream = connection.accept_bi().await?;
                let mut buffer = Vec::new();
                while let Some(chunk) = stream.read(None).await? {
                    if buffer.len() + chunk.len() > MAX_PAYLOAD_BYTES {
                        return Err(Error::transport("payload exceeds maximum size"));
                    }
                    buffer.extend_from_slice(&chunk);
                }
                if buffer.is_empty() {
                    return Ok(None);
                }
                serde_json::from_slice(&buffer)
                    .map(Some)
                    .map_err(Error::transport)
            }
            Self::Relay { transport, .. } => {
                let frame = transport.recv_relay_data().await?;
                Ok(Some(frame.payload))
            }
        }
    }

    /// Closes the underlying transport resource. Idempotent.
    pub fn close(&self) {
        let closed = match self {
            Self::Direct { closed, .. } | Self::Relay { closed, .. } => closed,
        };
        if closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session_id = self.session_id(), mode = ?self.mode(), "closing session handle");
        match self {
            Self::Direct { connection, .. } => connection.close(),
            Self::Relay { transport, .. } => transport.close(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        let closed = match self {
            Self::Direct { closed, .. } | Self::Relay { closed, .. } => closed,
        };
        if closed.load(Ordering::SeqCst) {
            return Err(Error::validation("session handle is closed"));
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
