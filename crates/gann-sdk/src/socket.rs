//! The socket capability set the signaling channel depends on.
//!
//! The channel core never touches a concrete WebSocket type; it consumes
//! lifecycle events from a stream and drives the socket through this trait.
//! Production binds the tungstenite adapter in [`crate::ws`]; tests bind a
//! scripted in-memory socket.

use tokio::sync::mpsc;

use crate::error::Result;

/// Lifecycle events a socket adapter reports to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket finished connecting and may be written to.
    Open,
    /// A complete inbound text frame.
    Message(String),
    /// A transport error; the channel classifies it as terminal or not.
    Error(String),
    /// The socket closed.
    Closed {
        /// Close code, when the peer supplied one.
        code: Option<u16>,
        /// Close reason, when the peer supplied one.
        reason: Option<String>,
    },
}

/// Coarse socket state, mirroring what host socket APIs expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Connection in progress.
    Connecting,
    /// Writable.
    Open,
    /// Closed or closing.
    Closed,
}

/// Receiving half of a socket adapter: the channel owns this exclusively.
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// Operations the channel performs against a socket.
///
/// `send` must not suspend the caller; adapters queue the frame and complete
/// the write on their own task.
pub trait SignalingSocket: Send + Sync + 'static {
    /// Queues one text frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket can no longer accept frames.
    fn send(&self, text: String) -> Result<()>;

    /// Initiates close with an optional code and reason. Idempotent.
    fn close(&self, code: Option<u16>, reason: Option<&str>);

    /// Current coarse state.
    fn ready_state(&self) -> ReadyState;
}
