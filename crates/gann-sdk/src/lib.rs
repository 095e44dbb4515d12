//! GANN client SDK — signaling channel and direct-first QUIC session
//! negotiation with transparent relay fallback.
//!
//! An agent opens one [`channel::SignalingChannel`] against the directory,
//! then either [`dial::dial`]s a peer or [`accept::accept`]s inbound offers.
//! Negotiation races a direct QUIC connection against the directory's relay
//! path and returns a [`session::SessionHandle`] over whichever transport
//! won.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Acceptance dispatcher and responder protocol.
pub mod accept;
/// Signaling channel lifecycle, send queue and event dispatch.
pub mod channel;
/// High-level connect helper tying token, URL and channel together.
pub mod client;
/// Direct-first initiator protocol.
pub mod dial;
/// Typed multi-listener event fan-out.
pub mod emitter;
/// SDK error kinds.
pub mod error;
/// Negotiation options and timing policy.
pub mod options;
/// Session handles over either transport.
pub mod session;
/// The socket capability set the channel depends on.
pub mod socket;
/// Signaling token acquisition and socket URL derivation.
pub mod token;
/// Transport seam traits and the quinn-backed implementation.
pub mod transport;
/// tokio-tungstenite socket adapter.
pub mod ws;

mod wait;

pub use accept::{accept, respond};
pub use channel::SignalingChannel;
pub use client::connect_signaling;
pub use dial::dial;
pub use emitter::{ChannelEvent, EventKind};
pub use error::{Error, Result};
pub use options::{AcceptOptions, DialOptions, DirectPolicy};
pub use session::{SessionHandle, SessionMode};
