//! Negotiation options.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// How often a relay bind that returned `false` is retried.
pub const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long an initiator that already holds a direct connection waits for
/// the relay event carrying the directory-assigned session id.
pub const SESSION_ID_GRACE: Duration = Duration::from_secs(2);

/// What the initiator does when the session-id grace window elapses after a
/// successful direct connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectPolicy {
    /// Close the direct connection and fall through to the relay path.
    #[default]
    FallBackIfSessionIdMissing,
    /// Keep the direct connection and return it with an empty session id.
    UseDirectWithoutSessionId,
}

/// Options for the direct-first initiator ([`crate::dial::dial`]).
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Deadline for the direct QUIC accept/connect, in milliseconds.
    pub direct_timeout_ms: u64,
    /// Local UDP bind for the direct QUIC endpoint.
    pub direct_bind_addr: SocketAddr,
    /// Local UDP bind for the relay transport.
    pub relay_bind_addr: SocketAddr,
    /// Candidate overrides advertised in the offer instead of the endpoint's
    /// own address.
    pub advertised_candidates: Option<Vec<String>>,
    /// Bearer token for the relay bind; falls back to the channel token.
    pub token: Option<String>,
    /// X25519 public key advertised in the offer for end-to-end sealing.
    pub e2ee_pubkey_b64: Option<String>,
    /// Behaviour when the session id never arrives on a direct connection.
    pub direct_policy: DirectPolicy,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            direct_timeout_ms: 5_000,
            direct_bind_addr: "0.0.0.0:0".parse().expect("static addr"),
            relay_bind_addr: "0.0.0.0:0".parse().expect("static addr"),
            advertised_candidates: None,
            token: None,
            e2ee_pubkey_b64: None,
            direct_policy: DirectPolicy::default(),
        }
    }
}

impl DialOptions {
    /// Validates option values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero direct timeout.
    pub fn validate(&self) -> Result<()> {
        if self.direct_timeout_ms == 0 {
            return Err(Error::validation("direct_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Direct accept/connect deadline.
    #[must_use]
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    /// Deadline for the relay-info wait and the bind retry loop:
    /// `max(2s, direct timeout)`.
    #[must_use]
    pub fn relay_deadline(&self) -> Duration {
        self.direct_timeout().max(Duration::from_secs(2))
    }

    /// Deadline for the responder's relay-event wait:
    /// `max(10s, 5 × direct timeout)`.
    #[must_use]
    pub fn responder_relay_deadline(&self) -> Duration {
        (self.direct_timeout() * 5).max(Duration::from_secs(10))
    }
}

/// Options for the acceptance dispatcher ([`crate::accept::accept`]).
#[derive(Debug, Clone)]
pub struct AcceptOptions {
    /// How long to wait for the first inbound offer, in milliseconds.
    pub offer_timeout_ms: u64,
    /// Options applied to the responder once an offer arrives.
    pub dial: DialOptions,
}

impl Default for AcceptOptions {
    fn default() -> Self {
        Self {
            offer_timeout_ms: 30_000,
            dial: DialOptions::default(),
        }
    }
}

impl AcceptOptions {
    /// Validates option values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.offer_timeout_ms == 0 {
            return Err(Error::validation("offer_timeout_ms must be greater than 0"));
        }
        self.dial.validate()
    }

    /// Offer wait deadline.
    #[must_use]
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }
}
