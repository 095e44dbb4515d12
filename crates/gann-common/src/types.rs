//! Identifier handling, bearer tokens and protocol constants.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Inbound frame event families recognized by the wire codec.
pub mod event_name {
    /// Peer-to-peer signaling traffic (offers, answers, relay info, ...).
    pub const SIGNALING: &str = "signaling";
    /// Session lifecycle notifications from the directory.
    pub const SESSION: &str = "session";
    /// Directory control directives (reject, disconnect, kill switch).
    pub const CONTROL: &str = "control";
    /// Peer heartbeat broadcasts.
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Signaling payload discriminants as they appear on the wire.
pub mod payload_kind {
    /// Initiator-advertised QUIC parameters.
    pub const QUIC_OFFER: &str = "quic_offer";
    /// Accept/reject reply carrying the chosen mode.
    pub const QUIC_ANSWER: &str = "quic_answer";
    /// Additional candidate hint (reserved).
    pub const QUIC_CANDIDATE: &str = "quic_candidate";
    /// Directory-provided relay coordinates.
    pub const QUIC_RELAY: &str = "quic_relay";
    /// Peer-initiated teardown.
    pub const DISCONNECT: &str = "disconnect";
    /// Directory-initiated refusal.
    pub const REJECT: &str = "reject";
}

/// Trims an agent or session identifier and rejects empty values.
///
/// Identifiers are opaque strings; equality is byte-identical after trimming
/// surrounding whitespace, so every API boundary funnels through here.
#[must_use]
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Errors raised while constructing a [`Token`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token value was empty after trimming.
    #[error("token value is empty")]
    EmptyValue,
    /// The expiry timestamp could not be parsed as RFC 3339.
    #[error("invalid expires_at timestamp: {0:?}")]
    InvalidExpiry(String),
}

/// A short-lived signaling bearer token issued by the directory.
///
/// Immutable once constructed; any copy may be used. One token is normally
/// shared between the signaling channel and the relay bind call for a single
/// session lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
    raw_expires_at: String,
}

impl Token {
    /// Builds a token from the directory response fields.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the value is empty or the timestamp does not
    /// parse; both are surfaced at issue time rather than on first use.
    pub fn new(value: impl Into<String>, raw_expires_at: impl Into<String>) -> Result<Self, TokenError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(TokenError::EmptyValue);
        }
        let raw_expires_at = raw_expires_at.into();
        let expires_at = DateTime::parse_from_rfc3339(&raw_expires_at)
            .map_err(|_| TokenError::InvalidExpiry(raw_expires_at.clone()))?
            .with_timezone(&Utc);
        Ok(Self {
            value,
            expires_at,
            raw_expires_at,
        })
    }

    /// The bearer value sent to the directory and the relay.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Parsed expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The expiry timestamp exactly as the directory sent it.
    #[must_use]
    pub fn raw_expires_at(&self) -> &str {
        &self.raw_expires_at
    }

    /// Whether the token has already expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
