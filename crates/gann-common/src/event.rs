//! The signaling data model: typed views of the four inbound event families.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::offer::QuicRelayInfo;
use crate::types::payload_kind;

/// Payload of a signaling event, keyed by the wire `kind` discriminant.
///
/// Offer, answer and candidate blobs are opaque to the signaling layer; they
/// are interpreted by the transport. Relay coordinates are typed because the
/// negotiation core needs the session id and address out of them.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingPayload {
    /// Initiator-advertised QUIC parameters.
    QuicOffer {
        /// Opaque offer blob (candidates, cert, fingerprint, ALPN, ...).
        offer: Value,
    },
    /// Accept/reject reply carrying the chosen mode.
    QuicAnswer {
        /// Opaque answer blob.
        answer: Value,
    },
    /// Additional candidate hint (reserved; passed through untouched).
    QuicCandidate {
        /// Opaque candidate blob.
        candidate: Value,
    },
    /// Directory-provided relay coordinates.
    QuicRelay {
        /// Typed relay coordinates.
        relay: QuicRelayInfo,
    },
    /// Peer-initiated teardown.
    Disconnect {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
    /// Directory-initiated refusal. Unknown payload kinds also land here.
    Reject {
        /// Refusal reason, `"unknown"` when the wire carried none.
        reason: String,
    },
}

impl SignalingPayload {
    /// The wire discriminant for this payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuicOffer { .. } => payload_kind::QUIC_OFFER,
            Self::QuicAnswer { .. } => payload_kind::QUIC_ANSWER,
            Self::QuicCandidate { .. } => payload_kind::QUIC_CANDIDATE,
            Self::QuicRelay { .. } => payload_kind::QUIC_RELAY,
            Self::Disconnect { .. } => payload_kind::DISCONNECT,
            Self::Reject { .. } => payload_kind::REJECT,
        }
    }
}

/// A signaling event delivered from the directory to this agent.
///
/// `session_id` may be empty only for `QuicOffer` payloads: the directory
/// assigns the id before forwarding the offer and echoes it on the relay
/// event, so the initiator learns it from there.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingEvent {
    /// Directory-assigned session scope (may be empty for offers).
    pub session_id: String,
    /// Sending agent id.
    pub from: String,
    /// Receiving agent id (this agent).
    pub to: String,
    /// When the directory considers this event stale.
    pub expires_at: DateTime<Utc>,
    /// The typed payload.
    pub payload: SignalingPayload,
}

/// Lifecycle state of a session as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Negotiation in progress.
    Pending,
    /// Both peers bound, payload may flow.
    Active,
    /// Session torn down.
    Terminated,
}

/// A session lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLifecycleEvent {
    /// Session the notification refers to.
    pub session_id: String,
    /// Agent the notification targets.
    pub target_agent: String,
    /// The other participant.
    pub peer_agent: String,
    /// Reported state.
    pub state: SessionState,
    /// When the notification goes stale.
    pub expires_at: DateTime<Utc>,
    /// Optional reason (termination cause, ...).
    pub reason: Option<String>,
}

/// Directory control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Refuse an operation.
    Reject,
    /// Tear down a session or connection.
    Disconnect,
    /// An operation exceeded its deadline.
    Timeout,
    /// Emergency stop for the target agent.
    KillSwitch,
}

/// A control directive from the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDirective {
    /// Agent the directive targets.
    pub target_agent: String,
    /// What the directory wants done.
    pub action: ControlAction,
    /// Human-readable reason.
    pub reason: String,
    /// Session scope, when the directive is session-bound.
    pub session_id: Option<String>,
}

/// A heartbeat broadcast from another agent.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatBroadcast {
    /// Broadcasting agent.
    pub agent_id: String,
    /// When the heartbeat was taken.
    pub timestamp: DateTime<Utc>,
    /// Reported load, clamped to `[0, 1]`.
    pub load: f64,
    /// Free-form status string.
    pub status: String,
}

/// A fully decoded inbound frame, one variant per event family.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// `event: "signaling"`
    Signaling(SignalingEvent),
    /// `event: "session"`
    Session(SessionLifecycleEvent),
    /// `event: "control"`
    Control(ControlDirective),
    /// `event: "heartbeat"`
    Heartbeat(HeartbeatBroadcast),
}
