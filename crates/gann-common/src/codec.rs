//! Wire frame decoding and outbound command encoding.
//!
//! Inbound frames are UTF-8 JSON objects `{ "event": ..., "payload": {...} }`.
//! Decoding is deliberately lenient: unknown fields are ignored, missing
//! fields take their documented defaults, and timestamps may arrive as
//! RFC 3339 strings or numeric epochs. Frames that are not well-formed JSON
//! objects with a recognized `event` and a non-null object `payload` decode
//! to `None` and are dropped by the caller.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::event::{
    ControlAction, ControlDirective, HeartbeatBroadcast, ParsedEvent, SessionLifecycleEvent,
    SessionState, SignalingEvent, SignalingPayload,
};
use crate::offer::QuicRelayInfo;
use crate::types::{event_name, payload_kind};

/// Decodes one inbound text frame into a typed event.
///
/// Returns `None` for anything that must be silently dropped: invalid JSON,
/// non-object frames, unrecognized `event` values, and null or non-object
/// payloads.
#[must_use]
pub fn parse_frame(text: &str) -> Option<ParsedEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    let event = obj.get("event")?.as_str()?;
    let payload = obj.get("payload")?.as_object()?;

    match event {
        event_name::SIGNALING => Some(ParsedEvent::Signaling(decode_signaling(payload))),
        event_name::SESSION => Some(ParsedEvent::Session(decode_session(payload))),
        event_name::CONTROL => Some(ParsedEvent::Control(decode_control(payload))),
        event_name::HEARTBEAT => Some(ParsedEvent::Heartbeat(decode_heartbeat(payload))),
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decodes a timestamp that may be an RFC 3339 string or a numeric epoch
/// (seconds, or milliseconds when implausibly large for seconds). Anything
/// else defaults to now.
fn decode_instant(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        Some(Value::Number(n)) => {
            let epoch = n.as_f64().unwrap_or(f64::NAN);
            let parsed = if !epoch.is_finite() {
                None
            } else if epoch.abs() >= 1e12 {
                DateTime::from_timestamp_millis(epoch as i64)
            } else {
                DateTime::from_timestamp(epoch as i64, 0)
            };
            parsed.unwrap_or_else(Utc::now)
        }
        _ => Utc::now(),
    }
}

fn decode_signaling(obj: &Map<String, Value>) -> SignalingEvent {
    SignalingEvent {
        session_id: str_field(obj, "session_id"),
        from: str_field(obj, "from"),
        to: str_field(obj, "to"),
        expires_at: decode_instant(obj.get("expires_at")),
        payload: decode_signaling_payload(obj.get("payload")),
    }
}

/// Extracts the nested blob for a QUIC payload kind: first the kind-named
/// key, then `payload`, then the whole object. Server variations move the
/// blob between these spots and none of them may lose information.
fn nested_blob(inner: &Map<String, Value>, key: &str) -> Value {
    if let Some(v) = inner.get(key).filter(|v| !v.is_null()) {
        return v.clone();
    }
    if let Some(v) = inner.get("payload").filter(|v| !v.is_null()) {
        return v.clone();
    }
    Value::Object(inner.clone())
}

fn decode_signaling_payload(payload: Option<&Value>) -> SignalingPayload {
    let Some(inner) = payload.and_then(Value::as_object) else {
        return SignalingPayload::Reject {
            reason: "unknown".to_string(),
        };
    };
    let kind = inner
        .get("kind")
        .or_else(|| inner.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match kind.as_str() {
        payload_kind::QUIC_OFFER => SignalingPayload::QuicOffer {
            offer: nested_blob(inner, "offer"),
        },
        payload_kind::QUIC_ANSWER => SignalingPayload::QuicAnswer {
            answer: nested_blob(inner, "answer"),
        },
        payload_kind::QUIC_CANDIDATE => SignalingPayload::QuicCandidate {
            candidate: nested_blob(inner, "candidate"),
        },
        payload_kind::QUIC_RELAY => {
            let blob = nested_blob(inner, "relay");
            let relay: QuicRelayInfo = serde_json::from_value(blob).unwrap_or_default();
            SignalingPayload::QuicRelay { relay }
        }
        payload_kind::DISCONNECT => SignalingPayload::Disconnect {
            reason: opt_str_field(inner, "reason"),
        },
        _ => SignalingPayload::Reject {
            reason: opt_str_field(inner, "reason").unwrap_or_else(|| "unknown".to_string()),
        },
    }
}

fn decode_session(obj: &Map<String, Value>) -> SessionLifecycleEvent {
    let state = match obj
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "active" => SessionState::Active,
        "terminated" => SessionState::Terminated,
        _ => SessionState::Pending,
    };
    SessionLifecycleEvent {
        session_id: str_field(obj, "session_id"),
        target_agent: str_field(obj, "target_agent"),
        peer_agent: str_field(obj, "peer_agent"),
        state,
        expires_at: decode_instant(obj.get("expires_at")),
        reason: opt_str_field(obj, "reason"),
    }
}

fn decode_control(obj: &Map<String, Value>) -> ControlDirective {
    let action = match obj
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "disconnect" => ControlAction::Disconnect,
        "timeout" => ControlAction::Timeout,
        "kill_switch" => ControlAction::KillSwitch,
        _ => ControlAction::Reject,
    };
    ControlDirective {
        target_agent: str_field(obj, "target_agent"),
        action,
        reason: str_field(obj, "reason"),
        session_id: opt_str_field(obj, "session_id"),
    }
}

fn decode_heartbeat(obj: &Map<String, Value>) -> HeartbeatBroadcast {
    HeartbeatBroadcast {
        agent_id: str_field(obj, "agent_id"),
        timestamp: decode_instant(obj.get("timestamp")),
        load: obj
            .get("load")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        status: str_field(obj, "status"),
    }
}

/// Payload of an outbound signal command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// Advertise QUIC parameters to a peer.
    QuicOffer {
        /// Opaque offer blob.
        offer: Value,
    },
    /// Answer a previously received offer.
    QuicAnswer {
        /// Opaque answer blob.
        answer: Value,
    },
    /// Forward a candidate hint.
    QuicCandidate {
        /// Opaque candidate blob.
        candidate: Value,
    },
    /// Tear a session down.
    Disconnect {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}

impl CommandPayload {
    /// The wire discriminant for this payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuicOffer { .. } => payload_kind::QUIC_OFFER,
            Self::QuicAnswer { .. } => payload_kind::QUIC_ANSWER,
            Self::QuicCandidate { .. } => payload_kind::QUIC_CANDIDATE,
            Self::Disconnect { .. } => payload_kind::DISCONNECT,
        }
    }
}

/// An outbound `{ "type": "signal" }` command.
///
/// `session_id` is `None` exactly for offers: the directory assigns the
/// session id when it forwards the offer to the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCommand {
    /// Session scope; absent for offers.
    pub session_id: Option<String>,
    /// Target agent id.
    pub to: String,
    /// The command payload.
    pub payload: CommandPayload,
}

impl SignalCommand {
    /// An offer command (no session id; the directory assigns one).
    #[must_use]
    pub fn quic_offer(to: impl Into<String>, offer: Value) -> Self {
        Self {
            session_id: None,
            to: to.into(),
            payload: CommandPayload::QuicOffer { offer },
        }
    }

    /// An answer command on an established session.
    #[must_use]
    pub fn quic_answer(session_id: impl Into<String>, to: impl Into<String>, answer: Value) -> Self {
        Self {
            session_id: Some(session_id.into()),
            to: to.into(),
            payload: CommandPayload::QuicAnswer { answer },
        }
    }

    /// A candidate hint on an established session.
    #[must_use]
    pub fn quic_candidate(
        session_id: impl Into<String>,
        to: impl Into<String>,
        candidate: Value,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            to: to.into(),
            payload: CommandPayload::QuicCandidate { candidate },
        }
    }

    /// A session teardown command.
    #[must_use]
    pub fn disconnect(
        session_id: impl Into<String>,
        to: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            to: to.into(),
            payload: CommandPayload::Disconnect { reason },
        }
    }

    /// Serializes the command to its wire JSON shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("kind".to_string(), json!(self.payload.kind()));
        match &self.payload {
            CommandPayload::QuicOffer { offer } => {
                payload.insert("offer".to_string(), offer.clone());
            }
            CommandPayload::QuicAnswer { answer } => {
                payload.insert("answer".to_string(), answer.clone());
            }
            CommandPayload::QuicCandidate { candidate } => {
                payload.insert("candidate".to_string(), candidate.clone());
            }
            CommandPayload::Disconnect { reason } => {
                if let Some(reason) = reason {
                    payload.insert("reason".to_string(), json!(reason));
                }
            }
        }

        let mut frame = Map::new();
        frame.insert("type".to_string(), json!("signal"));
        if let Some(session_id) = &self.session_id {
            frame.insert("session_id".to_string(), json!(session_id));
        }
        frame.insert("to".to_string(), json!(self.to));
        frame.insert("payload".to_string(), Value::Object(payload));
        Value::Object(frame)
    }

    /// Serializes the command to a wire text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    /// Parses a wire JSON value back into a command.
    ///
    /// Used by test doubles standing in for the directory; returns `None`
    /// when the value is not a well-formed signal command.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("type")?.as_str()? != "signal" {
            return None;
        }
        let session_id = obj
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let to = obj.get("to")?.as_str()?.to_string();
        let payload_obj = obj.get("payload")?.as_object()?;
        let kind = payload_obj.get("kind")?.as_str()?;
        let payload = match kind {
            payload_kind::QUIC_OFFER => CommandPayload::QuicOffer {
                offer: payload_obj.get("offer").cloned()?,
            },
            payload_kind::QUIC_ANSWER => CommandPayload::QuicAnswer {
                answer: payload_obj.get("answer").cloned()?,
            },
            payload_kind::QUIC_CANDIDATE => CommandPayload::QuicCandidate {
                candidate: payload_obj.get("candidate").cloned()?,
            },
            payload_kind::DISCONNECT => CommandPayload::Disconnect {
                reason: payload_obj
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => return None,
        };
        Some(Self {
            session_id,
            to,
            payload,
        })
    }
}
