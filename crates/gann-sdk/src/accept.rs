//! The responder side: the acceptance dispatcher and the direct-first
//! responder protocol.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, info};

use gann_common::event::{SignalingEvent, SignalingPayload};
use gann_common::types::normalize_id;
use gann_common::QuicOffer;

use crate::channel::SignalingChannel;
use crate::dial::connect_relay;
use crate::error::{Error, Result};
use crate::options::{AcceptOptions, DialOptions};
use crate::session::SessionHandle;
use crate::transport::TransportFactory;
use crate::wait::SignalingWaiter;

/// Waits for the next inbound offer and negotiates a session with its
/// sender.
///
/// Until the offer arrives, every relay event is cached by session id: the
/// directory may emit relay info before the offer reaches the application,
/// and a subscriber created later would miss it. The cache entry for the
/// offer's session rides along into the responder.
///
/// # Errors
///
/// Returns a timeout naming `quic_offer` when no offer arrives within
/// `offer_timeout_ms`, and rejects when the channel closes or errors. No
/// channel subscriptions survive any exit path.
pub async fn accept(
    channel: &SignalingChannel,
    transport: &dyn TransportFactory,
    opts: &AcceptOptions,
) -> Result<SessionHandle> {
    opts.validate()?;
    let mut waiter = SignalingWaiter::subscribe(channel);
    let deadline = tokio::time::Instant::now() + opts.offer_timeout();
    let mut relay_cache: HashMap<String, SignalingEvent> = HashMap::new();

    let offer_event = loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::timeout("quic_offer"));
        }
        let event = waiter.next_event(remaining, "quic_offer").await?;
        match &event.payload {
            SignalingPayload::QuicRelay { relay } => {
                let key = if relay.session_id.trim().is_empty() {
                    event.session_id.clone()
                } else {
                    relay.session_id.clone()
                };
                debug!(session_id = %key, "caching relay event ahead of offer");
                relay_cache.insert(key, event);
            }
            SignalingPayload::QuicOffer { .. } => break event,
            _ => {}
        }
    };

    let cached_relay = normalize_id(&offer_event.session_id)
        .and_then(|session_id| relay_cache.remove(&session_id));
    respond_with_waiter(channel, transport, offer_event, cached_relay, waiter, &opts.dial).await
}

/// Negotiates a session for one already-received offer.
///
/// `cached_relay` short-circuits the relay wait when the relay event for
/// this session was observed before the offer.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an event that is not a well-formed
/// offer, and relay-path failures once the direct attempt has failed.
pub async fn respond(
    channel: &SignalingChannel,
    transport: &dyn TransportFactory,
    offer_event: SignalingEvent,
    cached_relay: Option<SignalingEvent>,
    opts: &DialOptions,
) -> Result<SessionHandle> {
    let waiter = SignalingWaiter::subscribe(channel);
    respond_with_waiter(channel, transport, offer_event, cached_relay, waiter, opts).await
}

/// The responder protocol proper. The waiter is handed in by the caller so
/// relay events arriving while the direct connect is in flight are already
/// buffered.
async fn respond_with_waiter(
    channel: &SignalingChannel,
    transport: &dyn TransportFactory,
    offer_event: SignalingEvent,
    cached_relay: Option<SignalingEvent>,
    mut waiter: SignalingWaiter,
    opts: &DialOptions,
) -> Result<SessionHandle> {
    opts.validate()?;
    let SignalingPayload::QuicOffer { offer } = &offer_event.payload else {
        return Err(Error::validation("event does not carry a quic_offer"));
    };
    let session_id = normalize_id(&offer_event.session_id)
        .ok_or_else(|| Error::validation("offer event carries no session id"))?;
    let peer = normalize_id(&offer_event.from)
        .ok_or_else(|| Error::validation("offer event carries no sender"))?;
    let offer: QuicOffer = serde_json::from_value(offer.clone())
        .map_err(|e| Error::validation(format!("ill-formed quic offer: {e}")))?;
    let token = opts
        .token
        .clone()
        .or_else(|| channel.token().map(|t| t.value().to_string()))
        .unwrap_or_default();

    let client = transport.peer_client(opts.direct_bind_addr).await?;
    let attempt = tokio::time::timeout(opts.direct_timeout(), client.connect(&offer)).await;
    let direct_error = match attempt {
        Ok(Ok(connection)) => {
            channel.send_quic_answer(
                &session_id,
                &peer,
                json!({ "accepted": true, "mode": "direct" }),
            )?;
            info!(%session_id, peer = %peer, "direct session established");
            return Ok(SessionHandle::direct(session_id, peer, connection));
        }
        Ok(Err(e)) => e,
        Err(_) => Error::timeout("direct QUIC connect"),
    };
    debug!(%session_id, error = %direct_error, "direct connect failed, using relay");

    let relay_event = match cached_relay {
        Some(event) => event,
        None => {
            let wanted = session_id.clone();
            waiter
                .next_matching(
                    opts.responder_relay_deadline(),
                    "signaling event",
                    move |ev| {
                        matches!(&ev.payload, SignalingPayload::QuicRelay { relay }
                            if relay.session_id == wanted || ev.session_id == wanted)
                    },
                )
                .await?
        }
    };

    let handle = connect_relay(transport, &relay_event, &peer, &token, opts).await?;
    channel.send_quic_answer(
        &session_id,
        &peer,
        json!({ "accepted": true, "mode": "relay" }),
    )?;
    Ok(handle)
}
