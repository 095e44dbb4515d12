//! The direct-first initiator: offer, race direct accept against relay
//! info, resolve to a single transport.

use tracing::{debug, info, warn};

use gann_common::event::{SignalingEvent, SignalingPayload};
use gann_common::types::normalize_id;

use crate::channel::SignalingChannel;
use crate::error::{Error, Result};
use crate::options::{DialOptions, DirectPolicy, BIND_RETRY_INTERVAL, SESSION_ID_GRACE};
use crate::session::SessionHandle;
use crate::transport::TransportFactory;
use crate::wait::SignalingWaiter;

/// Negotiates a session towards `peer_agent_id` over an already-ready
/// signaling channel.
///
/// A local listener is started and its offer sent through the channel, then
/// two waits run concurrently without cancelling each other: the direct
/// QUIC accept (bounded by the direct timeout) and the directory's relay
/// event (bounded by `max(2s, direct timeout)`). Direct wins ties; a failed
/// direct path falls through to the relay silently.
///
/// # Errors
///
/// The only fatal outcomes are the signaling channel dying before relay
/// info arrives while the direct path has failed, and relay-path transport
/// failures. Everything else converges to a returned [`SessionHandle`].
pub async fn dial(
    channel: &SignalingChannel,
    transport: &dyn TransportFactory,
    peer_agent_id: &str,
    opts: &DialOptions,
) -> Result<SessionHandle> {
    let peer = normalize_id(peer_agent_id)
        .ok_or_else(|| Error::validation("peer agent id must not be empty"))?;
    opts.validate()?;
    let token = opts
        .token
        .clone()
        .or_else(|| channel.token().map(|t| t.value().to_string()))
        .unwrap_or_default();

    let server = transport.peer_server(opts.direct_bind_addr).await?;
    let mut offer = server.offer(opts.advertised_candidates.as_deref());
    if let Some(pubkey) = &opts.e2ee_pubkey_b64 {
        offer.e2ee_pubkey_b64 = Some(pubkey.clone());
    }

    // Subscribed before the offer goes out, so the relay event cannot slip
    // past between send and wait.
    let mut waiter = SignalingWaiter::subscribe(channel);
    let offer_value = serde_json::to_value(&offer).map_err(Error::transport)?;
    channel.send_quic_offer(&peer, offer_value)?;
    debug!(peer = %peer, candidates = offer.candidates.len(), "offer sent");

    let accept_fut = tokio::time::timeout(opts.direct_timeout(), server.accept());
    tokio::pin!(accept_fut);

    let relay_peer = peer.clone();
    let relay_fut = waiter.next_matching(opts.relay_deadline(), "signaling event", move |ev| {
        ev.from == relay_peer && matches!(ev.payload, SignalingPayload::QuicRelay { .. })
    });
    tokio::pin!(relay_fut);

    // Neither wait cancels the other: a relay event arriving first parks in
    // `relay_outcome` while the direct accept runs to its own deadline.
    let mut relay_outcome: Option<Result<SignalingEvent>> = None;
    let accept_outcome = loop {
        tokio::select! {
            accepted = &mut accept_fut => {
                break match accepted {
                    Ok(Ok(connection)) => Ok(connection),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::timeout("direct QUIC accept")),
                };
            }
            relay = &mut relay_fut, if relay_outcome.is_none() => {
                relay_outcome = Some(relay);
            }
        }
    };

    match accept_outcome {
        Ok(connection) => {
            // The peer's answer will reference the directory-assigned id,
            // which only the relay event carries; grant it a short grace.
            let grace_settled = match relay_outcome {
                Some(result) => Some(result),
                None => match tokio::time::timeout(SESSION_ID_GRACE, &mut relay_fut).await {
                    Ok(result) => Some(result),
                    Err(_) => None,
                },
            };

            if let Some(Ok(event)) = &grace_settled {
                let session_id = relay_session_id(event);
                if !session_id.is_empty() {
                    info!(%session_id, peer = %peer, "direct session established");
                    return Ok(SessionHandle::direct(session_id, peer, connection));
                }
            }

            match opts.direct_policy {
                DirectPolicy::UseDirectWithoutSessionId => {
                    warn!(peer = %peer, "session id undetermined, keeping direct connection");
                    Ok(SessionHandle::direct(String::new(), peer, connection))
                }
                DirectPolicy::FallBackIfSessionIdMissing => {
                    // Without the directory-assigned id the direct connection
                    // cannot be correlated with the session.
                    connection.close();
                    debug!(peer = %peer, "session id undetermined, falling back to relay");
                    let event = match grace_settled {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => return Err(e),
                        None => relay_fut.await.map_err(|e| match e {
                            Error::NegotiationTimeout(_) => Error::timeout("session id"),
                            other => other,
                        })?,
                    };
                    connect_relay(transport, &event, &peer, &token, opts).await
                }
            }
        }
        Err(direct_error) => {
            debug!(peer = %peer, error = %direct_error, "direct accept failed, using relay");
            let event = match relay_outcome {
                Some(result) => result?,
                None => relay_fut.await?,
            };
            connect_relay(transport, &event, &peer, &token, opts).await
        }
    }
}

/// Connects the relay transport named by a relay event and binds the
/// session, polling every 100 ms while the peer side is not yet bound.
///
/// `peer_ready: false` on the returned handle is not an error; it means the
/// bind deadline elapsed with the peer still absent.
pub(crate) async fn connect_relay(
    transport: &dyn TransportFactory,
    event: &SignalingEvent,
    peer_agent_id: &str,
    token: &str,
    opts: &DialOptions,
) -> Result<SessionHandle> {
    let SignalingPayload::QuicRelay { relay } = &event.payload else {
        return Err(Error::validation("event does not carry relay coordinates"));
    };
    let mut relay = relay.clone();
    if relay.session_id.trim().is_empty() {
        relay.session_id = event.session_id.clone();
    }
    let session_id = normalize_id(&relay.session_id)
        .ok_or_else(|| Error::validation("relay event carries no session id"))?;

    let client = transport.relay_client(opts.relay_bind_addr).await?;
    let relay_transport = client.connect_transport(&relay).await?;

    let deadline = tokio::time::Instant::now() + opts.relay_deadline();
    let mut peer_ready = relay_transport.relay_bind(token, &session_id).await?;
    while !peer_ready && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(BIND_RETRY_INTERVAL).await;
        peer_ready = relay_transport.relay_bind(token, &session_id).await?;
    }

    info!(%session_id, peer_ready, "relay session established");
    Ok(SessionHandle::relay(
        session_id,
        peer_agent_id.to_string(),
        relay,
        relay_transport,
        peer_ready,
        token.to_string(),
    ))
}

fn relay_session_id(event: &SignalingEvent) -> String {
    if let SignalingPayload::QuicRelay { relay } = &event.payload {
        if let Some(session_id) = normalize_id(&relay.session_id) {
            return session_id;
        }
    }
    normalize_id(&event.session_id).unwrap_or_default()
}
