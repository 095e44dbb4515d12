mod common;

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use common::*;
use gann_common::event::{SignalingEvent, SignalingPayload};
use gann_common::QuicRelayInfo;
use gann_sdk::error::Error;
use gann_sdk::options::{AcceptOptions, DialOptions, DirectPolicy};
use gann_sdk::session::{SessionHandle, SessionMode};
use gann_sdk::{accept, dial, respond};

fn dial_opts(direct_timeout_ms: u64) -> DialOptions {
    DialOptions {
        direct_timeout_ms,
        token: Some("tok-1".to_string()),
        ..DialOptions::default()
    }
}

fn relay_info(session_id: &str) -> QuicRelayInfo {
    QuicRelayInfo {
        session_id: session_id.to_string(),
        quic_addr: "127.0.0.1:7000".to_string(),
        server_fingerprint_sha256: "ab".repeat(32),
        alpn: None,
        server_name: None,
    }
}

fn relay_event(session_id: &str, from: &str, to: &str) -> SignalingEvent {
    SignalingEvent {
        session_id: session_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        expires_at: Utc::now(),
        payload: SignalingPayload::QuicRelay {
            relay: relay_info(session_id),
        },
    }
}

fn offer_event(session_id: &str, from: &str, to: &str) -> SignalingEvent {
    SignalingEvent {
        session_id: session_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        expires_at: Utc::now(),
        payload: SignalingPayload::QuicOffer {
            offer: serde_json::to_value(test_offer()).unwrap(),
        },
    }
}

// Happy direct path: relay info arrives just before the handshake, carrying
// the session id the directory assigned.
#[tokio::test]
async fn initiator_prefers_direct_and_learns_session_id_from_relay_event() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Resolve(Duration::from_millis(30)),
        DirectBehavior::Pending,
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        feeder.deliver_json(&relay_event_frame("S1", "peer-A", "agent-1"));
    });

    let handle = dial(&channel, &factory, "peer-A", &dial_opts(5_000))
        .await
        .unwrap();

    assert_eq!(handle.mode(), SessionMode::Direct);
    assert_eq!(handle.session_id(), "S1");
    assert_eq!(handle.peer_agent_id(), "peer-A");
    assert!(handle.peer_ready());

    let frames = script.sent_json();
    assert_eq!(frames.len(), 1, "exactly one outbound quic_offer");
    assert_eq!(frames[0]["payload"]["kind"], "quic_offer");
    assert!(frames[0].get("session_id").is_none());
}

// Any-address candidates advertised by the endpoint must reach the peer as
// loopback addresses.
#[tokio::test]
async fn initiator_offer_carries_normalized_candidates() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Resolve(Duration::from_millis(10)),
        DirectBehavior::Pending,
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        feeder.deliver_json(&relay_event_frame("S1", "peer-A", "agent-1"));
    });

    let mut opts = dial_opts(5_000);
    opts.advertised_candidates = Some(vec![
        "0.0.0.0:4433".to_string(),
        "[::]:4433".to_string(),
        "198.51.100.7:4433".to_string(),
    ]);
    dial(&channel, &factory, "peer-A", &opts).await.unwrap();

    let frames = script.sent_json();
    assert_eq!(
        frames[0]["payload"]["offer"]["candidates"],
        json!(["127.0.0.1:4433", "[::1]:4433", "198.51.100.7:4433"])
    );
}

// Relay fallback: the direct accept never lands, the bind needs three tries.
#[tokio::test]
async fn initiator_falls_back_to_relay_and_retries_bind() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(DirectBehavior::Pending, DirectBehavior::Pending);
    factory.script_binds([false, false, true]);

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        feeder.deliver_json(&relay_event_frame("S2", "peer-A", "agent-1"));
    });

    let started = Instant::now();
    let handle = dial(&channel, &factory, "peer-A", &dial_opts(150))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(handle.mode(), SessionMode::Relay);
    assert_eq!(handle.session_id(), "S2");
    assert!(handle.peer_ready());
    assert!(
        elapsed >= Duration::from_millis(200),
        "two retries at 100ms spacing take at least 200ms, took {elapsed:?}"
    );

    let binds = factory.bind_calls();
    assert_eq!(binds.len(), 3);
    assert_eq!(binds.last().unwrap(), &("tok-1".to_string(), "S2".to_string()));
    let SessionHandle::Relay { token, peer_ready, .. } = &handle else {
        panic!("expected relay handle");
    };
    assert_eq!(token, "tok-1");
    assert!(*peer_ready);
}

// A bind that never sees the peer is still a success: peer_ready=false.
#[tokio::test]
async fn initiator_returns_peer_ready_false_when_bind_never_succeeds() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Fail(Duration::from_millis(5)),
        DirectBehavior::Pending,
    );
    // Enough false results to outlast the 2s bind deadline.
    factory.script_binds(std::iter::repeat(false).take(64));

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.deliver_json(&relay_event_frame("S2b", "peer-A", "agent-1"));
    });

    let handle = dial(&channel, &factory, "peer-A", &dial_opts(100))
        .await
        .unwrap();
    assert_eq!(handle.mode(), SessionMode::Relay);
    assert!(!handle.peer_ready(), "peer_ready=false is a signal, not an error");
}

// Responder direct path with a relay event cached ahead of the offer.
#[tokio::test]
async fn responder_direct_sends_one_answer_with_mode_direct() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Pending,
        DirectBehavior::Resolve(Duration::from_millis(10)),
    );

    let handle = respond(
        &channel,
        &factory,
        offer_event("S3", "peer-A", "agent-1"),
        Some(relay_event("S3", "peer-A", "agent-1")),
        &dial_opts(5_000),
    )
    .await
    .unwrap();

    assert_eq!(handle.mode(), SessionMode::Direct);
    assert_eq!(handle.session_id(), "S3");

    let frames = script.sent_json();
    assert_eq!(frames.len(), 1, "exactly one quic_answer per negotiation");
    assert_eq!(frames[0]["payload"]["kind"], "quic_answer");
    assert_eq!(frames[0]["session_id"], "S3");
    assert_eq!(
        frames[0]["payload"]["answer"],
        json!({ "accepted": true, "mode": "direct" })
    );
}

// Responder relay path: connect fails, the relay event arrives later over
// the channel, one answer with mode=relay goes out after the bind.
#[tokio::test]
async fn responder_falls_back_to_relay_after_failed_connect() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Pending,
        DirectBehavior::Fail(Duration::from_millis(5)),
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        feeder.deliver_json(&relay_event_frame("S4", "peer-A", "agent-1"));
    });

    let handle = respond(
        &channel,
        &factory,
        offer_event("S4", "peer-A", "agent-1"),
        None,
        &dial_opts(200),
    )
    .await
    .unwrap();

    assert_eq!(handle.mode(), SessionMode::Relay);
    assert_eq!(handle.session_id(), "S4");
    assert!(handle.peer_ready());

    let frames = script.sent_json();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0]["payload"]["answer"],
        json!({ "accepted": true, "mode": "relay" })
    );
    assert_eq!(
        factory.bind_calls().last().unwrap(),
        &("tok-1".to_string(), "S4".to_string())
    );
}

// The acceptance dispatcher caches relay events that precede the offer.
#[tokio::test]
async fn accept_dispatcher_uses_relay_event_that_preceded_the_offer() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Pending,
        DirectBehavior::Fail(Duration::from_millis(5)),
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        feeder.deliver_json(&relay_event_frame("S8", "peer-A", "agent-1"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        feeder.deliver_json(&offer_event_frame("S8", "peer-A", "agent-1", &test_offer()));
    });

    let opts = AcceptOptions {
        offer_timeout_ms: 5_000,
        dial: dial_opts(100),
    };
    let handle = accept(&channel, &factory, &opts).await.unwrap();

    assert_eq!(handle.mode(), SessionMode::Relay);
    assert_eq!(handle.session_id(), "S8");
    assert_eq!(
        factory.relay_connects.lock().unwrap()[0].quic_addr,
        "127.0.0.1:7000",
        "the cached relay event supplies the coordinates"
    );
    assert_eq!(channel.listener_count(), 0, "no subscriptions survive accept");
}

// S6: the dispatcher times out with its documented message and leaves the
// channel clean.
#[tokio::test]
async fn accept_times_out_without_an_offer_and_unsubscribes() {
    let (channel, _script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(DirectBehavior::Pending, DirectBehavior::Pending);

    let opts = AcceptOptions {
        offer_timeout_ms: 100,
        dial: dial_opts(100),
    };
    let err = accept(&channel, &factory, &opts).await.unwrap_err();

    assert!(
        err.to_string().contains("Timed out waiting for quic_offer"),
        "got: {err}"
    );
    assert_eq!(channel.listener_count(), 0);
}

// Fatal case: the channel dies while the initiator is waiting on relay info
// with a failed direct path.
#[tokio::test]
async fn initiator_rejects_when_channel_closes_before_relay_info() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Fail(Duration::from_millis(10)),
        DirectBehavior::Pending,
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        feeder.deliver_close(Some(1006), Some("gone"));
    });

    let err = dial(&channel, &factory, "peer-A", &dial_opts(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelTerminated { .. }), "got: {err}");
}

// Open-question default: a direct connection without a session id is closed
// and the initiator falls through (here: to a relay wait that has already
// timed out).
#[tokio::test]
async fn missing_session_id_closes_direct_connection_under_default_policy() {
    let (channel, _script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Resolve(Duration::from_millis(10)),
        DirectBehavior::Pending,
    );

    let err = dial(&channel, &factory, "peer-A", &dial_opts(100))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NegotiationTimeout(_)), "got: {err}");
    assert_eq!(
        *factory.connections_closed.lock().unwrap(),
        1,
        "the viable direct connection must be closed, not leaked"
    );
}

#[tokio::test]
async fn missing_session_id_keeps_direct_connection_under_opt_in_policy() {
    let (channel, _script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Resolve(Duration::from_millis(10)),
        DirectBehavior::Pending,
    );

    let mut opts = dial_opts(100);
    opts.direct_policy = DirectPolicy::UseDirectWithoutSessionId;
    let handle = dial(&channel, &factory, "peer-A", &opts).await.unwrap();

    assert_eq!(handle.mode(), SessionMode::Direct);
    assert_eq!(handle.session_id(), "");
    assert_eq!(*factory.connections_closed.lock().unwrap(), 0);
}

#[tokio::test]
async fn dial_rejects_empty_peer_id() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(DirectBehavior::Pending, DirectBehavior::Pending);

    let err = dial(&channel, &factory, "   ", &dial_opts(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(script.sent_frames().is_empty());
}

// Session handles stay uniform across modes: relay sends go through the
// stored token and session id, and close is idempotent.
#[tokio::test]
async fn relay_session_handle_sends_under_its_token_and_closes_once() {
    let (channel, script) = open_channel("agent-1").await;
    let factory = MockTransportFactory::new(
        DirectBehavior::Fail(Duration::from_millis(5)),
        DirectBehavior::Pending,
    );

    let feeder = script.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.deliver_json(&relay_event_frame("S9", "peer-A", "agent-1"));
    });

    let handle = dial(&channel, &factory, "peer-A", &dial_opts(50))
        .await
        .unwrap();

    handle.send_payload(&json!({ "op": "ping" })).await.unwrap();
    let sends = factory.relay_sends.lock().unwrap().clone();
    assert_eq!(
        sends,
        vec![(
            "tok-1".to_string(),
            "S9".to_string(),
            json!({ "op": "ping" })
        )]
    );

    handle.close();
    handle.close();
    let err = handle.send_payload(&json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
