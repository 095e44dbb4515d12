#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use gann_common::{QuicOffer, QuicRelayInfo};
use gann_sdk::channel::SignalingChannel;
use gann_sdk::error::{Error, Result};
use gann_sdk::socket::{ReadyState, SignalingSocket, SocketEvent, SocketEvents};
use gann_sdk::transport::{
    BiStream, PeerClient, PeerConnection, PeerServer, RelayClient, RelayDataFrame, RelayTransport,
    TransportFactory,
};

// ── Scripted socket ─────────────────────────────────────────────────

pub struct MockSocket {
    sent: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<ReadyState>>,
    closes: Arc<Mutex<Vec<(Option<u16>, Option<String>)>>>,
}

/// Test-side controller for a [`MockSocket`]: feed lifecycle events and
/// inspect everything the channel wrote.
#[derive(Clone)]
pub struct SocketScript {
    events: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<ReadyState>>,
    closes: Arc<Mutex<Vec<(Option<u16>, Option<String>)>>>,
}

pub fn mock_socket() -> (MockSocket, SocketEvents, SocketScript) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(Mutex::new(ReadyState::Connecting));
    let closes = Arc::new(Mutex::new(Vec::new()));
    let socket = MockSocket {
        sent: sent.clone(),
        state: state.clone(),
        closes: closes.clone(),
    };
    let script = SocketScript {
        events: event_tx,
        sent,
        state,
        closes,
    };
    (socket, event_rx, script)
}

impl SignalingSocket for MockSocket {
    fn send(&self, text: String) -> Result<()> {
        if *self.state.lock().unwrap() != ReadyState::Open {
            return Err(Error::Transport("websocket is not open".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        *self.state.lock().unwrap() = ReadyState::Closed;
        self.closes
            .lock()
            .unwrap()
            .push((code, reason.map(str::to_string)));
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }
}

impl SocketScript {
    /// Marks the socket open and delivers the `Open` lifecycle event.
    pub fn open(&self) {
        *self.state.lock().unwrap() = ReadyState::Open;
        let _ = self.events.send(SocketEvent::Open);
    }

    pub fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn deliver_text(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Message(text.into()));
    }

    pub fn deliver_json(&self, frame: &Value) {
        self.deliver_text(frame.to_string());
    }

    pub fn deliver_error(&self, message: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Error(message.into()));
    }

    pub fn deliver_close(&self, code: Option<u16>, reason: Option<&str>) {
        *self.state.lock().unwrap() = ReadyState::Closed;
        let _ = self.events.send(SocketEvent::Closed {
            code,
            reason: reason.map(str::to_string),
        });
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent_frames()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("sent frame must be JSON"))
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.closes.lock().unwrap().len()
    }
}

/// An open channel wired to a scripted socket.
pub async fn open_channel(agent_id: &str) -> (SignalingChannel, SocketScript) {
    let (socket, events, script) = mock_socket();
    let channel = SignalingChannel::open(agent_id, socket, events, None).unwrap();
    script.open();
    channel.ready().await.unwrap();
    (channel, script)
}

// ── Wire frame builders ─────────────────────────────────────────────

pub fn signaling_frame(session_id: &str, from: &str, to: &str, payload: Value) -> Value {
    json!({
        "event": "signaling",
        "payload": {
            "session_id": session_id,
            "from": from,
            "to": to,
            "expires_at": "2030-01-01T00:00:00Z",
            "payload": payload,
        }
    })
}

pub fn relay_event_frame(session_id: &str, from: &str, to: &str) -> Value {
    signaling_frame(
        session_id,
        from,
        to,
        json!({
            "kind": "quic_relay",
            "relay": {
                "session_id": session_id,
                "quic_addr": "127.0.0.1:7000",
                "server_fingerprint_sha256": "ab".repeat(32),
            }
        }),
    )
}

pub fn offer_event_frame(session_id: &str, from: &str, to: &str, offer: &QuicOffer) -> Value {
    signaling_frame(
        session_id,
        from,
        to,
        json!({
            "kind": "quic_offer",
            "offer": serde_json::to_value(offer).unwrap(),
        }),
    )
}

pub fn test_offer() -> QuicOffer {
    QuicOffer {
        candidates: vec!["127.0.0.1:4433".to_string()],
        cert_der_b64: "AAECAw==".to_string(),
        fingerprint_sha256: "cd".repeat(32),
        alpn: "gann-peer".to_string(),
        server_name: "gann-peer".to_string(),
        e2ee_pubkey_b64: None,
    }
}

// ── Scripted transport ──────────────────────────────────────────────

#[derive(Clone)]
pub enum DirectBehavior {
    /// Resolve with a connection after the delay.
    Resolve(Duration),
    /// Fail after the delay.
    Fail(Duration),
    /// Never resolve; the caller's timeout decides.
    Pending,
}

pub struct MockTransportFactory {
    pub accept: DirectBehavior,
    pub connect: DirectBehavior,
    /// Scripted results for successive `relay_bind` calls; exhausted
    /// entries yield `true`.
    pub bind_results: Arc<Mutex<VecDeque<bool>>>,
    pub bind_calls: Arc<Mutex<Vec<(String, String)>>>,
    pub relay_sends: Arc<Mutex<Vec<(String, String, Value)>>>,
    pub relay_connects: Arc<Mutex<Vec<QuicRelayInfo>>>,
    pub connections_closed: Arc<Mutex<usize>>,
}

impl MockTransportFactory {
    pub fn new(accept: DirectBehavior, connect: DirectBehavior) -> Self {
        Self {
            accept,
            connect,
            bind_results: Arc::new(Mutex::new(VecDeque::new())),
            bind_calls: Arc::new(Mutex::new(Vec::new())),
            relay_sends: Arc::new(Mutex::new(Vec::new())),
            relay_connects: Arc::new(Mutex::new(Vec::new())),
            connections_closed: Arc::new(Mutex::new(0)),
        }
    }

    pub fn script_binds(&self, results: impl IntoIterator<Item = bool>) {
        self.bind_results.lock().unwrap().extend(results);
    }

    pub fn bind_calls(&self) -> Vec<(String, String)> {
        self.bind_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn peer_server(&self, _bind_addr: std::net::SocketAddr) -> Result<Box<dyn PeerServer>> {
        Ok(Box::new(MockPeerServer {
            behavior: self.accept.clone(),
            connections_closed: self.connections_closed.clone(),
        }))
    }

    async fn peer_client(&self, _bind_addr: std::net::SocketAddr) -> Result<Box<dyn PeerClient>> {
        Ok(Box::new(MockPeerClient {
            behavior: self.connect.clone(),
            connections_closed: self.connections_closed.clone(),
        }))
    }

    async fn relay_client(&self, _bind_addr: std::net::SocketAddr) -> Result<Box<dyn RelayClient>> {
        Ok(Box::new(MockRelayClient {
            bind_results: self.bind_results.clone(),
            bind_calls: self.bind_calls.clone(),
            relay_sends: self.relay_sends.clone(),
            relay_connects: self.relay_connects.clone(),
        }))
    }
}

pub struct MockPeerServer {
    behavior: DirectBehavior,
    connections_closed: Arc<Mutex<usize>>,
}

#[async_trait]
impl PeerServer for MockPeerServer {
    fn offer(&self, advertised_candidates: Option<&[String]>) -> QuicOffer {
        let candidates = advertised_candidates
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec!["0.0.0.0:4433".to_string()]);
        QuicOffer {
            candidates: gann_common::offer::normalize_candidates(&candidates),
            ..test_offer()
        }
    }

    async fn accept(&self) -> Result<Box<dyn PeerConnection>> {
        match &self.behavior {
            DirectBehavior::Resolve(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Box::new(MockPeerConnection {
                    connections_closed: self.connections_closed.clone(),
                }))
            }
            DirectBehavior::Fail(delay) => {
                tokio::time::sleep(*delay).await;
                Err(Error::Transport("handshake failed".to_string()))
            }
            DirectBehavior::Pending => std::future::pending().await,
        }
    }

    fn close(&self) {}
}

pub struct MockPeerClient {
    behavior: DirectBehavior,
    connections_closed: Arc<Mutex<usize>>,
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn connect(&self, _offer: &QuicOffer) -> Result<Box<dyn PeerConnection>> {
        match &self.behavior {
            DirectBehavior::Resolve(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Box::new(MockPeerConnection {
                    connections_closed: self.connections_closed.clone(),
                }))
            }
            DirectBehavior::Fail(delay) => {
                tokio::time::sleep(*delay).await;
                Err(Error::Transport("no candidate reachable".to_string()))
            }
            DirectBehavior::Pending => std::future::pending().await,
        }
    }
}

pub struct MockPeerConnection {
    connections_closed: Arc<Mutex<usize>>,
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn open_bi(&self) -> Result<Box<dyn BiStream>> {
        Ok(Box::new(MockBiStream::default()))
    }

    async fn accept_bi(&self) -> Result<Box<dyn BiStream>> {
        Ok(Box::new(MockBiStream::default()))
    }

    fn close(&self) {
        *self.connections_closed.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct MockBiStream {
    pub written: Vec<u8>,
    pub finished: bool,
}

#[async_trait]
impl BiStream for MockBiStream {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    async fn read(&mut self, _max_bytes: Option<usize>) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

pub struct MockRelayClient {
    bind_results: Arc<Mutex<VecDeque<bool>>>,
    bind_calls: Arc<Mutex<Vec<(String, String)>>>,
    relay_sends: Arc<Mutex<Vec<(String, String, Value)>>>,
    relay_connects: Arc<Mutex<Vec<QuicRelayInfo>>>,
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn connect_transport(&self, relay: &QuicRelayInfo) -> Result<Box<dyn RelayTransport>> {
        self.relay_connects.lock().unwrap().push(relay.clone());
        Ok(Box::new(MockRelayTransport {
            bind_results: self.bind_results.clone(),
            bind_calls: self.bind_calls.clone(),
            relay_sends: self.relay_sends.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockRelayTransport {
    bind_results: Arc<Mutex<VecDeque<bool>>>,
    bind_calls: Arc<Mutex<Vec<(String, String)>>>,
    relay_sends: Arc<Mutex<Vec<(String, String, Value)>>>,
    closed: AtomicBool,
}

#[async_trait]
impl RelayTransport for MockRelayTransport {
    async fn relay_bind(&self, token: &str, session_id: &str) -> Result<bool> {
        self.bind_calls
            .lock()
            .unwrap()
            .push((token.to_string(), session_id.to_string()));
        Ok(self.bind_results.lock().unwrap().pop_front().unwrap_or(true))
    }

    async fn relay_send(&self, token: &str, session_id: &str, payload: &Value) -> Result<()> {
        self.relay_sends
            .lock()
            .unwrap()
            .push((token.to_string(), session_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn recv_relay_data(&self) -> Result<RelayDataFrame> {
        std::future::pending().await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
