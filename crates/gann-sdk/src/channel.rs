//! The signaling channel: one full-duplex socket to the directory, a typed
//! event surface, and a send API with pre-open queueing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use gann_common::codec::{parse_frame, SignalCommand};
use gann_common::types::{normalize_id, Token};
use gann_common::ParsedEvent;

use crate::emitter::{ChannelEvent, EventEmitter, EventKind, Subscription};
use crate::error::{Error, Result};
use crate::socket::{ReadyState, SignalingSocket, SocketEvent, SocketEvents};

/// Error fragments that mark a socket error as terminal: the socket is gone
/// and the channel quietly transitions to closed instead of surfacing noise.
const TERMINAL_ERROR_MARKERS: &[&str] = &[
    "connection closed",
    "websocket is not open",
    "already closed",
    "econnreset",
    "epipe",
    "ebadf",
];

enum ChannelState {
    Connecting { queue: VecDeque<String> },
    Open,
    Closed,
}

#[derive(Debug, Clone)]
enum ReadyStatus {
    Pending,
    Ready,
    Failed(String),
}

struct Inner {
    agent_id: String,
    socket: Box<dyn SignalingSocket>,
    emitter: EventEmitter,
    state: Mutex<ChannelState>,
    ready_tx: watch::Sender<ReadyStatus>,
    token: Option<Token>,
}

/// A single-use signaling channel: `connecting → open → closed`.
///
/// The channel exclusively owns its socket. Closing the channel closes the
/// socket and clears all listeners; a closed channel rejects further sends.
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<Inner>,
}

impl SignalingChannel {
    /// Wraps a socket and starts dispatching its events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the agent id is empty.
    pub fn open(
        agent_id: &str,
        socket: impl SignalingSocket,
        events: SocketEvents,
        token: Option<Token>,
    ) -> Result<Self> {
        let agent_id =
            normalize_id(agent_id).ok_or_else(|| Error::validation("agent id must not be empty"))?;
        let (ready_tx, _) = watch::channel(ReadyStatus::Pending);
        let inner = Arc::new(Inner {
            agent_id,
            socket: Box::new(socket),
            emitter: EventEmitter::new(),
            state: Mutex::new(ChannelState::Connecting {
                queue: VecDeque::new(),
            }),
            ready_tx,
            token,
        });
        tokio::spawn(dispatch_loop(inner.clone(), events));
        Ok(Self { inner })
    }

    /// The agent this channel authenticates as.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// The signaling token the channel was opened with, if any.
    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.inner.token.as_ref()
    }

    /// Resolves once the socket opens; fails on a terminal error or close
    /// before open. Settles exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelTerminated`] when the channel dies before
    /// opening.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.ready_tx.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                ReadyStatus::Ready => return Ok(()),
                ReadyStatus::Failed(reason) => {
                    return Err(Error::ChannelTerminated {
                        code: None,
                        reason: Some(reason),
                    })
                }
                ReadyStatus::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::ChannelTerminated {
                    code: None,
                    reason: Some("signaling channel dropped".to_string()),
                });
            }
        }
    }

    /// Registers a listener and returns its unsubscribe token.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.emitter.on(kind, listener)
    }

    /// Removes a listener registered with [`SignalingChannel::on`].
    pub fn off(&self, subscription: &Subscription) {
        self.inner.emitter.off(subscription);
    }

    /// Total registered listeners, across all event kinds.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.emitter.listener_count()
    }

    /// Whether the channel reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            *self.inner.state.lock().expect("channel lock poisoned"),
            ChannelState::Closed
        )
    }

    /// Sends a QUIC offer. Offers carry no session id; the directory assigns
    /// one when forwarding to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty target or a closed channel.
    pub fn send_quic_offer(&self, to: &str, offer: Value) -> Result<()> {
        let to = normalize_id(to).ok_or_else(|| Error::validation("target agent id must not be empty"))?;
        self.submit(SignalCommand::quic_offer(to, offer))
    }

    /// Sends a QUIC answer on an established session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty ids or a closed channel.
    pub fn send_quic_answer(&self, session_id: &str, to: &str, answer: Value) -> Result<()> {
        let (session_id, to) = validate_session_target(session_id, to)?;
        self.submit(SignalCommand::quic_answer(session_id, to, answer))
    }

    /// Sends a QUIC candidate hint on an established session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty ids or a closed channel.
    pub fn send_quic_candidate(&self, session_id: &str, to: &str, candidate: Value) -> Result<()> {
        let (session_id, to) = validate_session_target(session_id, to)?;
        self.submit(SignalCommand::quic_candidate(session_id, to, candidate))
    }

    /// Sends a session teardown command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty ids or a closed channel.
    pub fn disconnect_session(&self, session_id: &str, to: &str, reason: Option<&str>) -> Result<()> {
        let (session_id, to) = validate_session_target(session_id, to)?;
        self.submit(SignalCommand::disconnect(
            session_id,
            to,
            reason.map(str::to_string),
        ))
    }

    /// Local teardown: closes the socket and enters the terminal state.
    /// Idempotent; the `close` event fires exactly once.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        self.inner.socket.close(code, reason);
        self.inner
            .enter_closed(code, reason.map(str::to_string));
    }

    fn submit(&self, command: SignalCommand) -> Result<()> {
        let frame = command.encode();
        let mut state = self.inner.state.lock().expect("channel lock poisoned");
        match &mut *state {
            ChannelState::Connecting { queue } => {
                debug!(kind = command.payload.kind(), "queueing signal before open");
                queue.push_back(frame);
                Ok(())
            }
            ChannelState::Open => {
                debug!(kind = command.payload.kind(), to = %command.to, "sending signal");
                self.inner.socket.send(frame)
            }
            ChannelState::Closed => Err(Error::validation("send on closed signaling channel")),
        }
    }
}

fn validate_session_target(session_id: &str, to: &str) -> Result<(String, String)> {
    let session_id =
        normalize_id(session_id).ok_or_else(|| Error::validation("session id must not be empty"))?;
    let to = normalize_id(to).ok_or_else(|| Error::validation("target agent id must not be empty"))?;
    Ok((session_id, to))
}

async fn dispatch_loop(inner: Arc<Inner>, mut events: SocketEvents) {
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Open => inner.handle_open(),
            SocketEvent::Message(text) => inner.handle_message(&text),
            SocketEvent::Error(message) => inner.handle_error(&message),
            SocketEvent::Closed { code, reason } => {
                inner.enter_closed(code, reason);
                return;
            }
        }
        if matches!(
            *inner.state.lock().expect("channel lock poisoned"),
            ChannelState::Closed
        ) {
            return;
        }
    }
    // Event stream ended without a close frame: the adapter is gone.
    inner.enter_closed(None, None);
}

impl Inner {
    /// Transitions to open and drains the pre-open queue head-to-tail. The
    /// state lock is held across the drain so no concurrent send can
    /// interleave with the queued frames.
    fn handle_open(&self) {
        {
            let mut state = self.state.lock().expect("channel lock poisoned");
            let ChannelState::Connecting { queue } = &mut *state else {
                return;
            };
            let queued = std::mem::take(queue);
            if !queued.is_empty() {
                debug!(frames = queued.len(), "draining pre-open send queue");
            }
            for frame in queued {
                if let Err(e) = self.socket.send(frame) {
                    warn!(error = %e, "failed to flush queued signal");
                }
            }
            *state = ChannelState::Open;
        }
        self.ready_tx.send_replace(ReadyStatus::Ready);
        self.emitter.emit(&ChannelEvent::Open);
    }

    fn handle_message(&self, text: &str) {
        let Some(parsed) = parse_frame(text) else {
            debug!("dropping unparseable signaling frame");
            return;
        };
        let typed = match &parsed {
            ParsedEvent::Signaling(ev) => ChannelEvent::Signaling(ev.clone()),
            ParsedEvent::Session(ev) => ChannelEvent::Session(ev.clone()),
            ParsedEvent::Control(ev) => ChannelEvent::Control(ev.clone()),
            ParsedEvent::Heartbeat(ev) => ChannelEvent::Heartbeat(ev.clone()),
        };
        self.emitter.emit(&typed);
        self.emitter.emit(&ChannelEvent::Raw(parsed));
    }

    fn handle_error(&self, message: &str) {
        let lowered = message.to_ascii_lowercase();
        let terminal = TERMINAL_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker));

        if terminal {
            debug!(error = message, "terminal socket error");
            if self.socket.ready_state() != ReadyState::Open {
                self.enter_closed(None, None);
            }
            return;
        }

        let pending = matches!(*self.ready_tx.borrow(), ReadyStatus::Pending);
        if pending {
            self.ready_tx
                .send_replace(ReadyStatus::Failed(message.to_string()));
        } else {
            self.emitter.emit(&ChannelEvent::Error(message.to_string()));
        }
    }

    /// Enters the terminal state: fails a pending ready signal, emits `close`
    /// exactly once, and clears the emitter.
    fn enter_closed(&self, code: Option<u16>, reason: Option<String>) {
        {
            let mut state = self.state.lock().expect("channel lock poisoned");
            if matches!(*state, ChannelState::Closed) {
                return;
            }
            *state = ChannelState::Closed;
        }
        if matches!(*self.ready_tx.borrow(), ReadyStatus::Pending) {
            self.ready_tx.send_replace(ReadyStatus::Failed(format!(
                "signaling channel closed before open (code: {code:?})"
            )));
        }
        debug!(?code, ?reason, "signaling channel closed");
        self.emitter.emit(&ChannelEvent::Close { code, reason });
        self.emitter.clear();
    }
}
