//! tokio-tungstenite adapter for the socket capability set.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{Error, Result};
use crate::socket::{ReadyState, SignalingSocket, SocketEvent, SocketEvents};

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

enum WsCommand {
    Text(String),
    Close(Option<u16>, Option<String>),
}

/// A connected WebSocket bound to the socket capability set.
///
/// Writes go through an unbounded queue drained by a dedicated task, so
/// [`SignalingSocket::send`] never suspends the channel's dispatch context.
pub struct WsSocket {
    out_tx: mpsc::UnboundedSender<WsCommand>,
    state: Arc<AtomicU8>,
}

/// Connects to a signaling WebSocket URL and returns the socket handle plus
/// its event stream. The `Open` event is already queued: tungstenite only
/// yields the stream once the handshake completed.
///
/// # Errors
///
/// Returns [`Error::Transport`] when the connection or handshake fails.
pub async fn connect_socket(url: &str) -> Result<(WsSocket, SocketEvents)> {
    crate::transport::quic::ensure_crypto_provider();
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(Error::transport)?;
    debug!(url, "signaling websocket connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let state = Arc::new(AtomicU8::new(STATE_OPEN));

    let writer_state = state.clone();
    tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            match cmd {
                WsCommand::Text(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        writer_state.store(STATE_CLOSED, Ordering::SeqCst);
                        break;
                    }
                }
                WsCommand::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: code.map_or(CloseCode::Normal, CloseCode::from),
                        reason: reason.unwrap_or_default().into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    writer_state.store(STATE_CLOSED, Ordering::SeqCst);
                    break;
                }
            }
        }
    });

    let reader_state = state.clone();
    tokio::spawn(async move {
        let _ = event_tx.send(SocketEvent::Open);
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let _ = event_tx.send(SocketEvent::Message(text));
                }
                Ok(Message::Close(frame)) => {
                    reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                    let (code, reason) = match frame {
                        Some(frame) => {
                            let reason = frame.reason.into_owned();
                            (
                                Some(frame.code.into()),
                                if reason.is_empty() { None } else { Some(reason) },
                            )
                        }
                        None => (None, None),
                    };
                    let _ = event_tx.send(SocketEvent::Closed { code, reason });
                    return;
                }
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of the signaling protocol.
                Ok(_) => {}
                Err(e) => {
                    reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                    let _ = event_tx.send(SocketEvent::Error(e.to_string()));
                    let _ = event_tx.send(SocketEvent::Closed {
                        code: None,
                        reason: None,
                    });
                    return;
                }
            }
        }
        reader_state.store(STATE_CLOSED, Ordering::SeqCst);
        let _ = event_tx.send(SocketEvent::Closed {
            code: None,
            reason: None,
        });
    });

    Ok((WsSocket { out_tx, state }, event_rx))
}

impl SignalingSocket for WsSocket {
    fn send(&self, text: String) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(Error::transport("websocket is not open"));
        }
        self.out_tx
            .send(WsCommand::Text(text))
            .map_err(|_| Error::transport("websocket is not open"))
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let _ = self
            .out_tx
            .send(WsCommand::Close(code, reason.map(str::to_string)));
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
    }

    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}
