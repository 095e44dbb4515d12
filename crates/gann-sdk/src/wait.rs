//! Bounded waits for signaling events during negotiation.

use std::time::Duration;

use tokio::sync::mpsc;

use gann_common::SignalingEvent;

use crate::channel::SignalingChannel;
use crate::emitter::{ChannelEvent, EventKind, Subscription};
use crate::error::{Error, Result};

/// Buffers inbound signaling events and rejects when the channel dies.
///
/// Subscribing before sending an offer (or before attempting a direct
/// connect) guarantees no event can slip through between two waits: events
/// queue here until consumed. Dropping the waiter detaches every listener.
pub(crate) struct SignalingWaiter {
    channel: SignalingChannel,
    rx: mpsc::UnboundedReceiver<Result<SignalingEvent>>,
    subscriptions: Vec<Subscription>,
}

impl SignalingWaiter {
    pub(crate) fn subscribe(channel: &SignalingChannel) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let signaling_tx = tx.clone();
        let on_signaling = channel.on(EventKind::Signaling, move |event| {
            if let ChannelEvent::Signaling(ev) = event {
                let _ = signaling_tx.send(Ok(ev.clone()));
            }
        });

        let close_tx = tx.clone();
        let on_close = channel.on(EventKind::Close, move |event| {
            if let ChannelEvent::Close { code, reason } = event {
                let _ = close_tx.send(Err(Error::ChannelTerminated {
                    code: *code,
                    reason: reason.clone(),
                }));
            }
        });

        let error_tx = tx.clone();
        let on_error = channel.on(EventKind::Error, move |event| {
            if let ChannelEvent::Error(message) = event {
                let _ = error_tx.send(Err(Error::Transport(message.clone())));
            }
        });

        if channel.is_closed() {
            let _ = tx.send(Err(Error::ChannelTerminated {
                code: None,
                reason: None,
            }));
        }

        Self {
            channel: channel.clone(),
            rx,
            subscriptions: vec![on_signaling, on_close, on_error],
        }
    }

    /// The next signaling event, whatever its payload.
    pub(crate) async fn next_event(
        &mut self,
        deadline: Duration,
        label: &str,
    ) -> Result<SignalingEvent> {
        match tokio::time::timeout(deadline, self.rx.recv()).await {
            Err(_) => Err(Error::timeout(label)),
            Ok(None) => Err(Error::ChannelTerminated {
                code: None,
                reason: None,
            }),
            Ok(Some(result)) => result,
        }
    }

    /// The next signaling event matching `pred`; non-matching events are
    /// consumed and discarded.
    pub(crate) async fn next_matching(
        &mut self,
        deadline: Duration,
        label: &str,
        pred: impl Fn(&SignalingEvent) -> bool,
    ) -> Result<SignalingEvent> {
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(label));
            }
            let event = self.next_event(remaining, label).await?;
            if pred(&event) {
                return Ok(event);
            }
        }
    }
}

impl Drop for SignalingWaiter {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            self.channel.off(subscription);
        }
    }
}
