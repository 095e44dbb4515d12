//! Typed multi-listener fan-out with unsubscribe tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gann_common::event::{
    ControlDirective, HeartbeatBroadcast, ParsedEvent, SessionLifecycleEvent, SignalingEvent,
};

/// Everything a signaling channel can notify listeners about.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The underlying socket opened.
    Open,
    /// The channel entered its terminal state.
    Close {
        /// Socket close code, when one was supplied.
        code: Option<u16>,
        /// Socket close reason, when one was supplied.
        reason: Option<String>,
    },
    /// A non-terminal socket error after open.
    Error(String),
    /// An inbound signaling event.
    Signaling(SignalingEvent),
    /// An inbound session lifecycle event.
    Session(SessionLifecycleEvent),
    /// An inbound control directive.
    Control(ControlDirective),
    /// An inbound heartbeat broadcast.
    Heartbeat(HeartbeatBroadcast),
    /// Every decoded frame, before family-specific dispatch.
    Raw(ParsedEvent),
}

/// The listener buckets an emitter maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket open.
    Open,
    /// Terminal close.
    Close,
    /// Non-terminal error.
    Error,
    /// Signaling events.
    Signaling,
    /// Session lifecycle events.
    Session,
    /// Control directives.
    Control,
    /// Heartbeat broadcasts.
    Heartbeat,
    /// Raw decoded frames.
    Raw,
}

impl ChannelEvent {
    /// The bucket this event dispatches to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close { .. } => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Signaling(_) => EventKind::Signaling,
            Self::Session(_) => EventKind::Session,
            Self::Control(_) => EventKind::Control,
            Self::Heartbeat(_) => EventKind::Heartbeat,
            Self::Raw(_) => EventKind::Raw,
        }
    }
}

type Listener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Unsubscribe token returned by [`EventEmitter::on`].
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

/// Multi-listener event fan-out.
///
/// Dispatch snapshots the listener set, so a listener that unsubscribes
/// itself mid-dispatch does not skip a successor, and a listener registered
/// during dispatch is not invoked for the current event.
pub struct EventEmitter {
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a listener for one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().expect("emitter lock poisoned");
        listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription { kind, id }
    }

    /// Removes a previously registered listener. The bucket is dropped when
    /// its last listener leaves, so an unsubscribed emitter is
    /// indistinguishable from a fresh one.
    pub fn off(&self, subscription: &Subscription) {
        let mut listeners = self.listeners.lock().expect("emitter lock poisoned");
        if let Some(bucket) = listeners.get_mut(&subscription.kind) {
            bucket.retain(|(id, _)| *id != subscription.id);
            if bucket.is_empty() {
                listeners.remove(&subscription.kind);
            }
        }
    }

    /// Broadcasts an event to all listeners registered for its kind.
    pub fn emit(&self, event: &ChannelEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().expect("emitter lock poisoned");
            listeners
                .get(&event.kind())
                .map(|bucket| bucket.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.listeners.lock().expect("emitter lock poisoned").clear();
    }

    /// Total number of registered listeners across all kinds.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .expect("emitter lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }
}
