//! Per-session event fan-out.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::abort::AbortRegistry;
use crate::session::SessionId;

use super::types::EventEnvelope;

struct Observer {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

/// Multiplexes engine events to every observer attached to a session.
///
/// Delivery is per-observer over unbounded channels: a slow or failed
/// observer never blocks the loop or its peers. Per-session production
/// order is preserved for each observer; cross-session ordering is
/// unspecified. Events timestamped earlier than the session's stored
/// abort time are stale and dropped before delivery.
pub struct EventBus {
    sessions: DashMap<SessionId, Vec<Observer>>,
    aborts: Arc<AbortRegistry>,
}

impl EventBus {
    pub fn new(aborts: Arc<AbortRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            aborts,
        }
    }

    /// Deliver an envelope to every live observer of its session.
    ///
    /// Observers whose receiver is gone are detached here.
    pub fn publish(&self, envelope: EventEnvelope) {
        let session_id = envelope.event.session_id().clone();

        if let Some(aborted_at) = self.aborts.abort_time(&session_id)
            && envelope.occurred_at < aborted_at
        {
            debug!(
                session_id = %session_id,
                kind = envelope.event.kind(),
                "Suppressing stale event from before abort"
            );
            return;
        }

        let Some(mut observers) = self.sessions.get_mut(&session_id) else {
            return;
        };
        observers.retain(|observer| observer.tx.send(envelope.clone()).is_ok());
    }

    /// Attach an observer, delivering a backlog snapshot before any live
    /// event.
    ///
    /// The backlog closure runs under the session's registration lock —
    /// the same lock `publish` takes — so the snapshot and the first live
    /// delta cannot interleave and the observer's view is never partially
    /// synchronized.
    pub fn subscribe_with<F>(&self, session_id: &SessionId, backlog: F) -> EventStream
    where
        F: FnOnce() -> Vec<EventEnvelope>,
    {
        let mut observers = self.sessions.entry(session_id.clone()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in backlog() {
            // Receiver is still in hand; the send cannot fail.
            let _ = tx.send(envelope);
        }
        observers.push(Observer { tx });
        EventStream { rx }
    }

    /// Attach an observer with no backlog.
    pub fn subscribe(&self, session_id: &SessionId) -> EventStream {
        self.subscribe_with(session_id, Vec::new)
    }

    pub fn observer_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .get(session_id)
            .map(|observers| observers.len())
            .unwrap_or(0)
    }
}

/// Stream of events for one observer.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, if the session is still producing.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }

    /// Non-blocking drain of everything currently buffered.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            events.push(envelope);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
