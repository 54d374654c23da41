//! Process-wide abort registry.
//!
//! One entry per session: a cancellation token handed to every suspension
//! point of that session's conversation loop, plus the timestamp of the
//! last abort. The timestamp outlives the cancellation itself — observers
//! use it to recognize stale events produced before the abort landed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::SessionId;

#[derive(Debug)]
struct AbortState {
    token: CancellationToken,
    aborted_at: Option<DateTime<Utc>>,
}

impl Default for AbortState {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            aborted_at: None,
        }
    }
}

/// Session-keyed abort state, safe under concurrent access.
#[derive(Debug, Default)]
pub struct AbortRegistry {
    sessions: DashMap<SessionId, AbortState>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cancellation token for a session.
    pub fn token(&self, id: &SessionId) -> CancellationToken {
        self.sessions
            .entry(id.clone())
            .or_default()
            .token
            .clone()
    }

    /// Record an abort: stamp the time and cancel the session token.
    ///
    /// Idempotent — a second call returns the original timestamp.
    pub fn set_aborted(&self, id: &SessionId) -> DateTime<Utc> {
        let mut entry = self.sessions.entry(id.clone()).or_default();
        if let Some(at) = entry.aborted_at {
            return at;
        }
        let at = Utc::now();
        entry.aborted_at = Some(at);
        entry.token.cancel();
        debug!(session_id = %id, "Session aborted");
        at
    }

    pub fn is_aborted(&self, id: &SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|entry| entry.aborted_at.is_some())
    }

    pub fn abort_time(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        self.sessions.get(id).and_then(|entry| entry.aborted_at)
    }

    /// Accept the session's next query: clear any stored abort exactly once
    /// and hand back a fresh cancellation token for the new turn.
    pub fn accept(&self, id: &SessionId) -> CancellationToken {
        let mut entry = self.sessions.entry(id.clone()).or_default();
        if entry.aborted_at.is_some() {
            debug!(session_id = %id, "Clearing abort for accepted query");
            *entry = AbortState::default();
        }
        entry.token.clone()
    }
}
