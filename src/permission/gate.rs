//! Interactive-approval checkpoint.
//!
//! A gated invocation registers a one-shot resolution handle keyed by its
//! permission id, then suspends on [`PermissionGate::wait`] until the id
//! is resolved, the owning session is aborted, or a configured timeout
//! elapses. There is no timeout unless one is configured.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// How a permission wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Granted,
    Denied,
    /// The owning session was aborted while waiting.
    Aborted,
    /// The configured wait limit elapsed.
    TimedOut,
}

/// Suspends tool invocation sites until their approval decision arrives.
#[derive(Default)]
pub struct PermissionGate {
    pending: DashMap<Uuid, oneshot::Sender<bool>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolution handle for a permission id.
    pub fn register(&self, permission_id: Uuid) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(permission_id, tx);
        rx
    }

    /// Deliver a decision to the waiting invocation site.
    ///
    /// Returns false when the id is unknown or already resolved; repeat
    /// calls fail silently.
    pub fn resolve(&self, permission_id: Uuid, granted: bool) -> bool {
        match self.pending.remove(&permission_id) {
            Some((_, tx)) => tx.send(granted).is_ok(),
            None => {
                debug!(permission_id = %permission_id, "Resolution for unknown or settled permission");
                false
            }
        }
    }

    /// Whether an id still has a waiting invocation site.
    pub fn is_pending(&self, permission_id: &Uuid) -> bool {
        self.pending.contains_key(permission_id)
    }

    /// Suspend until resolution, session abort, or timeout.
    pub async fn wait(
        &self,
        permission_id: Uuid,
        rx: oneshot::Receiver<bool>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> GateVerdict {
        let verdict = match timeout {
            Some(limit) => {
                tokio::select! {
                    decision = rx => decision_verdict(decision),
                    _ = cancel.cancelled() => GateVerdict::Aborted,
                    _ = tokio::time::sleep(limit) => GateVerdict::TimedOut,
                }
            }
            None => {
                tokio::select! {
                    decision = rx => decision_verdict(decision),
                    _ = cancel.cancelled() => GateVerdict::Aborted,
                }
            }
        };

        if verdict != GateVerdict::Granted && verdict != GateVerdict::Denied {
            // The handle is dead either way; drop it so a late resolve
            // fails silently instead of waking nothing.
            self.pending.remove(&permission_id);
        }
        verdict
    }
}

fn decision_verdict(decision: Result<bool, oneshot::error::RecvError>) -> GateVerdict {
    match decision {
        Ok(true) => GateVerdict::Granted,
        // A dropped sender counts as denial.
        Ok(false) | Err(_) => GateVerdict::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_wakes_waiter() {
        let gate = PermissionGate::new();
        let id = Uuid::new_v4();
        let rx = gate.register(id);

        assert!(gate.resolve(id, true));
        let verdict = gate.wait(id, rx, &CancellationToken::new(), None).await;
        assert_eq!(verdict, GateVerdict::Granted);
    }

    #[tokio::test]
    async fn test_repeat_resolution_fails_silently() {
        let gate = PermissionGate::new();
        let id = Uuid::new_v4();
        let _rx = gate.register(id);

        assert!(gate.resolve(id, false));
        assert!(!gate.resolve(id, true));
        assert!(!gate.resolve(Uuid::new_v4(), true));
    }

    #[tokio::test]
    async fn test_wait_pends_until_resolution() {
        let gate = PermissionGate::new();
        let id = Uuid::new_v4();
        let rx = gate.register(id);
        let cancel = CancellationToken::new();

        let mut wait = tokio_test::task::spawn(gate.wait(id, rx, &cancel, None));
        tokio_test::assert_pending!(wait.poll());

        assert!(gate.resolve(id, true));
        assert!(wait.is_woken());
        tokio_test::assert_ready_eq!(wait.poll(), GateVerdict::Granted);
    }

    #[tokio::test]
    async fn test_session_abort_ends_wait() {
        let gate = PermissionGate::new();
        let id = Uuid::new_v4();
        let rx = gate.register(id);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let verdict = gate.wait(id, rx, &cancel, None).await;
        assert_eq!(verdict, GateVerdict::Aborted);
        assert!(!gate.is_pending(&id));
    }

    #[tokio::test]
    async fn test_timeout_ends_wait() {
        let gate = PermissionGate::new();
        let id = Uuid::new_v4();
        let rx = gate.register(id);

        let verdict = gate
            .wait(
                id,
                rx,
                &CancellationToken::new(),
                Some(Duration::from_millis(10)),
            )
            .await;
        assert_eq!(verdict, GateVerdict::TimedOut);
        assert!(!gate.is_pending(&id));
    }
}
