//! Delegated session persistence.
//!
//! The engine does not own a storage format. It produces and consumes
//! [`SessionSnapshot`]s — everything needed to reconstruct in-memory state
//! for a resumed session — and delegates durability to a [`Persistence`]
//! implementation. An in-memory backend ships here; durable backends live
//! outside the crate.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::execution::{PermissionRequestState, ToolExecutionState};

use super::state::{SessionId, SessionState};

/// Serializable capture of one session: ordered messages plus execution
/// and permission records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionState,
    pub executions: Vec<ToolExecutionState>,
    pub permissions: Vec<PermissionRequestState>,
}

/// Storage backend for session snapshots.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, snapshot: &SessionSnapshot) -> crate::Result<()>;
    async fn load(&self, id: &SessionId) -> crate::Result<Option<SessionSnapshot>>;
    async fn delete(&self, id: &SessionId) -> crate::Result<bool>;
}

/// In-memory persistence, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryPersistence {
    snapshots: DashMap<SessionId, SessionSnapshot>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save(&self, snapshot: &SessionSnapshot) -> crate::Result<()> {
        self.snapshots
            .insert(snapshot.session.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> crate::Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &SessionId) -> crate::Result<bool> {
        Ok(self.snapshots.remove(id).is_some())
    }
}
