//! Engine event variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{PermissionRequestState, ToolExecutionState};
use crate::session::SessionId;

/// Everything the engine tells its observers.
///
/// A closed, tagged set: each variant has a fixed payload shape and
/// consumers match exhaustively. Execution payloads are immutable
/// snapshots taken at transition time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecutionCreated {
        execution: ToolExecutionState,
    },
    ExecutionUpdated {
        execution: ToolExecutionState,
    },
    ExecutionCompleted {
        execution: ToolExecutionState,
    },
    ExecutionError {
        execution: ToolExecutionState,
    },
    ExecutionAborted {
        execution: ToolExecutionState,
    },
    PermissionRequested {
        request: PermissionRequestState,
    },
    PermissionResolved {
        request: PermissionRequestState,
    },
    LoopStarted {
        session_id: SessionId,
        query: String,
    },
    LoopCompleted {
        session_id: SessionId,
        response: String,
        iterations: usize,
    },
    LoopError {
        session_id: SessionId,
        message: String,
    },
    LoopAborted {
        session_id: SessionId,
    },
}

impl EngineEvent {
    /// Session this event belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ExecutionCreated { execution }
            | Self::ExecutionUpdated { execution }
            | Self::ExecutionCompleted { execution }
            | Self::ExecutionError { execution }
            | Self::ExecutionAborted { execution } => &execution.session_id,
            Self::PermissionRequested { request } | Self::PermissionResolved { request } => {
                &request.session_id
            }
            Self::LoopStarted { session_id, .. }
            | Self::LoopCompleted { session_id, .. }
            | Self::LoopError { session_id, .. }
            | Self::LoopAborted { session_id } => session_id,
        }
    }

    /// Stable kind tag, useful for logging and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionCreated { .. } => "execution-created",
            Self::ExecutionUpdated { .. } => "execution-updated",
            Self::ExecutionCompleted { .. } => "execution-completed",
            Self::ExecutionError { .. } => "execution-error",
            Self::ExecutionAborted { .. } => "execution-aborted",
            Self::PermissionRequested { .. } => "permission-requested",
            Self::PermissionResolved { .. } => "permission-resolved",
            Self::LoopStarted { .. } => "loop-started",
            Self::LoopCompleted { .. } => "loop-completed",
            Self::LoopError { .. } => "loop-error",
            Self::LoopAborted { .. } => "loop-aborted",
        }
    }
}

/// An event plus the time it occurred at its source.
///
/// The timestamp comes from the originating record transition, not from
/// delivery, so observers can compare it against a session's abort time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub occurred_at: DateTime<Utc>,
    pub event: EngineEvent,
}

impl EventEnvelope {
    pub fn new(occurred_at: DateTime<Utc>, event: EngineEvent) -> Self {
        Self { occurred_at, event }
    }

    pub fn now(event: EngineEvent) -> Self {
        Self {
            occurred_at: Utc::now(),
            event,
        }
    }
}
