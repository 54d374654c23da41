//! Tool execution and permission request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;

/// Lifecycle status of a tool invocation.
///
/// `Completed`, `Error` and `Aborted` are terminal; the manager rejects
/// every transition out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    AwaitingPermission,
    Completed,
    Error,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }
}

/// Canonical record of one tool invocation.
///
/// Created when the model requests the call and kept for the session's
/// lifetime for audit and replay. Event consumers receive cloned
/// snapshots, never a live reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionState {
    /// Correlation id from the model's tool_use request
    pub id: String,
    pub session_id: SessionId,
    pub tool_id: String,
    pub tool_name: String,
    pub status: ExecutionStatus,
    pub args: serde_json::Value,
    pub result: Option<String>,
    pub error: Option<String>,
    pub permission_id: Option<Uuid>,
    pub preview_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolExecutionState {
    pub(crate) fn new(
        id: impl Into<String>,
        session_id: SessionId,
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            session_id,
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            status: ExecutionStatus::Pending,
            args,
            result: None,
            error: None,
            permission_id: None,
            preview_id: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time between start and end, if both are recorded.
    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Timestamp of the most recent transition.
    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.ended_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }
}

/// Record of one interactive approval request, 1:1 with an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestState {
    pub id: Uuid,
    pub execution_id: String,
    pub session_id: SessionId,
    /// Arguments snapshot at request time
    pub args: serde_json::Value,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub granted: Option<bool>,
}

impl PermissionRequestState {
    pub(crate) fn new(
        execution_id: impl Into<String>,
        session_id: SessionId,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id: execution_id.into(),
            session_id,
            args,
            requested_at: Utc::now(),
            resolved_at: None,
            granted: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
