//! Best-effort result previews.
//!
//! Generated off the completion path in a spawned task; a preview that
//! fails or lags never affects the completion signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;

use super::state::ToolExecutionState;

/// Display-sized excerpt of a completed execution's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPreview {
    pub id: Uuid,
    pub execution_id: String,
    pub session_id: SessionId,
    pub content: String,
    pub truncated: bool,
    pub generated_at: DateTime<Utc>,
}

pub(crate) const PREVIEW_MAX_CHARS: usize = 400;

impl ExecutionPreview {
    /// Build a preview from a completed execution's result, if any.
    pub(crate) fn from_execution(execution: &ToolExecutionState) -> Option<Self> {
        let result = execution.result.as_deref()?;
        let mut content: String = result.chars().take(PREVIEW_MAX_CHARS).collect();
        let truncated = content.len() < result.len();
        if truncated {
            content.push('…');
        }
        Some(Self {
            id: Uuid::new_v4(),
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            content,
            truncated,
            generated_at: Utc::now(),
        })
    }
}
