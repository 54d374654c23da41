//! Per-session conversational state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContentBlock, Message, Role, TokenUsage, ToolResultBlock};

/// Unique session identifier.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the session learned from its most recent tool choice.
///
/// Kept so a corrective re-prompt (and post-mortem tooling) can see which
/// call the model last attempted and how it went wrong.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LearningContext {
    pub tool_id: String,
    pub correlation_id: String,
    pub args: serde_json::Value,
    pub error: Option<String>,
}

/// Conversational state exclusively owned by one session.
///
/// The conversation loop mutates this in place for the session's lifetime;
/// no other component writes to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    /// Ordered conversation history
    pub messages: Vec<Message>,
    /// Cumulative token usage
    pub total_usage: TokenUsage,
    /// Last tool the model chose, with its outcome
    pub last_tool: Option<LearningContext>,
    /// Abort mark for the current/previous turn; cleared when the next
    /// query is accepted
    pub aborted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            total_usage: TokenUsage::default(),
            last_tool: None,
            aborted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append the user query unless it is already the last entry.
    pub fn push_user_query(&mut self, text: &str) {
        let duplicate = self
            .messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.is_free_text() && m.text() == text);
        if !duplicate {
            self.push_message(Message::user(text));
        }
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.push_message(Message::assistant(text));
    }

    pub fn push_assistant_content(&mut self, content: Vec<ContentBlock>) {
        self.push_message(Message::assistant_with_content(content));
    }

    pub fn push_tool_results(&mut self, results: Vec<ToolResultBlock>) {
        if !results.is_empty() {
            self.push_message(Message::tool_results(results));
        }
    }

    fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn update_usage(&mut self, usage: &TokenUsage) {
        self.total_usage.add(usage);
        self.updated_at = Utc::now();
    }

    pub fn record_tool_choice(
        &mut self,
        tool_id: impl Into<String>,
        correlation_id: impl Into<String>,
        args: serde_json::Value,
    ) {
        self.last_tool = Some(LearningContext {
            tool_id: tool_id.into(),
            correlation_id: correlation_id.into(),
            args,
            error: None,
        });
        self.updated_at = Utc::now();
    }

    pub fn record_tool_error(&mut self, error: impl Into<String>) {
        if let Some(ctx) = self.last_tool.as_mut() {
            ctx.error = Some(error.into());
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_aborted(&mut self, at: DateTime<Utc>) {
        self.aborted_at = Some(at);
        self.updated_at = Utc::now();
    }

    pub fn clear_aborted(&mut self) {
        self.aborted_at = None;
    }

    /// Correlation ids of `tool_use` parts that have no paired
    /// `tool_result` yet. An empty result means history is consistent
    /// with the provider-side pairing invariant.
    pub fn unpaired_tool_uses(&self) -> Vec<&str> {
        let mut open: Vec<&str> = Vec::new();
        for message in &self.messages {
            for block in &message.content {
                match block {
                    ContentBlock::ToolUse(tool_use) => open.push(&tool_use.id),
                    ContentBlock::ToolResult(result) => {
                        open.retain(|id| *id != result.tool_use_id)
                    }
                    ContentBlock::Text { .. } => {}
                }
            }
        }
        open
    }
}
