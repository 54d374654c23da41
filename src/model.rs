//! Model provider contract.
//!
//! The wire protocol is out of scope; the engine consumes this trait and
//! nothing else. Implementations adapt a concrete provider (or a scripted
//! mock in tests) to the two calls the loop makes.

use async_trait::async_trait;

use crate::session::SessionState;
use crate::types::{TokenUsage, ToolDefinition};

/// One step of the model's decision: invoke a tool, or answer.
#[derive(Debug, Clone)]
pub struct ModelDecision {
    pub action: ModelAction,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub enum ModelAction {
    /// The model wants a tool invoked before it can answer.
    ToolCall(ToolCallRequest),
    /// The model produced a final answer.
    Answer(String),
}

/// A tool invocation the model requested.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Correlation id pairing the request with its result.
    pub correlation_id: String,
    /// Registry id of the chosen tool.
    pub tool_id: String,
    pub args: serde_json::Value,
}

impl ModelDecision {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            action: ModelAction::Answer(text.into()),
            usage: TokenUsage::default(),
        }
    }

    pub fn tool_call(
        correlation_id: impl Into<String>,
        tool_id: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            action: ModelAction::ToolCall(ToolCallRequest {
                correlation_id: correlation_id.into(),
                tool_id: tool_id.into(),
                args,
            }),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// A forced final response from the model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: TokenUsage,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Directives for a forced response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespondOptions {
    /// Answer from whatever partial results exist; some tool calls failed.
    pub best_effort: bool,
    /// The iteration ceiling was reached; the model must answer now.
    pub must_answer: bool,
}

impl RespondOptions {
    pub fn best_effort() -> Self {
        Self {
            best_effort: true,
            must_answer: false,
        }
    }

    pub fn must_answer() -> Self {
        Self {
            best_effort: false,
            must_answer: true,
        }
    }
}

/// Client for the language model backing the assistant.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Ask the model for either a tool call or a final answer, given the
    /// session history and the tool catalog.
    async fn decide(
        &self,
        query: &str,
        catalog: &[ToolDefinition],
        session: &SessionState,
    ) -> crate::Result<ModelDecision>;

    /// Force a final response.
    async fn respond(
        &self,
        query: &str,
        catalog: &[ToolDefinition],
        session: &SessionState,
        options: RespondOptions,
    ) -> crate::Result<ModelResponse>;
}

/// Out-of-band approval surface for permission-gated tools.
///
/// Optional collaborator: when configured, the engine consults it in a
/// background task and feeds the verdict through the permission gate, so
/// UI handlers and direct `resolve_permission` calls share one path.
#[async_trait]
pub trait PermissionUiHandler: Send + Sync {
    async fn request_permission(&self, tool_id: &str, args: &serde_json::Value) -> bool;
}
