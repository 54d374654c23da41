//! Tool-related types.

use serde::{Deserialize, Serialize};

/// Definition of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Output from a successful tool invocation.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Text result
    Text(String),
    /// Success with no content
    Empty,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn empty() -> Self {
        Self::Empty
    }

    /// Rendered form for history and audit records.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Empty => String::new(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Error from a tool invocation.
///
/// `Validation` is recoverable in place (the loop re-prompts with the
/// message); `Execution` is a real failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid args: {0}")]
    Validation(String),

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
