//! Content block types for conversation messages.

use serde::{Deserialize, Serialize};

/// A content part within a message.
///
/// The set is closed: every part a message can carry is one of these
/// variants, and consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text
    Text {
        /// The text content
        text: String,
    },
    /// Tool invocation requested by the model
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    /// Result of a tool invocation, paired by correlation id
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultBlock),
}

/// A tool invocation request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Correlation id pairing this request with its eventual result
    pub id: String,
    /// Tool the model chose
    pub name: String,
    /// Arguments for the tool
    pub input: serde_json::Value,
}

/// A tool result to hand back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Correlation id of the `tool_use` this answers
    pub tool_use_id: String,
    /// Result content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ToolResultContent>,
    /// Whether the invocation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Content of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Simple text result
    Text(String),
}

impl ToolResultBlock {
    /// Create a successful tool result with text content.
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: Some(ToolResultContent::Text(content.into())),
            is_error: None,
        }
    }

    /// Create an error tool result.
    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: Some(ToolResultContent::Text(message.into())),
            is_error: Some(true),
        }
    }

    /// Create an empty success result.
    pub fn empty(tool_use_id: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: None,
            is_error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(ToolResultContent::Text(text)) => Some(text),
            None => None,
        }
    }
}

impl From<&str> for ContentBlock {
    fn from(text: &str) -> Self {
        ContentBlock::Text {
            text: text.to_string(),
        }
    }
}

impl From<String> for ContentBlock {
    fn from(text: String) -> Self {
        ContentBlock::Text { text }
    }
}

impl ContentBlock {
    /// Create a text content block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Get text content if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        match self {
            ContentBlock::ToolResult(block) => Some(block),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_success() {
        let result = ToolResultBlock::success("call_123", "done");
        assert_eq!(result.tool_use_id, "call_123");
        assert!(!result.is_error());
        assert_eq!(result.text(), Some("done"));
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResultBlock::error("call_456", "file not found");
        assert_eq!(result.tool_use_id, "call_456");
        assert!(result.is_error());
    }

    #[test]
    fn test_content_block_serde_tags() {
        let block = ContentBlock::ToolUse(ToolUseBlock {
            id: "call_1".into(),
            name: "ls".into(),
            input: serde_json::json!({"path": "."}),
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");

        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
