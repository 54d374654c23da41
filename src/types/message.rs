//! Conversation messages.

use serde::{Deserialize, Serialize};

use super::content::{ContentBlock, ToolResultBlock};

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a conversation.
///
/// Every `tool_use` part must be answered by exactly one `tool_result`
/// part sharing its correlation id before the next free-text message;
/// an unanswered tool call corrupts the provider-side conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant_with_content(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Tool results travel back to the model as a user-role message.
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ContentBlock::ToolResult).collect(),
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse(_)))
    }

    pub fn tool_uses(&self) -> Vec<&super::ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|block| block.as_tool_use())
            .collect()
    }

    pub fn tool_results_blocks(&self) -> Vec<&ToolResultBlock> {
        self.content
            .iter()
            .filter_map(|block| block.as_tool_result())
            .collect()
    }

    /// True when this message carries only free text.
    pub fn is_free_text(&self) -> bool {
        !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|block| matches!(block, ContentBlock::Text { .. }))
    }
}
