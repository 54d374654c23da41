//! Core data types shared across the engine.

mod content;
mod message;
mod tool;
mod usage;

pub use content::{ContentBlock, ToolResultBlock, ToolResultContent, ToolUseBlock};
pub use message::{Message, Role};
pub use tool::{ToolDefinition, ToolError, ToolOutput};
pub use usage::TokenUsage;
