//! Tool capability interface and registry.
//!
//! Tools are external collaborators. The engine only sees the capability
//! surface: a schema to advertise, argument validation, execution against
//! a context, and whether the tool needs interactive approval.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::session::SessionId;
use crate::types::{ToolDefinition, ToolError, ToolOutput};

/// Context handed to every tool invocation.
///
/// Cancellation is cooperative: a tool that never checks the token may run
/// to physical completion, in which case the engine discards its result.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub session_id: SessionId,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(session_id: SessionId, cancel: CancellationToken) -> Self {
        Self { session_id, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Formal capability interface for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier the model selects the tool by.
    fn id(&self) -> &str;

    /// Definition advertised in the tool catalog.
    fn describe(&self) -> ToolDefinition;

    /// Check arguments before execution. The error message is surfaced to
    /// the model verbatim for self-correction.
    fn validate(&self, args: &serde_json::Value) -> Result<(), String>;

    /// Run the tool.
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Whether this tool must pass the permission gate before running.
    fn requires_permission(&self) -> bool {
        false
    }
}

/// Schema-based tool trait with typed arguments.
///
/// Implementors get `describe` and `validate` derived from the argument
/// type's schema; only the handler is hand-written.
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Args: JsonSchema + DeserializeOwned + Send;
    const ID: &'static str;
    const DESCRIPTION: &'static str;
    const REQUIRES_PERMISSION: bool = false;

    async fn run(
        &self,
        args: Self::Args,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;

    fn args_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Self::Args);
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

#[async_trait]
impl<T: TypedTool + 'static> Tool for T {
    fn id(&self) -> &str {
        T::ID
    }

    fn describe(&self) -> ToolDefinition {
        ToolDefinition::new(T::ID, T::DESCRIPTION, T::args_schema())
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), String> {
        serde_json::from_value::<T::Args>(args.clone())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let typed = serde_json::from_value::<T::Args>(args)
            .map_err(|e| ToolError::validation(e.to_string()))?;
        self.run(typed, context).await
    }

    fn requires_permission(&self) -> bool {
        T::REQUIRES_PERMISSION
    }
}

/// Registry of available tools, keyed by id.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(id)
    }

    /// Catalog advertised to the model alongside each query.
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|tool| tool.describe()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
