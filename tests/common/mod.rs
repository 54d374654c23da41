//! Shared mocks for engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use agent_engine::model::{
    ModelClient, ModelDecision, ModelResponse, PermissionUiHandler, RespondOptions,
};
use agent_engine::session::SessionState;
use agent_engine::tools::{ExecutionContext, Tool, TypedTool};
use agent_engine::types::{ToolDefinition, ToolError, ToolOutput};
use agent_engine::{EventEnvelope, EventStream};

/// Model client that replays a scripted sequence of decisions.
#[derive(Default)]
pub struct ScriptedModel {
    decisions: Mutex<VecDeque<agent_engine::Result<ModelDecision>>>,
    responses: Mutex<VecDeque<String>>,
    pub last_respond_options: Mutex<Option<RespondOptions>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_answer(&self, text: &str) {
        self.decisions
            .lock()
            .unwrap()
            .push_back(Ok(ModelDecision::answer(text)));
    }

    pub fn script_tool_call(&self, correlation_id: &str, tool_id: &str, args: serde_json::Value) {
        self.decisions
            .lock()
            .unwrap()
            .push_back(Ok(ModelDecision::tool_call(correlation_id, tool_id, args)));
    }

    pub fn script_error(&self, error: agent_engine::Error) {
        self.decisions.lock().unwrap().push_back(Err(error));
    }

    pub fn script_response(&self, text: &str) {
        self.responses.lock().unwrap().push_back(text.to_string());
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn decide(
        &self,
        _query: &str,
        _catalog: &[ToolDefinition],
        _session: &SessionState,
    ) -> agent_engine::Result<ModelDecision> {
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelDecision::answer("out of script")))
    }

    async fn respond(
        &self,
        _query: &str,
        _catalog: &[ToolDefinition],
        _session: &SessionState,
        options: RespondOptions,
    ) -> agent_engine::Result<ModelResponse> {
        *self.last_respond_options.lock().unwrap() = Some(options);
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "forced answer".to_string());
        Ok(ModelResponse::new(text))
    }
}

/// Model client that stalls before answering, to hold a turn open.
pub struct StallModel {
    pub delay: Duration,
}

#[async_trait]
impl ModelClient for StallModel {
    async fn decide(
        &self,
        _query: &str,
        _catalog: &[ToolDefinition],
        _session: &SessionState,
    ) -> agent_engine::Result<ModelDecision> {
        tokio::time::sleep(self.delay).await;
        Ok(ModelDecision::answer("done waiting"))
    }

    async fn respond(
        &self,
        _query: &str,
        _catalog: &[ToolDefinition],
        _session: &SessionState,
        _options: RespondOptions,
    ) -> agent_engine::Result<ModelResponse> {
        Ok(ModelResponse::new("done waiting"))
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct PathArgs {
    pub path: String,
}

/// Directory listing stub.
pub struct LsTool;

#[async_trait]
impl TypedTool for LsTool {
    type Args = PathArgs;
    const ID: &'static str = "ls";
    const DESCRIPTION: &'static str = "List files in a directory";

    async fn run(
        &self,
        args: PathArgs,
        _context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(format!("{}: a.txt b.txt src/", args.path)))
    }
}

/// Permission-gated deletion stub.
pub struct DeleteTool;

#[async_trait]
impl TypedTool for DeleteTool {
    type Args = PathArgs;
    const ID: &'static str = "delete";
    const DESCRIPTION: &'static str = "Delete a file";
    const REQUIRES_PERMISSION: bool = true;

    async fn run(
        &self,
        args: PathArgs,
        _context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(format!("deleted {}", args.path)))
    }
}

/// Tool that always fails at execution time.
pub struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn id(&self) -> &str {
        "flaky"
    }

    fn describe(&self) -> ToolDefinition {
        ToolDefinition::new("flaky", "Fails every time", serde_json::json!({"type": "object"}))
    }

    fn validate(&self, _args: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        Err(ToolError::execution("disk read failed"))
    }
}

/// Tool that never finishes on its own; it ignores cancellation and is
/// only ever ended from outside.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn id(&self) -> &str {
        "slow"
    }

    fn describe(&self) -> ToolDefinition {
        ToolDefinition::new("slow", "Takes a very long time", serde_json::json!({"type": "object"}))
    }

    fn validate(&self, _args: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ToolOutput::text("finally"))
    }
}

/// Approval surface with a fixed verdict.
pub struct FixedUi {
    pub grant: bool,
}

#[async_trait]
impl PermissionUiHandler for FixedUi {
    async fn request_permission(&self, _tool_id: &str, _args: &serde_json::Value) -> bool {
        self.grant
    }
}

/// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Drain a stream until the turn-terminal loop event arrives.
pub async fn collect_until_loop_end(stream: &mut EventStream) -> Vec<EventEnvelope> {
    let mut events = Vec::new();
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event stream closed");
        let kind = envelope.event.kind();
        events.push(envelope);
        if matches!(kind, "loop-completed" | "loop-error" | "loop-aborted") {
            return events;
        }
    }
}

/// Assert `earlier` appears before `later` in the kind sequence.
pub fn assert_kind_order(events: &[EventEnvelope], earlier: &str, later: &str) {
    let kinds: Vec<&str> = events.iter().map(|e| e.event.kind()).collect();
    let first = kinds.iter().position(|k| *k == earlier);
    let second = kinds.iter().rposition(|k| *k == later);
    match (first, second) {
        (Some(a), Some(b)) if a < b => {}
        _ => panic!("expected {earlier} before {later}, got {kinds:?}"),
    }
}

pub fn kinds(events: &[EventEnvelope]) -> Vec<&str> {
    events.iter().map(|e| e.event.kind()).collect()
}
