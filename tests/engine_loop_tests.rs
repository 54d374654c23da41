//! Conversation loop behavior: tool iterations, self-correction, failure
//! fallback, busy rejection, and the iteration ceiling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_engine::{Engine, EngineConfig, ExecutionStatus, ToolRegistry};

use common::{
    FlakyTool, LsTool, ScriptedModel, StallModel, assert_kind_order, collect_until_loop_end, kinds,
};

fn engine_with(model: Arc<ScriptedModel>, config: EngineConfig) -> Engine {
    Engine::builder()
        .model(model)
        .tools(
            ToolRegistry::new()
                .with_tool(Arc::new(LsTool))
                .with_tool(Arc::new(FlakyTool)),
        )
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn single_tool_call_turn() {
    common::init_tracing();
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "ls", serde_json::json!({"path": "."}));
    model.script_answer("The directory holds a.txt, b.txt and src/.");

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();
    let mut events = engine.subscribe(&session_id);

    let result = engine.run_turn(&session_id, "list files").await.unwrap();

    assert_eq!(
        result.outcome.text(),
        Some("The directory holds a.txt, b.txt and src/.")
    );
    assert_eq!(result.iterations, 1);
    assert_eq!(result.invocations.len(), 1);
    assert_eq!(result.invocations[0].status, ExecutionStatus::Completed);
    assert_eq!(result.invocations[0].tool_id, "ls");
    assert!(result.invocations[0].elapsed_ms().is_some());

    let events = collect_until_loop_end(&mut events).await;
    assert_eq!(kinds(&events)[0], "loop-started");
    assert_kind_order(&events, "execution-created", "execution-completed");
    assert_kind_order(&events, "execution-completed", "loop-completed");
}

#[tokio::test]
async fn unknown_tool_fails_turn_without_execution() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "frobnicate", serde_json::json!({}));

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();
    let mut events = engine.subscribe(&session_id);

    let result = engine.run_turn(&session_id, "frob it").await.unwrap();

    assert_eq!(result.outcome.error(), Some("Tool frobnicate not found"));
    assert!(result.invocations.is_empty());

    let events = collect_until_loop_end(&mut events).await;
    let kinds = kinds(&events);
    assert!(kinds.contains(&"loop-error"));
    assert!(!kinds.contains(&"execution-created"));
}

#[tokio::test]
async fn validation_failure_recovers_with_corrective_reprompt() {
    let model = ScriptedModel::new();
    // Missing `path`; the synthetic error result prompts a corrected call.
    model.script_tool_call("call_1", "ls", serde_json::json!({}));
    model.script_tool_call("call_2", "ls", serde_json::json!({"path": "."}));
    model.script_answer("Two entries and a directory.");

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();

    let result = engine.run_turn(&session_id, "list files").await.unwrap();

    assert!(result.outcome.is_answer());
    assert_eq!(result.invocations.len(), 2);
    assert_eq!(result.invocations[0].status, ExecutionStatus::Error);
    assert!(
        result.invocations[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid args")
    );
    assert_eq!(result.invocations[1].status, ExecutionStatus::Completed);

    // History stayed pairing-consistent through the recovery.
    let snapshot = engine.snapshot(&session_id).unwrap();
    assert!(snapshot.session.unpaired_tool_uses().is_empty());
}

#[tokio::test]
async fn tool_failure_with_no_progress_propagates() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "flaky", serde_json::json!({}));

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();

    let result = engine.run_turn(&session_id, "read the disk").await.unwrap();

    assert_eq!(result.outcome.error(), Some("disk read failed"));
    assert_eq!(result.invocations[0].status, ExecutionStatus::Error);
}

#[tokio::test]
async fn tool_failure_after_progress_falls_back_to_best_effort() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "ls", serde_json::json!({"path": "."}));
    model.script_tool_call("call_2", "flaky", serde_json::json!({}));
    model.script_response("Partial answer from the listing alone.");

    let engine = engine_with(model.clone(), EngineConfig::default());
    let session_id = engine.create_session();

    let result = engine.run_turn(&session_id, "inspect").await.unwrap();

    assert_eq!(
        result.outcome.text(),
        Some("Partial answer from the listing alone.")
    );
    let options = model.last_respond_options.lock().unwrap().unwrap();
    assert!(options.best_effort);
    assert!(!options.must_answer);
}

#[tokio::test]
async fn iteration_ceiling_forces_final_answer() {
    let model = ScriptedModel::new();
    for i in 0..5 {
        model.script_tool_call(&format!("call_{i}"), "ls", serde_json::json!({"path": "."}));
    }
    model.script_response("Answering with what I have.");

    let engine = engine_with(model.clone(), EngineConfig::new().with_max_iterations(3));
    let session_id = engine.create_session();

    let result = engine.run_turn(&session_id, "keep digging").await.unwrap();

    assert_eq!(result.iterations, 3);
    assert_eq!(result.outcome.text(), Some("Answering with what I have."));
    let options = model.last_respond_options.lock().unwrap().unwrap();
    assert!(options.must_answer);
}

#[tokio::test]
async fn second_query_while_processing_is_rejected_busy() {
    let engine = Engine::builder()
        .model(Arc::new(StallModel {
            delay: Duration::from_millis(300),
        }))
        .build()
        .unwrap();
    let session_id = engine.create_session();
    let mut events = engine.subscribe(&session_id);

    engine.submit_query(&session_id, "first").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine.submit_query(&session_id, "second").unwrap_err();
    assert!(err.is_busy());

    let events = collect_until_loop_end(&mut events).await;
    let started = kinds(&events)
        .iter()
        .filter(|k| **k == "loop-started")
        .count();
    assert_eq!(started, 1, "busy rejection must not emit loop-started");
}

#[tokio::test]
async fn provider_error_surfaces_as_turn_failure() {
    let model = ScriptedModel::new();
    model.script_error(agent_engine::Error::Provider("upstream overloaded".into()));

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();

    let result = engine.run_turn(&session_id, "anything").await.unwrap();
    assert_eq!(
        result.outcome.error(),
        Some("Model provider error: upstream overloaded")
    );
}

#[tokio::test]
async fn repeated_query_text_not_duplicated_in_history() {
    let model = ScriptedModel::new();
    model.script_answer("first");
    model.script_answer("second");

    let engine = engine_with(model, EngineConfig::default());
    let session_id = engine.create_session();

    engine.run_turn(&session_id, "hello").await.unwrap();
    engine.run_turn(&session_id, "hello").await.unwrap();

    let snapshot = engine.snapshot(&session_id).unwrap();
    let user_turns = snapshot
        .session
        .messages
        .iter()
        .filter(|m| m.role == agent_engine::Role::User)
        .count();
    // "hello", "first", "hello"... the second "hello" follows an assistant
    // message, so it is appended again; only consecutive repeats collapse.
    assert_eq!(user_turns, 2);
    assert_eq!(snapshot.session.messages.len(), 4);
}
