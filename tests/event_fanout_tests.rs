//! Observer fan-out and delegated persistence at the engine surface.

mod common;

use std::sync::Arc;

use agent_engine::session::{MemoryPersistence, Persistence};
use agent_engine::{Engine, EngineConfig, ToolRegistry};

use common::{LsTool, ScriptedModel, collect_until_loop_end, kinds};

fn engine_with(model: Arc<ScriptedModel>) -> Engine {
    Engine::builder()
        .model(model)
        .tools(ToolRegistry::new().with_tool(Arc::new(LsTool)))
        .config(EngineConfig::default())
        .build()
        .unwrap()
}

#[tokio::test]
async fn every_observer_sees_the_same_ordered_stream() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "ls", serde_json::json!({"path": "."}));
    model.script_answer("done");

    let engine = engine_with(model);
    let session_id = engine.create_session();
    let mut first = engine.subscribe(&session_id);
    let mut second = engine.subscribe(&session_id);

    engine.run_turn(&session_id, "list").await.unwrap();

    let first_events = collect_until_loop_end(&mut first).await;
    let second_events = collect_until_loop_end(&mut second).await;
    assert_eq!(kinds(&first_events), kinds(&second_events));
}

#[tokio::test]
async fn dropped_observer_does_not_block_the_rest() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "ls", serde_json::json!({"path": "."}));
    model.script_answer("done");

    let engine = engine_with(model);
    let session_id = engine.create_session();

    let gone = engine.subscribe(&session_id);
    let mut live = engine.subscribe(&session_id);
    drop(gone);

    engine.run_turn(&session_id, "list").await.unwrap();

    let events = collect_until_loop_end(&mut live).await;
    assert!(kinds(&events).contains(&"loop-completed"));
}

#[tokio::test]
async fn cross_session_streams_stay_separate() {
    let model = ScriptedModel::new();
    model.script_answer("one");
    model.script_answer("two");

    let engine = engine_with(model);
    let a = engine.create_session();
    let b = engine.create_session();
    let mut stream_a = engine.subscribe(&a);
    let mut stream_b = engine.subscribe(&b);

    engine.run_turn(&a, "first").await.unwrap();
    engine.run_turn(&b, "second").await.unwrap();

    let events_a = collect_until_loop_end(&mut stream_a).await;
    let events_b = collect_until_loop_end(&mut stream_b).await;
    assert!(events_a.iter().all(|e| e.event.session_id() == &a));
    assert!(events_b.iter().all(|e| e.event.session_id() == &b));
}

#[tokio::test]
async fn configured_persistence_receives_turn_snapshots() {
    let model = ScriptedModel::new();
    model.script_tool_call("call_1", "ls", serde_json::json!({"path": "."}));
    model.script_answer("saved");

    let store = Arc::new(MemoryPersistence::new());
    let engine = Engine::builder()
        .model(model)
        .tools(ToolRegistry::new().with_tool(Arc::new(LsTool)))
        .persistence(store.clone())
        .build()
        .unwrap();
    let session_id = engine.create_session();

    engine.run_turn(&session_id, "list").await.unwrap();

    let saved = store.load(&session_id).await.unwrap().expect("saved");
    assert_eq!(saved.session.id, session_id);
    assert_eq!(saved.executions.len(), 1);
    assert!(saved.session.unpaired_tool_uses().is_empty());
}
