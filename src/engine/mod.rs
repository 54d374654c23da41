//! Conversation loop and engine facade.

mod config;
mod metrics;
mod result;
mod runtime;
mod turn;

pub use config::{DEFAULT_MAX_ITERATIONS, EngineConfig, ExecutionConfig};
pub use metrics::{ToolStats, TurnMetrics};
pub use result::{TurnOutcome, TurnResult};
pub use runtime::{Engine, EngineBuilder};
