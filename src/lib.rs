//! # agent-engine
//!
//! Execution engine for a tool-using, language-model-backed assistant:
//! the iterative tool-call loop, the per-invocation state machine with
//! interactive permission gating, cooperative cancellation, and ordered
//! event fan-out to every attached observer.
//!
//! Concrete tools, the model wire protocol, and storage formats are
//! external collaborators behind the [`tools::Tool`], [`model::ModelClient`]
//! and [`session::Persistence`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_engine::{Engine, EngineConfig};
//!
//! # async fn example(model: Arc<dyn agent_engine::model::ModelClient>) -> agent_engine::Result<()> {
//! let engine = Engine::builder()
//!     .model(model)
//!     .config(EngineConfig::new().with_max_iterations(10))
//!     .build()?;
//!
//! let session_id = engine.create_session();
//! let mut events = engine.subscribe(&session_id);
//!
//! engine.submit_query(&session_id, "list the files here")?;
//! while let Some(envelope) = events.recv().await {
//!     println!("{}", envelope.event.kind());
//! }
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod abort;
pub mod engine;
pub mod events;
pub mod execution;
pub mod model;
pub mod permission;
pub mod session;
pub mod tools;
pub mod types;

// Re-exports for convenience
pub use abort::AbortRegistry;
pub use engine::{
    DEFAULT_MAX_ITERATIONS, Engine, EngineBuilder, EngineConfig, ExecutionConfig, ToolStats,
    TurnMetrics, TurnOutcome, TurnResult,
};
pub use events::{EngineEvent, EventBus, EventEnvelope, EventStream};
pub use execution::{
    ExecutionPreview, ExecutionStatus, PermissionRequestState, ToolExecutionManager,
    ToolExecutionState,
};
pub use model::{
    ModelAction, ModelClient, ModelDecision, ModelResponse, PermissionUiHandler, RespondOptions,
    ToolCallRequest,
};
pub use permission::{GateVerdict, PermissionGate, PermissionMode, PermissionPolicy};
pub use session::{
    LearningContext, MemoryPersistence, Persistence, SessionId, SessionSnapshot, SessionState,
};
pub use tools::{ExecutionContext, Tool, ToolRegistry, TypedTool};
pub use types::{
    ContentBlock, Message, Role, TokenUsage, ToolDefinition, ToolError, ToolOutput,
    ToolResultBlock, ToolUseBlock,
};

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Tool arguments failed validation. Recovered in place via a
    /// corrective re-prompt, never fatal for the turn.
    #[error("Invalid args: {0}")]
    Validation(String),

    /// The model chose a tool that is not in the catalog. Fatal for the
    /// turn; the mismatch is not transient.
    #[error("Tool {name} not found")]
    UnknownTool { name: String },

    /// Interactive approval was denied or timed out.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The model provider failed. Fatal for the turn.
    #[error("Model provider error: {0}")]
    Provider(String),

    /// The turn was aborted. A normal terminal outcome, not a failure.
    #[error("Turn aborted")]
    Aborted,

    /// A query arrived while one was already being processed.
    #[error("Session {id} is busy processing another query")]
    Busy { id: session::SessionId },

    /// Correlation id reuse within a session.
    #[error("Duplicate correlation id: {id}")]
    DuplicateExecution { id: String },

    /// Transition attempted out of a terminal status.
    #[error("Execution {id} is already terminal ({status:?})")]
    TerminalState {
        id: String,
        status: execution::ExecutionStatus,
    },

    /// Transition attempted from an incompatible non-terminal status.
    #[error("Execution {id} cannot transition from {from:?}")]
    InvalidTransition {
        id: String,
        from: execution::ExecutionStatus,
    },

    /// Second resolution of an already-resolved permission request.
    #[error("Permission request {id} already resolved")]
    AlreadyResolved { id: uuid::Uuid },

    #[error("Unknown permission request: {id}")]
    UnknownPermission { id: uuid::Uuid },

    #[error("Unknown execution: {id}")]
    UnknownExecution { id: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error category for unified handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recovered in place by the loop (validation re-prompt)
    Recoverable,
    /// Ends the current turn and is surfaced to the caller
    TurnFatal,
    /// Normal lifecycle signals (abort, busy rejection)
    Lifecycle,
    /// State-machine misuse (duplicate ids, terminal transitions)
    State,
    /// Configuration, serialization, or IO problems
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Recoverable,

            Error::UnknownTool { .. } | Error::PermissionDenied { .. } | Error::Provider(_) => {
                ErrorCategory::TurnFatal
            }

            Error::Aborted | Error::Busy { .. } => ErrorCategory::Lifecycle,

            Error::DuplicateExecution { .. }
            | Error::TerminalState { .. }
            | Error::InvalidTransition { .. }
            | Error::AlreadyResolved { .. }
            | Error::UnknownPermission { .. }
            | Error::UnknownExecution { .. } => ErrorCategory::State,

            Error::Session(_) | Error::Config(_) | Error::Json(_) | Error::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }

    pub fn is_turn_fatal(&self) -> bool {
        self.category() == ErrorCategory::TurnFatal
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
