//! Canonical lifecycle of tool invocations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Error;
use crate::events::{EngineEvent, EventBus, EventEnvelope};
use crate::session::SessionId;

use super::preview::ExecutionPreview;
use super::state::{ExecutionStatus, PermissionRequestState, ToolExecutionState};

/// Owns every tool invocation's state machine and is its only mutator.
///
/// All other components observe the records through event snapshots;
/// none mutate them externally. Records persist for the session's
/// lifetime for audit and replay.
pub struct ToolExecutionManager {
    executions: Arc<DashMap<SessionId, HashMap<String, ToolExecutionState>>>,
    permissions: DashMap<Uuid, PermissionRequestState>,
    previews: Arc<DashMap<Uuid, ExecutionPreview>>,
    bus: Arc<EventBus>,
}

impl ToolExecutionManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            executions: Arc::new(DashMap::new()),
            permissions: DashMap::new(),
            previews: Arc::new(DashMap::new()),
            bus,
        }
    }

    /// Register a new invocation in `Pending`.
    ///
    /// Fails on a duplicate correlation id within the session.
    pub fn create_execution(
        &self,
        session_id: &SessionId,
        correlation_id: &str,
        tool_id: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> crate::Result<ToolExecutionState> {
        let snapshot = {
            let mut session = self.executions.entry(session_id.clone()).or_default();
            if session.contains_key(correlation_id) {
                return Err(Error::DuplicateExecution {
                    id: correlation_id.to_string(),
                });
            }
            let execution = ToolExecutionState::new(
                correlation_id,
                session_id.clone(),
                tool_id,
                tool_name,
                args,
            );
            session.insert(correlation_id.to_string(), execution.clone());
            execution
        };

        debug!(session_id = %session_id, execution_id = correlation_id, tool = tool_id, "Execution created");
        self.bus.publish(EventEnvelope::new(
            snapshot.created_at,
            EngineEvent::ExecutionCreated {
                execution: snapshot.clone(),
            },
        ));
        Ok(snapshot)
    }

    /// `Pending → Running`.
    pub fn start_execution(
        &self,
        session_id: &SessionId,
        execution_id: &str,
    ) -> crate::Result<ToolExecutionState> {
        let now = Utc::now();
        let snapshot = self.transition(session_id, execution_id, |execution| {
            if execution.status != ExecutionStatus::Pending {
                return Err(invalid_transition(execution));
            }
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(now);
            Ok(())
        })?;

        self.bus.publish(EventEnvelope::new(
            now,
            EngineEvent::ExecutionUpdated {
                execution: snapshot.clone(),
            },
        ));
        Ok(snapshot)
    }

    /// `Running → AwaitingPermission`, creating exactly one permission
    /// request for the execution.
    pub fn request_permission(
        &self,
        session_id: &SessionId,
        execution_id: &str,
    ) -> crate::Result<PermissionRequestState> {
        let (request, execution) = {
            let mut session = self
                .executions
                .get_mut(session_id)
                .ok_or_else(|| unknown_execution(execution_id))?;
            let execution = session
                .get_mut(execution_id)
                .ok_or_else(|| unknown_execution(execution_id))?;

            if execution.is_terminal() {
                return Err(Error::TerminalState {
                    id: execution.id.clone(),
                    status: execution.status,
                });
            }
            if execution.status != ExecutionStatus::Running || execution.permission_id.is_some() {
                return Err(invalid_transition(execution));
            }

            let request = PermissionRequestState::new(
                execution_id,
                session_id.clone(),
                execution.args.clone(),
            );
            execution.status = ExecutionStatus::AwaitingPermission;
            execution.permission_id = Some(request.id);
            self.permissions.insert(request.id, request.clone());
            (request, execution.clone())
        };

        debug!(
            session_id = %session_id,
            execution_id,
            permission_id = %request.id,
            "Permission requested"
        );
        self.bus.publish(EventEnvelope::new(
            request.requested_at,
            EngineEvent::PermissionRequested {
                request: request.clone(),
            },
        ));
        self.bus.publish(EventEnvelope::new(
            request.requested_at,
            EngineEvent::ExecutionUpdated { execution },
        ));
        Ok(request)
    }

    /// Resolve a pending permission request exactly once.
    ///
    /// Grant resumes the execution (`AwaitingPermission → Running`);
    /// denial fails it. A second resolution is a no-op failure.
    pub fn resolve_permission(
        &self,
        permission_id: Uuid,
        granted: bool,
        reason: Option<&str>,
    ) -> crate::Result<PermissionRequestState> {
        let now = Utc::now();
        let request = {
            let mut entry = self
                .permissions
                .get_mut(&permission_id)
                .ok_or(Error::UnknownPermission { id: permission_id })?;
            if entry.is_resolved() {
                return Err(Error::AlreadyResolved { id: permission_id });
            }
            entry.resolved_at = Some(now);
            entry.granted = Some(granted);
            entry.clone()
        };

        debug!(permission_id = %permission_id, granted, "Permission resolved");
        self.bus.publish(EventEnvelope::new(
            now,
            EngineEvent::PermissionResolved {
                request: request.clone(),
            },
        ));

        let resumed = self.transition(&request.session_id, &request.execution_id, |execution| {
            if execution.is_terminal() {
                // Aborted while waiting; the resolution is recorded but
                // the execution stays where it is.
                return Err(Error::TerminalState {
                    id: execution.id.clone(),
                    status: execution.status,
                });
            }
            if granted {
                execution.status = ExecutionStatus::Running;
            } else {
                execution.status = ExecutionStatus::Error;
                execution.error = Some(
                    reason
                        .map(str::to_string)
                        .unwrap_or_else(|| "denied by user".to_string()),
                );
                execution.ended_at = Some(now);
            }
            Ok(())
        });

        match resumed {
            Ok(execution) if granted => {
                self.bus.publish(EventEnvelope::new(
                    now,
                    EngineEvent::ExecutionUpdated { execution },
                ));
            }
            Ok(execution) => {
                self.bus.publish(EventEnvelope::new(
                    now,
                    EngineEvent::ExecutionError { execution },
                ));
            }
            Err(e) => {
                debug!(permission_id = %permission_id, error = %e, "Resolution left execution untouched");
            }
        }

        Ok(request)
    }

    /// Terminal success. Triggers best-effort preview generation that
    /// cannot affect the completion signal.
    pub fn complete_execution(
        &self,
        session_id: &SessionId,
        execution_id: &str,
        result: String,
    ) -> crate::Result<ToolExecutionState> {
        let now = Utc::now();
        let snapshot = self.transition(session_id, execution_id, |execution| {
            if execution.is_terminal() {
                return Err(Error::TerminalState {
                    id: execution.id.clone(),
                    status: execution.status,
                });
            }
            execution.status = ExecutionStatus::Completed;
            execution.result = Some(result.clone());
            execution.ended_at = Some(now);
            Ok(())
        })?;

        debug!(
            session_id = %session_id,
            execution_id,
            elapsed_ms = snapshot.elapsed_ms(),
            "Execution completed"
        );
        self.bus.publish(EventEnvelope::new(
            now,
            EngineEvent::ExecutionCompleted {
                execution: snapshot.clone(),
            },
        ));
        self.spawn_preview(snapshot.clone());
        Ok(snapshot)
    }

    /// Terminal failure.
    pub fn fail_execution(
        &self,
        session_id: &SessionId,
        execution_id: &str,
        error: impl Into<String>,
    ) -> crate::Result<ToolExecutionState> {
        let now = Utc::now();
        let error = error.into();
        let snapshot = self.transition(session_id, execution_id, |execution| {
            if execution.is_terminal() {
                return Err(Error::TerminalState {
                    id: execution.id.clone(),
                    status: execution.status,
                });
            }
            execution.status = ExecutionStatus::Error;
            execution.error = Some(error.clone());
            execution.ended_at = Some(now);
            Ok(())
        })?;

        debug!(session_id = %session_id, execution_id, error = %error, "Execution failed");
        self.bus.publish(EventEnvelope::new(
            now,
            EngineEvent::ExecutionError {
                execution: snapshot.clone(),
            },
        ));
        Ok(snapshot)
    }

    /// External cancellation. Idempotent on already-terminal executions.
    pub fn abort_execution(
        &self,
        session_id: &SessionId,
        execution_id: &str,
    ) -> crate::Result<ToolExecutionState> {
        let now = Utc::now();
        let mut already_terminal = false;
        let snapshot = self.transition(session_id, execution_id, |execution| {
            if execution.is_terminal() {
                already_terminal = true;
                return Ok(());
            }
            execution.status = ExecutionStatus::Aborted;
            execution.ended_at = Some(now);
            Ok(())
        })?;

        if !already_terminal {
            debug!(session_id = %session_id, execution_id, "Execution aborted");
            self.bus.publish(EventEnvelope::new(
                now,
                EngineEvent::ExecutionAborted {
                    execution: snapshot.clone(),
                },
            ));
        }
        Ok(snapshot)
    }

    /// Abort every non-terminal execution of a session.
    pub fn abort_session(&self, session_id: &SessionId) -> Vec<ToolExecutionState> {
        let in_flight: Vec<String> = self
            .executions
            .get(session_id)
            .map(|session| {
                session
                    .values()
                    .filter(|execution| !execution.is_terminal())
                    .map(|execution| execution.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        in_flight
            .iter()
            .filter_map(|id| self.abort_execution(session_id, id).ok())
            .collect()
    }

    pub fn execution(
        &self,
        session_id: &SessionId,
        execution_id: &str,
    ) -> Option<ToolExecutionState> {
        self.executions
            .get(session_id)
            .and_then(|session| session.get(execution_id).cloned())
    }

    /// All records for a session, oldest first.
    pub fn executions_for(&self, session_id: &SessionId) -> Vec<ToolExecutionState> {
        let mut records: Vec<ToolExecutionState> = self
            .executions
            .get(session_id)
            .map(|session| session.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|execution| execution.created_at);
        records
    }

    pub fn permissions_for(&self, session_id: &SessionId) -> Vec<PermissionRequestState> {
        let mut records: Vec<PermissionRequestState> = self
            .permissions
            .iter()
            .filter(|entry| &entry.session_id == session_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|request| request.requested_at);
        records
    }

    pub fn preview(&self, preview_id: &Uuid) -> Option<ExecutionPreview> {
        self.previews.get(preview_id).map(|entry| entry.clone())
    }

    /// Snapshot replay for a late-joining observer: current state of every
    /// in-flight execution, then every pending permission request.
    pub fn backlog(&self, session_id: &SessionId) -> Vec<EventEnvelope> {
        let mut backlog: Vec<EventEnvelope> = self
            .executions_for(session_id)
            .into_iter()
            .filter(|execution| !execution.is_terminal())
            .map(|execution| {
                EventEnvelope::new(
                    execution.last_transition_at(),
                    EngineEvent::ExecutionUpdated { execution },
                )
            })
            .collect();
        backlog.extend(
            self.permissions_for(session_id)
                .into_iter()
                .filter(|request| !request.is_resolved())
                .map(|request| {
                    EventEnvelope::new(
                        request.requested_at,
                        EngineEvent::PermissionRequested { request },
                    )
                }),
        );
        backlog
    }

    /// Rebuild in-memory state from persisted records. Emits no events.
    pub fn restore(
        &self,
        executions: Vec<ToolExecutionState>,
        permissions: Vec<PermissionRequestState>,
    ) {
        for execution in executions {
            self.executions
                .entry(execution.session_id.clone())
                .or_default()
                .insert(execution.id.clone(), execution);
        }
        for request in permissions {
            self.permissions.insert(request.id, request);
        }
    }

    fn transition<F>(
        &self,
        session_id: &SessionId,
        execution_id: &str,
        apply: F,
    ) -> crate::Result<ToolExecutionState>
    where
        F: FnOnce(&mut ToolExecutionState) -> crate::Result<()>,
    {
        let mut session = self
            .executions
            .get_mut(session_id)
            .ok_or_else(|| unknown_execution(execution_id))?;
        let execution = session
            .get_mut(execution_id)
            .ok_or_else(|| unknown_execution(execution_id))?;
        apply(execution)?;
        Ok(execution.clone())
    }

    fn spawn_preview(&self, execution: ToolExecutionState) {
        let executions = Arc::clone(&self.executions);
        let previews = Arc::clone(&self.previews);
        let bus = Arc::clone(&self.bus);

        tokio::spawn(async move {
            let Some(preview) = ExecutionPreview::from_execution(&execution) else {
                return;
            };
            let preview_id = preview.id;
            previews.insert(preview_id, preview);

            let attached = executions
                .get_mut(&execution.session_id)
                .and_then(|mut session| {
                    session.get_mut(&execution.id).map(|record| {
                        record.preview_id = Some(preview_id);
                        record.clone()
                    })
                });

            match attached {
                Some(record) => {
                    bus.publish(EventEnvelope::now(EngineEvent::ExecutionUpdated {
                        execution: record,
                    }));
                }
                None => {
                    warn!(execution_id = %execution.id, "Preview generated for unknown execution");
                }
            }
        });
    }
}

fn unknown_execution(id: &str) -> Error {
    Error::UnknownExecution { id: id.to_string() }
}

fn invalid_transition(execution: &ToolExecutionState) -> Error {
    Error::InvalidTransition {
        id: execution.id.clone(),
        from: execution.status,
    }
}
