//! The conversation loop: one query driven to completion.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::Error;
use crate::events::{EngineEvent, EventEnvelope};
use crate::model::{ModelAction, RespondOptions, ToolCallRequest};
use crate::permission::GateVerdict;
use crate::session::{SessionId, SessionState};
use crate::tools::ExecutionContext;
use crate::types::{ContentBlock, ToolDefinition, ToolError, ToolResultBlock, ToolUseBlock};

use super::metrics::TurnMetrics;
use super::result::{TurnOutcome, TurnResult};
use super::runtime::{Engine, TurnGuard};

struct TurnCtx<'a> {
    session_id: &'a SessionId,
    session: &'a Arc<RwLock<SessionState>>,
    query: &'a str,
    catalog: &'a [ToolDefinition],
    cancel: &'a CancellationToken,
}

#[derive(Default)]
struct TurnProgress {
    correlation_ids: Vec<String>,
    successes: usize,
}

enum StepOutcome {
    Continue,
    Finished(TurnOutcome),
}

impl Engine {
    /// Drive one query to completion.
    ///
    /// Fails fast with [`Error::Busy`] when a turn is already active for
    /// the session. Loop-level failures and aborts are reported inside
    /// the returned [`TurnResult`], not as `Err`.
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        query: &str,
    ) -> crate::Result<TurnResult> {
        let guard = self.acquire_turn(session_id)?;
        self.run_guarded(guard, session_id, query).await
    }

    #[instrument(skip(self, _guard, query), fields(session_id = %session_id))]
    pub(crate) async fn run_guarded(
        &self,
        _guard: TurnGuard,
        session_id: &SessionId,
        query: &str,
    ) -> crate::Result<TurnResult> {
        let session = self.session_handle(session_id)?;

        // Accepting the query clears any stored abort exactly once and
        // hands this turn its cancellation context.
        let cancel = self.inner.aborts.accept(session_id);
        {
            let mut state = session.write().await;
            state.clear_aborted();
            state.push_user_query(query);
        }

        let started = Instant::now();
        info!(query_len = query.len(), "Turn started");
        self.publish_loop(EngineEvent::LoopStarted {
            session_id: session_id.clone(),
            query: query.to_string(),
        });

        let catalog = self.inner.tools.catalog();
        let ctx = TurnCtx {
            session_id,
            session: &session,
            query,
            catalog: &catalog,
            cancel: &cancel,
        };
        let mut metrics = TurnMetrics::default();
        let mut progress = TurnProgress::default();

        let outcome = self.drive(&ctx, &mut metrics, &mut progress).await;
        metrics.execution_time_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            TurnOutcome::Answer(text) => {
                info!(
                    iterations = metrics.iterations,
                    tool_calls = metrics.tool_calls,
                    total_tokens = metrics.total_tokens(),
                    "Turn completed"
                );
                self.publish_loop(EngineEvent::LoopCompleted {
                    session_id: session_id.clone(),
                    response: text.clone(),
                    iterations: metrics.iterations,
                });
            }
            TurnOutcome::Failed(message) => {
                warn!(error = %message, "Turn failed");
                self.publish_loop(EngineEvent::LoopError {
                    session_id: session_id.clone(),
                    message: message.clone(),
                });
            }
            TurnOutcome::Aborted => {
                info!("Turn aborted");
                self.publish_loop(EngineEvent::LoopAborted {
                    session_id: session_id.clone(),
                });
            }
        }

        self.save_session(session_id).await;

        let invocations = progress
            .correlation_ids
            .iter()
            .filter_map(|id| self.inner.manager.execution(session_id, id))
            .collect();

        Ok(TurnResult {
            session_id: session_id.clone(),
            outcome,
            invocations,
            iterations: metrics.iterations,
            metrics,
        })
    }

    async fn drive(
        &self,
        ctx: &TurnCtx<'_>,
        metrics: &mut TurnMetrics,
        progress: &mut TurnProgress,
    ) -> TurnOutcome {
        let max_iterations = self.inner.config.execution.max_iterations;

        loop {
            if ctx.cancel.is_cancelled() {
                return self.aborted_cleanup(ctx).await;
            }
            if metrics.iterations >= max_iterations {
                warn!(max = max_iterations, "Iteration ceiling reached");
                break;
            }

            let snapshot = ctx.session.read().await.clone();
            let decision = match self
                .inner
                .model
                .decide(ctx.query, ctx.catalog, &snapshot)
                .await
            {
                Ok(decision) => decision,
                Err(e) => return TurnOutcome::Failed(e.to_string()),
            };
            metrics.record_model_call();
            metrics.add_usage(&decision.usage);
            ctx.session.write().await.update_usage(&decision.usage);

            if ctx.cancel.is_cancelled() {
                return self.aborted_cleanup(ctx).await;
            }

            match decision.action {
                ModelAction::Answer(text) => {
                    ctx.session.write().await.push_assistant_text(&text);
                    return TurnOutcome::Answer(text);
                }
                ModelAction::ToolCall(call) => {
                    metrics.iterations += 1;
                    debug!(
                        iteration = metrics.iterations,
                        tool = %call.tool_id,
                        "Tool iteration"
                    );
                    match self.invoke_tool(ctx, &call, metrics, progress).await {
                        StepOutcome::Continue => {}
                        StepOutcome::Finished(outcome) => return outcome,
                    }
                }
            }
        }

        // Ceiling reached with no answer: force one final response.
        self.forced_answer(ctx, metrics, RespondOptions::must_answer())
            .await
    }

    async fn invoke_tool(
        &self,
        ctx: &TurnCtx<'_>,
        call: &ToolCallRequest,
        metrics: &mut TurnMetrics,
        progress: &mut TurnProgress,
    ) -> StepOutcome {
        let Some(tool) = self.inner.tools.get(&call.tool_id).map(Arc::clone) else {
            // Catalog mismatch is not transient: fail the whole turn
            // without creating an execution record.
            return StepOutcome::Finished(TurnOutcome::Failed(
                Error::UnknownTool {
                    name: call.tool_id.clone(),
                }
                .to_string(),
            ));
        };
        let definition = tool.describe();

        {
            let mut state = ctx.session.write().await;
            state.record_tool_choice(&call.tool_id, &call.correlation_id, call.args.clone());
            state.push_assistant_content(vec![ContentBlock::ToolUse(ToolUseBlock {
                id: call.correlation_id.clone(),
                name: definition.name.clone(),
                input: call.args.clone(),
            })]);
        }
        progress.correlation_ids.push(call.correlation_id.clone());

        let created = self
            .inner
            .manager
            .create_execution(
                ctx.session_id,
                &call.correlation_id,
                &call.tool_id,
                &definition.name,
                call.args.clone(),
            )
            .and_then(|_| {
                self.inner
                    .manager
                    .start_execution(ctx.session_id, &call.correlation_id)
            });
        if let Err(e) = created {
            let message = e.to_string();
            self.append_error_result(ctx, &call.correlation_id, &message)
                .await;
            return StepOutcome::Finished(TurnOutcome::Failed(message));
        }

        // Argument validation failures are the self-correction path: the
        // synthetic tool_result carries the message back to the model and
        // the loop re-prompts for corrected arguments.
        if let Err(message) = tool.validate(&call.args) {
            let message = Error::Validation(message).to_string();
            debug!(tool = %call.tool_id, error = %message, "Arguments rejected, re-prompting");
            let _ = self
                .inner
                .manager
                .fail_execution(ctx.session_id, &call.correlation_id, &message);
            self.append_error_result(ctx, &call.correlation_id, &message)
                .await;
            metrics.record_tool(&definition.name, 0, true);
            return StepOutcome::Continue;
        }

        if tool.requires_permission() && !self.inner.config.permissions.auto_approves(&call.tool_id)
        {
            match self
                .gate_invocation(ctx, call, &definition.name, metrics, progress)
                .await
            {
                StepOutcome::Continue => {}
                finished => return finished,
            }
        } else if tool.requires_permission() {
            debug!(tool = %call.tool_id, "Auto-approved by policy");
        }

        let context = ExecutionContext::new(ctx.session_id.clone(), ctx.cancel.clone());
        let start = Instant::now();
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return StepOutcome::Finished(self.aborted_cleanup(ctx).await);
            }
            result = tool.execute(call.args.clone(), &context) => result,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let rendered = output.render();
                if self
                    .inner
                    .manager
                    .complete_execution(ctx.session_id, &call.correlation_id, rendered.clone())
                    .is_err()
                {
                    // The record went terminal underneath us — the session
                    // was aborted while the tool ran to physical
                    // completion. Discard the result.
                    return StepOutcome::Finished(self.aborted_cleanup(ctx).await);
                }
                ctx.session
                    .write()
                    .await
                    .push_tool_results(vec![ToolResultBlock::success(
                        &call.correlation_id,
                        rendered,
                    )]);
                metrics.record_tool(&definition.name, duration_ms, false);
                progress.successes += 1;
                StepOutcome::Continue
            }
            Err(ToolError::Validation(message)) => {
                let message = Error::Validation(message).to_string();
                let _ = self
                    .inner
                    .manager
                    .fail_execution(ctx.session_id, &call.correlation_id, &message);
                self.append_error_result(ctx, &call.correlation_id, &message)
                    .await;
                metrics.record_tool(&definition.name, duration_ms, true);
                StepOutcome::Continue
            }
            Err(ToolError::Execution(message)) => {
                if ctx.cancel.is_cancelled() {
                    return StepOutcome::Finished(self.aborted_cleanup(ctx).await);
                }
                let _ = self
                    .inner
                    .manager
                    .fail_execution(ctx.session_id, &call.correlation_id, &message);
                self.append_error_result(ctx, &call.correlation_id, &message)
                    .await;
                metrics.record_tool(&definition.name, duration_ms, true);

                if progress.successes > 0 {
                    StepOutcome::Finished(
                        self.forced_answer(ctx, metrics, RespondOptions::best_effort())
                            .await,
                    )
                } else {
                    StepOutcome::Finished(TurnOutcome::Failed(message))
                }
            }
        }
    }

    /// Suspend the invocation at the permission gate.
    async fn gate_invocation(
        &self,
        ctx: &TurnCtx<'_>,
        call: &ToolCallRequest,
        tool_name: &str,
        metrics: &mut TurnMetrics,
        progress: &TurnProgress,
    ) -> StepOutcome {
        let request = match self
            .inner
            .manager
            .request_permission(ctx.session_id, &call.correlation_id)
        {
            Ok(request) => request,
            Err(e) => {
                let message = e.to_string();
                self.append_error_result(ctx, &call.correlation_id, &message)
                    .await;
                return StepOutcome::Finished(TurnOutcome::Failed(message));
            }
        };
        let rx = self.inner.gate.register(request.id);

        if let Some(ui) = self.inner.ui.clone() {
            let engine = self.clone();
            let tool_id = call.tool_id.clone();
            let args = call.args.clone();
            let permission_id = request.id;
            tokio::spawn(async move {
                let granted = ui.request_permission(&tool_id, &args).await;
                engine.resolve_permission(permission_id, granted);
            });
        }

        let timeout = self.inner.config.execution.permission_timeout;
        let verdict = self.inner.gate.wait(request.id, rx, ctx.cancel, timeout).await;

        match verdict {
            GateVerdict::Granted => StepOutcome::Continue,
            GateVerdict::Denied | GateVerdict::TimedOut => {
                if verdict == GateVerdict::TimedOut {
                    let _ = self.inner.manager.resolve_permission(
                        request.id,
                        false,
                        Some("permission request timed out"),
                    );
                }
                let reason = self
                    .inner
                    .manager
                    .execution(ctx.session_id, &call.correlation_id)
                    .and_then(|execution| execution.error)
                    .unwrap_or_else(|| "Permission denied".to_string());
                let message = Error::PermissionDenied {
                    reason: reason.clone(),
                }
                .to_string();
                self.append_error_result(ctx, &call.correlation_id, &message)
                    .await;
                metrics.record_tool(tool_name, 0, true);

                // Denial sinks the turn only when it was the sole action.
                if progress.successes > 0 {
                    StepOutcome::Finished(
                        self.forced_answer(ctx, metrics, RespondOptions::best_effort())
                            .await,
                    )
                } else {
                    StepOutcome::Finished(TurnOutcome::Failed(message))
                }
            }
            GateVerdict::Aborted => StepOutcome::Finished(self.aborted_cleanup(ctx).await),
        }
    }

    /// Ask the model for a final response outside the normal decide step.
    async fn forced_answer(
        &self,
        ctx: &TurnCtx<'_>,
        metrics: &mut TurnMetrics,
        options: RespondOptions,
    ) -> TurnOutcome {
        if options.best_effort {
            info!("Falling back to a best-effort answer from partial results");
        }
        let snapshot = ctx.session.read().await.clone();
        match self
            .inner
            .model
            .respond(ctx.query, ctx.catalog, &snapshot, options)
            .await
        {
            Ok(response) => {
                metrics.record_model_call();
                metrics.add_usage(&response.usage);
                let mut state = ctx.session.write().await;
                state.update_usage(&response.usage);
                state.push_assistant_text(&response.text);
                TurnOutcome::Answer(response.text)
            }
            Err(e) => TurnOutcome::Failed(e.to_string()),
        }
    }

    /// Wind the turn down after a detected abort, leaving history
    /// pairing-consistent.
    async fn aborted_cleanup(&self, ctx: &TurnCtx<'_>) -> TurnOutcome {
        self.inner.manager.abort_session(ctx.session_id);

        let mut state = ctx.session.write().await;
        let unpaired: Vec<String> = state
            .unpaired_tool_uses()
            .into_iter()
            .map(str::to_string)
            .collect();
        if !unpaired.is_empty() {
            state.push_tool_results(
                unpaired
                    .into_iter()
                    .map(|id| ToolResultBlock::error(id, "Aborted"))
                    .collect(),
            );
        }
        let at = self
            .inner
            .aborts
            .abort_time(ctx.session_id)
            .unwrap_or_else(Utc::now);
        state.mark_aborted(at);
        state.record_tool_error("Aborted");

        TurnOutcome::Aborted
    }

    async fn append_error_result(&self, ctx: &TurnCtx<'_>, correlation_id: &str, message: &str) {
        let mut state = ctx.session.write().await;
        state.push_tool_results(vec![ToolResultBlock::error(correlation_id, message)]);
        state.record_tool_error(message);
    }

    async fn save_session(&self, session_id: &SessionId) {
        let Some(persistence) = self.inner.persistence.clone() else {
            return;
        };
        match self.snapshot(session_id) {
            Ok(snapshot) => {
                if let Err(e) = persistence.save(&snapshot).await {
                    warn!(session_id = %session_id, error = %e, "Session save failed");
                }
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "Session snapshot failed"),
        }
    }

    fn publish_loop(&self, event: EngineEvent) {
        self.inner.bus.publish(EventEnvelope::now(event));
    }
}
