//! Engine facade: sessions, exposed operations, and wiring.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Error;
use crate::abort::AbortRegistry;
use crate::events::{EventBus, EventStream};
use crate::execution::ToolExecutionManager;
use crate::model::{ModelClient, PermissionUiHandler};
use crate::permission::PermissionGate;
use crate::session::{Persistence, SessionId, SessionSnapshot, SessionState};
use crate::tools::ToolRegistry;

use super::config::EngineConfig;

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) ui: Option<Arc<dyn PermissionUiHandler>>,
    pub(crate) persistence: Option<Arc<dyn Persistence>>,
    pub(crate) sessions: DashMap<SessionId, Arc<RwLock<SessionState>>>,
    pub(crate) active: Arc<DashMap<SessionId, ()>>,
    pub(crate) aborts: Arc<AbortRegistry>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) manager: Arc<ToolExecutionManager>,
    pub(crate) gate: Arc<PermissionGate>,
}

/// The agent execution engine.
///
/// Cheap to clone; all clones share the same sessions, registries, and
/// event bus.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Create a fresh session and return its id.
    pub fn create_session(&self) -> SessionId {
        let id = SessionId::new();
        self.inner
            .sessions
            .insert(id.clone(), Arc::new(RwLock::new(SessionState::new(id.clone()))));
        debug!(session_id = %id, "Session created");
        id
    }

    /// Register a session under a caller-chosen id.
    pub fn create_session_with_id(&self, id: SessionId) -> SessionId {
        self.inner
            .sessions
            .insert(id.clone(), Arc::new(RwLock::new(SessionState::new(id.clone()))));
        id
    }

    pub fn has_session(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    /// Submit a query fire-and-forget.
    ///
    /// Rejected immediately with [`Error::Busy`] when a turn is already
    /// active for the session — never silently queued.
    pub fn submit_query(&self, session_id: &SessionId, query: impl Into<String>) -> crate::Result<()> {
        let guard = self.acquire_turn(session_id)?;
        self.session_handle(session_id)?;

        let engine = self.clone();
        let session_id = session_id.clone();
        let query = query.into();
        tokio::spawn(async move {
            if let Err(e) = engine.run_guarded(guard, &session_id, &query).await {
                warn!(session_id = %session_id, error = %e, "Submitted turn failed to run");
            }
        });
        Ok(())
    }

    /// Abort whatever the session is doing.
    ///
    /// Idempotent. Returns whether a turn was in flight when the abort
    /// landed.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        let in_flight = self.inner.active.contains_key(session_id);
        self.inner.aborts.set_aborted(session_id);
        let aborted = self.inner.manager.abort_session(session_id);
        if in_flight || !aborted.is_empty() {
            info!(
                session_id = %session_id,
                aborted_executions = aborted.len(),
                "Abort requested"
            );
        }
        in_flight
    }

    /// Attach an observer to a session's event stream.
    ///
    /// The stream starts with a snapshot of in-flight executions and
    /// pending permission requests, then live events.
    pub fn subscribe(&self, session_id: &SessionId) -> EventStream {
        let manager = Arc::clone(&self.inner.manager);
        let id = session_id.clone();
        self.inner
            .bus
            .subscribe_with(session_id, move || manager.backlog(&id))
    }

    /// Deliver an out-of-band permission decision.
    ///
    /// Idempotent per id; repeat calls fail silently. Returns whether the
    /// decision was applied.
    pub fn resolve_permission(&self, permission_id: Uuid, granted: bool) -> bool {
        match self
            .inner
            .manager
            .resolve_permission(permission_id, granted, None)
        {
            Ok(_) => {
                self.inner.gate.resolve(permission_id, granted);
                true
            }
            Err(e) => {
                debug!(permission_id = %permission_id, error = %e, "Ignoring repeat permission resolution");
                false
            }
        }
    }

    /// Serializable capture of a session for delegated persistence.
    pub fn snapshot(&self, session_id: &SessionId) -> crate::Result<SessionSnapshot> {
        let handle = self.session_handle(session_id)?;
        let session = handle
            .try_read()
            .map_err(|_| Error::Session(format!("Session {session_id} is mid-mutation")))?
            .clone();
        Ok(SessionSnapshot {
            session,
            executions: self.inner.manager.executions_for(session_id),
            permissions: self.inner.manager.permissions_for(session_id),
        })
    }

    /// Reconstruct in-memory state for a resumed session.
    pub fn restore(&self, snapshot: SessionSnapshot) -> SessionId {
        let id = snapshot.session.id.clone();
        self.inner
            .sessions
            .insert(id.clone(), Arc::new(RwLock::new(snapshot.session)));
        self.inner
            .manager
            .restore(snapshot.executions, snapshot.permissions);
        info!(session_id = %id, "Session restored");
        id
    }

    pub(crate) fn session_handle(
        &self,
        session_id: &SessionId,
    ) -> crate::Result<Arc<RwLock<SessionState>>> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Session(format!("Session not found: {session_id}")))
    }

    pub(crate) fn acquire_turn(&self, session_id: &SessionId) -> crate::Result<TurnGuard> {
        if self
            .inner
            .active
            .insert(session_id.clone(), ())
            .is_some()
        {
            return Err(Error::Busy {
                id: session_id.clone(),
            });
        }
        Ok(TurnGuard {
            active: Arc::clone(&self.inner.active),
            session_id: session_id.clone(),
        })
    }
}

/// Marks a session's single active turn; releases on drop.
pub(crate) struct TurnGuard {
    active: Arc<DashMap<SessionId, ()>>,
    session_id: SessionId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.active.remove(&self.session_id);
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    model: Option<Arc<dyn ModelClient>>,
    tools: Option<ToolRegistry>,
    ui: Option<Arc<dyn PermissionUiHandler>>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn permission_ui(mut self, ui: Arc<dyn PermissionUiHandler>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn build(self) -> crate::Result<Engine> {
        let model = self
            .model
            .ok_or_else(|| Error::Config("EngineBuilder requires a model client".into()))?;

        let aborts = Arc::new(AbortRegistry::new());
        let bus = Arc::new(EventBus::new(Arc::clone(&aborts)));
        let manager = Arc::new(ToolExecutionManager::new(Arc::clone(&bus)));

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                model,
                tools: Arc::new(self.tools.unwrap_or_default()),
                ui: self.ui,
                persistence: self.persistence,
                sessions: DashMap::new(),
                active: Arc::new(DashMap::new()),
                aborts,
                bus,
                manager,
                gate: Arc::new(PermissionGate::new()),
            }),
        })
    }
}
