use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::driver::{self, DriveMode};
use parley_core::{
    new_session_id, ConvergenceReport, DocumentVersion, EventStream, ParleyError, Result, Review,
    RoundtableBus, SessionConfig, SessionEvent, SessionId, SessionMeta, SessionStatus, StopRule,
};
use parley_llm::LlmClient;
use parley_store::SessionStore;

/// A request to start one refinement session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub title: String,
    pub content: String,
    pub goal: Option<String>,
    pub document_type: String,
    pub config: SessionConfig,
    pub metadata: serde_json::Value,
}

impl StartRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            goal: None,
            document_type: "document".into(),
            config: SessionConfig::default(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }
}

/// Pollable session status; safe to call in any state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub final_version: Option<u32>,
}

/// One background driver per session: its cancel flag and join handle.
pub(crate) struct SessionHandle {
    pub cancel: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct RuntimeInner {
    pub store: Arc<SessionStore>,
    pub bus: Arc<RoundtableBus>,
    pub client: Arc<dyn LlmClient>,
    pub default_model: String,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

/// Owns every session's background driver, the store, the event bus, and
/// the LLM client. Sessions run concurrently and independently; each is
/// driven by exactly one task, which is the only writer to that session's
/// store entries.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(store: SessionStore, client: Arc<dyn LlmClient>, default_model: &str) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store: Arc::new(store),
                bus: Arc::new(RoundtableBus::new()),
                client,
                default_model: default_model.to_string(),
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validate the request, persist the initial session record, spawn the
    /// background driver, and return immediately. The returned stream was
    /// subscribed before the driver started, so it observes every event.
    pub fn start(&self, request: StartRequest) -> Result<(SessionId, EventStream)> {
        validate(&request)?;

        let mut config = request.config;
        config.num_participants = config.num_participants.clamp(2, 6);

        let session_id = new_session_id();
        let meta = SessionMeta {
            session_id: session_id.clone(),
            title: request.title.clone(),
            goal: request.goal.clone(),
            document_type: request.document_type.clone(),
            participants: vec![],
            moderator_focus: String::new(),
            convergence_criteria: String::new(),
            config: config.clone(),
            status: SessionStatus::Pending,
            current_iteration: 0,
            created_at: Utc::now(),
            ended_at: None,
            final_version: None,
            convergence_reason: None,
            stopped_by: None,
            continued_from_iteration: None,
            token_usage: Default::default(),
            warnings: vec![],
            metadata: request.metadata.clone(),
        };
        self.inner.store.create_session(&meta)?;

        let stream = self.inner.bus.subscribe(&session_id);
        self.inner.bus.emit(
            &session_id,
            SessionEvent::SessionCreated {
                session_id: session_id.clone(),
                title: request.title.clone(),
                config,
            },
        );

        self.spawn_driver(meta, DriveMode::Fresh { content: request.content });
        info!(session = %session_id, "refinement session started");
        Ok((session_id, stream))
    }

    fn spawn_driver(&self, meta: SessionMeta, mode: DriveMode) {
        let session_id = meta.session_id.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&self.inner);
        let cancel_for_task = Arc::clone(&cancel);
        let join = tokio::spawn(async move {
            driver::drive(inner, meta, mode, cancel_for_task).await;
        });
        self.inner.sessions.write().insert(
            session_id,
            Arc::new(SessionHandle {
                cancel,
                join: Mutex::new(Some(join)),
            }),
        );
    }

    /// Current status; always safe to poll.
    pub fn status(&self, session_id: &str) -> Result<StatusSnapshot> {
        let meta = self.inner.store.load_session(session_id)?;
        Ok(StatusSnapshot {
            session_id: meta.session_id,
            status: meta.status,
            current_iteration: meta.current_iteration,
            max_iterations: meta.config.max_iterations,
            final_version: meta.final_version,
        })
    }

    /// Live event stream; allowed in any state, no historical replay.
    pub fn subscribe(&self, session_id: &str) -> Result<EventStream> {
        if !self.inner.store.session_exists(session_id)? {
            return Err(ParleyError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.inner.bus.subscribe(session_id))
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionMeta> {
        self.inner.store.load_session(session_id)
    }

    pub fn get_version(&self, session_id: &str, version: u32) -> Result<DocumentVersion> {
        self.inner.store.load_version(session_id, version)
    }

    pub fn get_reviews(&self, session_id: &str, version: u32) -> Result<Vec<Review>> {
        self.inner.store.load_reviews(session_id, version)
    }

    /// The terminal report. NotFound until the session reaches Completed.
    pub fn get_report(&self, session_id: &str) -> Result<ConvergenceReport> {
        let meta = self.inner.store.load_session(session_id)?;
        if meta.status != SessionStatus::Completed {
            return Err(ParleyError::ReportNotReady(session_id.to_string()));
        }
        self.inner
            .store
            .load_report(session_id)?
            .ok_or_else(|| ParleyError::ReportNotReady(session_id.to_string()))
    }

    /// Session metadata entries, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        self.inner.store.list_sessions()
    }

    /// Raw reviewer outputs that failed parsing, as (version, reviewer,
    /// raw text). Kept for post-mortem debugging of failed sessions.
    pub fn get_malformed_outputs(&self, session_id: &str) -> Result<Vec<(u32, String, String)>> {
        self.inner.store.load_malformed_outputs(session_id)
    }

    /// Extend a Completed session that ran out of iteration budget with
    /// High issues outstanding. Re-enters Running and resumes from the
    /// persisted final version. Returns the new max_iterations.
    pub fn continue_session(&self, session_id: &str, additional_iterations: u32) -> Result<u32> {
        if additional_iterations == 0 {
            return Err(ParleyError::InvalidConfig {
                field: "additional_iterations".into(),
                reason: "must be at least 1".into(),
            });
        }

        let mut meta = self.inner.store.load_session(session_id)?;
        if meta.status != SessionStatus::Completed {
            return Err(ParleyError::NotContinuable(format!(
                "{session_id}: status is {}, not completed",
                meta.status
            )));
        }
        if meta.stopped_by != Some(StopRule::MaxIterations) {
            return Err(ParleyError::NotContinuable(format!(
                "{session_id}: stopped by {:?}, not max_iterations",
                meta.stopped_by
            )));
        }
        let report = self
            .inner
            .store
            .load_report(session_id)?
            .ok_or_else(|| ParleyError::ReportNotReady(session_id.to_string()))?;
        if report.final_issue_count.high == 0 {
            return Err(ParleyError::NotContinuable(format!(
                "{session_id}: no high severity issues remain"
            )));
        }

        let new_max = meta.config.max_iterations + additional_iterations;
        meta.config.max_iterations = new_max;
        meta.continued_from_iteration = Some(report.iterations_count);
        meta.status = SessionStatus::Running;
        meta.ended_at = None;
        meta.final_version = None;
        meta.convergence_reason = None;
        meta.stopped_by = None;
        self.inner.store.update_session(&meta)?;

        info!(
            session = %session_id,
            additional = additional_iterations,
            new_max,
            "continuing refinement session"
        );
        self.spawn_driver(meta, DriveMode::Resume);
        Ok(new_max)
    }

    /// Request cooperative cancellation; observed at the driver's next
    /// safe point. A no-op for sessions that already terminated.
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        let meta = self.inner.store.load_session(session_id)?;
        if meta.status.is_terminal() {
            return Ok(());
        }
        if let Some(handle) = self.inner.sessions.read().get(session_id) {
            handle.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Delete a terminal session and its entire artifact tree.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let meta = self.inner.store.load_session(session_id)?;
        if !meta.status.is_terminal() {
            return Err(ParleyError::SessionActive(session_id.to_string()));
        }
        self.inner.store.delete_session(session_id)?;
        self.inner.bus.remove(session_id);
        self.inner.sessions.write().remove(session_id);
        Ok(())
    }

    /// Await the session's driver task, then report the terminal status.
    pub async fn wait(&self, session_id: &str) -> Result<SessionStatus> {
        let handle = self.inner.sessions.read().get(session_id).cloned();
        if let Some(handle) = handle {
            let join = handle.join.lock().take();
            if let Some(join) = join {
                let _ = join.await;
            }
        }
        Ok(self.inner.store.load_session(session_id)?.status)
    }
}

fn validate(request: &StartRequest) -> Result<()> {
    if request.title.trim().is_empty() {
        return Err(ParleyError::InvalidConfig {
            field: "title".into(),
            reason: "must not be empty".into(),
        });
    }
    if request.content.trim().is_empty() {
        return Err(ParleyError::InvalidConfig {
            field: "content".into(),
            reason: "must not be empty".into(),
        });
    }
    if request.config.max_iterations == 0 {
        return Err(ParleyError::InvalidConfig {
            field: "max_iterations".into(),
            reason: "must be at least 1".into(),
        });
    }
    if request.config.delta_threshold <= 0.0 || request.config.delta_threshold >= 1.0 {
        return Err(ParleyError::InvalidConfig {
            field: "delta_threshold".into(),
            reason: "must be in (0, 1)".into(),
        });
    }
    Ok(())
}
