//! The single-call entry point: assemble a runtime from a request, run the
//! session to its terminal state, and hand back the final version and
//! report.

use std::sync::Arc;

use parley_core::{
    ConvergenceReport, DocumentVersion, ParleyError, Result, SessionConfig, SessionId,
    SessionStatus,
};
use parley_llm::LlmClient;
use parley_store::SessionStore;

use crate::runtime::{Runtime, StartRequest};

/// Everything needed to run one roundtable end to end.
#[derive(Debug, Clone)]
pub struct RoundtableRequest {
    pub title: String,
    pub content: String,
    pub goal: Option<String>,
    pub document_type: String,
    pub config: SessionConfig,
}

impl RoundtableRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            goal: None,
            document_type: "document".into(),
            config: SessionConfig::default(),
        }
    }
}

/// Terminal result of a completed roundtable.
#[derive(Debug)]
pub struct RefinementOutcome {
    pub session_id: SessionId,
    pub final_version: DocumentVersion,
    pub report: ConvergenceReport,
}

/// Run one refinement session to completion and return its artifacts.
///
/// Failed sessions surface as `SessionFailed` with the recorded reason;
/// cancelled sessions as `Cancelled`. Callers that want live events or
/// multi-session management should use [`Runtime`] directly.
pub async fn run_roundtable(
    request: RoundtableRequest,
    client: Arc<dyn LlmClient>,
    store: SessionStore,
    default_model: &str,
) -> Result<RefinementOutcome> {
    let runtime = Runtime::new(store, client, default_model);

    let start = StartRequest {
        title: request.title,
        content: request.content,
        goal: request.goal,
        document_type: request.document_type,
        config: request.config,
        metadata: serde_json::Value::Null,
    };
    let (session_id, _events) = runtime.start(start)?;

    match runtime.wait(&session_id).await? {
        SessionStatus::Completed => {
            let report = runtime.get_report(&session_id)?;
            let final_version = runtime.get_version(&session_id, report.final_version)?;
            Ok(RefinementOutcome {
                session_id,
                final_version,
                report,
            })
        }
        SessionStatus::Cancelled => Err(ParleyError::Cancelled),
        status => {
            let meta = runtime.get_session(&session_id)?;
            Err(ParleyError::SessionFailed(
                meta.convergence_reason
                    .unwrap_or_else(|| format!("terminal status {status}")),
            ))
        }
    }
}
