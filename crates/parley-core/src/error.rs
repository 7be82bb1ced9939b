use thiserror::Error;

/// Unified error type for the entire Parley runtime.
#[derive(Error, Debug)]
pub enum ParleyError {
    // ── Input / configuration errors ───────────────────────────
    #[error("invalid config: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ── Lookup errors ──────────────────────────────────────────
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("version not found: {session} v{version}")]
    VersionNotFound { session: String, version: u32 },

    #[error("report not available for {0} (session has not completed)")]
    ReportNotReady(String),

    // ── State conflicts ────────────────────────────────────────
    #[error("session not continuable: {0}")]
    NotContinuable(String),

    #[error("session still active: {0}")]
    SessionActive(String),

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm transient error: {0}")]
    LlmTransient(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("llm fatal error: {0}")]
    LlmFatal(String),

    // ── Agent errors ───────────────────────────────────────────
    #[error("malformed review from {reviewer}: {reason}")]
    MalformedReview {
        reviewer: String,
        reason: String,
        /// Raw model output, persisted by the driver for debugging.
        raw: String,
    },

    #[error("planner failed: {0}")]
    Planner(String),

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    #[error("version conflict: expected v{expected}, got v{got}")]
    VersionConflict { expected: u32, got: u32 },

    // ── Lifecycle ──────────────────────────────────────────────
    #[error("cancelled")]
    Cancelled,

    #[error("session failed: {0}")]
    SessionFailed(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;

/// Stable error categories exposed to hosting service layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

impl ParleyError {
    /// Map this error to its stable surface category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ParleyError::InvalidConfig { .. } => ErrorCategory::BadRequest,
            ParleyError::SessionNotFound(_)
            | ParleyError::VersionNotFound { .. }
            | ParleyError::ReportNotReady(_) => ErrorCategory::NotFound,
            ParleyError::NotContinuable(_)
            | ParleyError::SessionActive(_)
            | ParleyError::VersionConflict { .. } => ErrorCategory::Conflict,
            ParleyError::LlmTransient(_) | ParleyError::RateLimited { .. } => {
                ErrorCategory::Unavailable
            }
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether a retry of the failing call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParleyError::LlmTransient(_) | ParleyError::RateLimited { .. }
        )
    }
}
