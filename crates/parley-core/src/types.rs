use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier. Sortable by creation time.
pub type SessionId = String;

/// Mint a fresh session id: `session_<utc-compact>_<uuid8>`.
///
/// The timestamp prefix keeps ids sortable by creation; the uuid suffix
/// keeps them unique when many sessions start within the same second.
pub fn new_session_id() -> SessionId {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("session_{stamp}_{suffix}")
}

// ── Severity ───────────────────────────────────────────────────

/// Issue severity. `High` blocks convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => write!(f, "High"),
            Severity::Medium => write!(f, "Medium"),
            Severity::Low => write!(f, "Low"),
        }
    }
}

// ── Issues and reviews ─────────────────────────────────────────

/// An atomic finding raised by one reviewer against one document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Short tag, e.g. "Clarity", "Security".
    pub category: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    /// Must equal the producing review's `reviewer_name`.
    pub reviewer_name: String,
}

/// Token accounting for a single LLM exchange (or an accumulation of them).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// One reviewer's complete output for one document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub reviewer_name: String,
    pub issues: Vec<Issue>,
    pub overall_assessment: String,
    pub created_at: DateTime<Utc>,
    pub tokens: TokenUsage,
}

impl Review {
    /// Every issue must carry the review's own reviewer name.
    pub fn is_consistent(&self) -> bool {
        self.issues
            .iter()
            .all(|i| i.reviewer_name == self.reviewer_name)
    }
}

/// Aggregated issue counts across one iteration's reviews.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityCounts {
    /// Sum across all issues of all reviews. No duplicate suppression.
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let mut counts = Self::default();
        for review in reviews {
            for issue in &review.issues {
                match issue.severity {
                    Severity::High => counts.high += 1,
                    Severity::Medium => counts.medium += 1,
                    Severity::Low => counts.low += 1,
                }
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.high + self.medium + self.low
    }
}

// ── Participants ───────────────────────────────────────────────

/// A reviewer's identity and behavior. Immutable for the session's life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Unique within the session.
    pub name: String,
    /// Short title, e.g. "Review for scalability".
    pub role: String,
    pub expertise: String,
    pub perspective: String,
    /// The full directive text the LLM receives, verbatim.
    pub system_prompt: String,
    /// Per-participant model override; `None` means the primary model.
    #[serde(default)]
    pub model: Option<String>,
}

// ── Document versions ──────────────────────────────────────────

/// A numbered, immutable snapshot of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Monotonic from 1.
    pub version: u32,
    pub title: String,
    pub document_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Iteration whose moderator produced this version; `None` for v1.
    #[serde(default)]
    pub produced_by_iteration: Option<u32>,
    pub length_chars: u64,
}

impl DocumentVersion {
    pub fn initial(title: &str, document_type: &str, content: &str) -> Self {
        Self {
            version: 1,
            title: title.to_string(),
            document_type: document_type.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            produced_by_iteration: None,
            length_chars: content.chars().count() as u64,
        }
    }

    /// The version the moderator produced from `self` at `iteration`.
    pub fn next(&self, content: String, iteration: u32) -> Self {
        Self {
            version: self.version + 1,
            title: self.title.clone(),
            document_type: self.document_type.clone(),
            length_chars: content.chars().count() as u64,
            content,
            created_at: Utc::now(),
            produced_by_iteration: Some(iteration),
        }
    }
}

// ── Convergence ────────────────────────────────────────────────

/// Which stop rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRule {
    NoHighIssues,
    MaxIterations,
    DeltaThreshold,
    Custom,
    Error,
}

impl fmt::Display for StopRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopRule::NoHighIssues => "no_high_issues",
            StopRule::MaxIterations => "max_iterations",
            StopRule::DeltaThreshold => "delta_threshold",
            StopRule::Custom => "custom",
            StopRule::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The convergence engine's verdict after one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDecision {
    pub should_stop: bool,
    pub reason: String,
    #[serde(default)]
    pub stopped_by: Option<StopRule>,
}

impl StopDecision {
    pub fn stop(rule: StopRule, reason: impl Into<String>) -> Self {
        Self {
            should_stop: true,
            reason: reason.into(),
            stopped_by: Some(rule),
        }
    }

    pub fn go_on(reason: impl Into<String>) -> Self {
        Self {
            should_stop: false,
            reason: reason.into(),
            stopped_by: None,
        }
    }
}

/// The recorded convergence data for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceCheck {
    pub counts: SeverityCounts,
    /// Symmetric change ratio in [0, 1] against the previous version;
    /// 0 by definition for iteration 1.
    pub delta: f64,
    pub converged: bool,
    pub reason: String,
    #[serde(default)]
    pub stopped_by: Option<StopRule>,
}

/// One loop step: review fan-out, convergence check, optional moderation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// From 1, monotonic across continuations.
    pub iteration: u32,
    /// The document version the reviewers consumed.
    pub input_version: u32,
    pub convergence: ConvergenceCheck,
    /// `None` when the loop stopped without moderating.
    #[serde(default)]
    pub output_version: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

// ── Session ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Planning => "planning",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Built-in roundtable presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    Prd,
    CodeReview,
    Architecture,
    BusinessStrategy,
    #[default]
    None,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prd" => Ok(Preset::Prd),
            "code-review" => Ok(Preset::CodeReview),
            "architecture" => Ok(Preset::Architecture),
            "business-strategy" => Ok(Preset::BusinessStrategy),
            "none" | "" => Ok(Preset::None),
            other => Err(format!("unknown preset: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStrategy {
    #[default]
    Uniform,
    Diverse,
}

/// Per-session refinement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard cap on loop iterations, >= 1.
    pub max_iterations: u32,
    /// Stability threshold in (0, 1); deltas strictly below it stop the loop.
    pub delta_threshold: f64,
    pub stop_on_no_high_issues: bool,
    /// Suppress every other stop rule until the cap is hit.
    pub force_max_iterations: bool,
    /// Clamped to [2, 6].
    pub num_participants: u32,
    pub preset: Preset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_style: Option<String>,
    /// Primary model id; `None` defers to the process configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub model_strategy: ModelStrategy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            delta_threshold: 0.05,
            stop_on_no_high_issues: true,
            force_max_iterations: false,
            num_participants: 3,
            preset: Preset::None,
            participant_style: None,
            model: None,
            model_strategy: ModelStrategy::Uniform,
        }
    }
}

/// The runtime entity: everything known about one refinement session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub title: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub document_type: String,
    /// Ordered; fixed once planning completes.
    pub participants: Vec<RoleSpec>,
    pub moderator_focus: String,
    /// The planner's prose hint about what convergence should mean here.
    #[serde(default)]
    pub convergence_criteria: String,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub current_iteration: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub final_version: Option<u32>,
    #[serde(default)]
    pub convergence_reason: Option<String>,
    #[serde(default)]
    pub stopped_by: Option<StopRule>,
    /// Prior terminal iteration when this session was continued.
    #[serde(default)]
    pub continued_from_iteration: Option<u32>,
    /// Keyed by participant name, plus "moderator" and "meta_planner".
    #[serde(default)]
    pub token_usage: BTreeMap<String, TokenUsage>,
    /// Non-fatal notes, e.g. planner fallback.
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SessionMeta {
    pub fn add_tokens(&mut self, who: &str, tokens: &TokenUsage) {
        self.token_usage
            .entry(who.to_string())
            .or_default()
            .merge(tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.token_usage.values().map(|t| t.total).sum()
    }
}

// ── Report ─────────────────────────────────────────────────────

/// Participant summary embedded in reports and events (no prompt text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub name: String,
    pub role: String,
    pub expertise: String,
    pub perspective: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<&RoleSpec> for ParticipantSummary {
    fn from(spec: &RoleSpec) -> Self {
        Self {
            name: spec.name.clone(),
            role: spec.role.clone(),
            expertise: spec.expertise.clone(),
            perspective: spec.perspective.clone(),
            model: spec.model.clone(),
        }
    }
}

/// The session's terminal artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub session_id: SessionId,
    pub title: String,
    pub document_type: String,
    pub initial_version: u32,
    pub final_version: u32,
    pub iterations_count: u32,
    pub converged: bool,
    pub convergence_reason: String,
    pub stopped_by: StopRule,
    pub total_issues_identified: u32,
    pub final_issue_count: SeverityCounts,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Ordered history; raw reviews are stored separately per version.
    pub history: Vec<IterationRecord>,
    pub token_usage: BTreeMap<String, TokenUsage>,
    pub participants: Vec<ParticipantSummary>,
    #[serde(default)]
    pub continued_from_iteration: Option<u32>,
    /// Which delta definition produced the recorded deltas.
    pub delta_metric: String,
}
