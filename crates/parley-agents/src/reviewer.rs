use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::prompts;
use parley_core::{
    DocumentVersion, Issue, ParleyError, Result, Review, RoleSpec, Severity, TokenUsage,
};
use parley_llm::{ChatRequest, LlmClient};

const REVIEW_TEMPERATURE: f32 = 0.2;

/// The outcome of one reviewer call.
#[derive(Debug)]
pub struct ReviewOutcome {
    pub review: Review,
    /// True when the first response was unparseable and the salvage
    /// round-trip produced the review.
    pub salvaged: bool,
}

/// An LLM-backed reviewer parameterized entirely by its role-spec. The same
/// code serves every participant; behavior lives in the spec's prompt.
pub struct Reviewer {
    spec: RoleSpec,
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
}

impl Reviewer {
    pub fn new(spec: RoleSpec, client: Arc<dyn LlmClient>, primary_model: &str) -> Self {
        let model = spec
            .model
            .clone()
            .unwrap_or_else(|| primary_model.to_string());
        Self {
            spec,
            client,
            model,
            max_tokens: 8192,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Review one document version. One call; on parse failure, one salvage
    /// attempt; then `MalformedReview` carrying the raw output.
    pub async fn review(&self, doc: &DocumentVersion) -> Result<ReviewOutcome> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: Some(self.spec.system_prompt.clone()),
            prompt: prompts::review_user_prompt(doc),
            max_tokens: self.max_tokens,
            temperature: REVIEW_TEMPERATURE,
            json_mode: true,
        };

        debug!(reviewer = %self.spec.name, version = doc.version, "starting review");
        let response = self.client.complete(&request).await?;
        let mut tokens = response.usage;

        match parse_review(&response.content, &self.spec.name) {
            Ok(mut review) => {
                review.tokens = tokens;
                return Ok(ReviewOutcome {
                    review,
                    salvaged: false,
                });
            }
            Err(first_err) => {
                warn!(
                    reviewer = %self.spec.name,
                    error = %first_err,
                    "review response unparseable, attempting salvage"
                );

                let salvage = ChatRequest {
                    model: self.model.clone(),
                    system: Some(self.spec.system_prompt.clone()),
                    prompt: prompts::salvage_prompt(&response.content),
                    max_tokens: self.max_tokens,
                    temperature: REVIEW_TEMPERATURE,
                    json_mode: true,
                };
                let retry = self.client.complete(&salvage).await?;
                tokens.merge(&retry.usage);

                match parse_review(&retry.content, &self.spec.name) {
                    Ok(mut review) => {
                        review.tokens = tokens;
                        Ok(ReviewOutcome {
                            review,
                            salvaged: true,
                        })
                    }
                    Err(second_err) => Err(ParleyError::MalformedReview {
                        reviewer: self.spec.name.clone(),
                        reason: format!("{first_err}; after salvage: {second_err}"),
                        raw: retry.content,
                    }),
                }
            }
        }
    }
}

// ── Wire parsing ───────────────────────────────────────────────

/// Tolerant wire shape: accepts the field spellings models actually emit.
#[derive(Deserialize)]
struct WireReview {
    #[serde(default)]
    issues: Vec<WireIssue>,
    #[serde(default, alias = "assessment", alias = "summary")]
    overall_assessment: String,
}

#[derive(Deserialize)]
struct WireIssue {
    #[serde(default, alias = "section")]
    category: Option<String>,
    #[serde(default, alias = "issue")]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default, alias = "fix")]
    suggested_fix: Option<String>,
}

/// Pull a JSON object out of a model response that may be wrapped in code
/// fences or surrounded by prose.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Strict parse of a reviewer response into a `Review`. Every issue gets the
/// reviewer's own name regardless of what the model put there.
fn parse_review(raw: &str, reviewer_name: &str) -> std::result::Result<Review, String> {
    let wire: WireReview =
        serde_json::from_str(extract_json(raw)).map_err(|e| format!("invalid JSON: {e}"))?;

    let mut issues = Vec::with_capacity(wire.issues.len());
    for issue in wire.issues {
        let severity = match issue.severity {
            None => Severity::Low,
            Some(ref s) => s
                .parse::<Severity>()
                .map_err(|e| format!("invalid issue: {e}"))?,
        };
        issues.push(Issue {
            category: issue.category.unwrap_or_else(|| "General".into()),
            description: issue.description.unwrap_or_default(),
            severity,
            suggested_fix: issue.suggested_fix,
            reviewer_name: reviewer_name.to_string(),
        });
    }

    Ok(Review {
        reviewer_name: reviewer_name.to_string(),
        issues,
        overall_assessment: wire.overall_assessment,
        created_at: Utc::now(),
        tokens: TokenUsage::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::MockClient;

    fn spec(name: &str) -> RoleSpec {
        RoleSpec {
            name: name.into(),
            role: "Review for clarity".into(),
            expertise: "Writing".into(),
            perspective: "Reader".into(),
            system_prompt: "You review documents.".into(),
            model: None,
        }
    }

    fn doc() -> DocumentVersion {
        DocumentVersion::initial("T", "document", "content")
    }

    const VALID_REVIEW: &str = r#"{
        "issues": [
            {"category": "Clarity", "description": "vague", "severity": "high",
             "suggested_fix": "be specific", "reviewer": "Someone Else"}
        ],
        "overall_assessment": "needs work"
    }"#;

    #[test]
    fn parse_accepts_aliases_and_backfills_reviewer() {
        let raw = r#"{
            "issues": [
                {"section": "Scope", "issue": "too broad", "severity": "Medium", "fix": "cut it"}
            ],
            "overall_assessment": "ok"
        }"#;
        let review = parse_review(raw, "critic_a").unwrap();
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].category, "Scope");
        assert_eq!(review.issues[0].description, "too broad");
        assert_eq!(review.issues[0].severity, Severity::Medium);
        assert_eq!(review.issues[0].suggested_fix.as_deref(), Some("cut it"));
        assert_eq!(review.issues[0].reviewer_name, "critic_a");
        assert!(review.is_consistent());
    }

    #[test]
    fn parse_strips_code_fences() {
        let raw = format!("```json\n{VALID_REVIEW}\n```");
        let review = parse_review(&raw, "critic_a").unwrap();
        assert_eq!(review.issues[0].severity, Severity::High);
        // The model's self-reported name is ignored
        assert_eq!(review.issues[0].reviewer_name, "critic_a");
    }

    #[test]
    fn parse_defaults_missing_severity_to_low() {
        let raw = r#"{"issues": [{"category": "x", "description": "y"}], "overall_assessment": "z"}"#;
        let review = parse_review(raw, "c").unwrap();
        assert_eq!(review.issues[0].severity, Severity::Low);
    }

    #[test]
    fn parse_rejects_unknown_severity() {
        let raw = r#"{"issues": [{"category": "x", "description": "y", "severity": "Critical"}], "overall_assessment": "z"}"#;
        assert!(parse_review(raw, "c").is_err());
    }

    #[tokio::test]
    async fn clean_response_is_not_salvaged() {
        let client = MockClient::new("mock").with_response(VALID_REVIEW);
        let reviewer = Reviewer::new(spec("critic_a"), Arc::new(client), "test-model");
        let outcome = reviewer.review(&doc()).await.unwrap();
        assert!(!outcome.salvaged);
        assert_eq!(outcome.review.issues.len(), 1);
        assert_eq!(outcome.review.tokens.total, 150);
    }

    #[tokio::test]
    async fn salvage_recovers_and_merges_tokens() {
        let client = MockClient::new("mock")
            .with_response("Sure! Here are my findings, in plain prose.")
            .with_response(VALID_REVIEW);
        let requests = client.recorded_requests();
        let reviewer = Reviewer::new(spec("critic_a"), Arc::new(client), "test-model");

        let outcome = reviewer.review(&doc()).await.unwrap();
        assert!(outcome.salvaged);
        assert_eq!(outcome.review.tokens.total, 300);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].prompt.contains("could not be parsed"));
        assert!(requests[1].prompt.contains("plain prose"));
    }

    #[tokio::test]
    async fn double_failure_is_malformed_with_raw_output() {
        let client = MockClient::new("mock")
            .with_response("not json")
            .with_response("still not json");
        let reviewer = Reviewer::new(spec("critic_a"), Arc::new(client), "test-model");

        let err = reviewer.review(&doc()).await.unwrap_err();
        match err {
            ParleyError::MalformedReview { reviewer, raw, .. } => {
                assert_eq!(reviewer, "critic_a");
                assert_eq!(raw, "still not json");
            }
            other => panic!("expected MalformedReview, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_override_wins_over_primary() {
        let client = MockClient::new("mock").with_response(VALID_REVIEW);
        let requests = client.recorded_requests();
        let mut s = spec("critic_a");
        s.model = Some("special-model".into());
        let reviewer = Reviewer::new(s, Arc::new(client), "primary-model");
        let _ = reviewer.review(&doc()).await.unwrap();
        assert_eq!(requests.lock().unwrap()[0].model, "special-model");
    }

    #[tokio::test]
    async fn empty_issue_list_parses() {
        let client = MockClient::new("mock")
            .with_response(r#"{"issues": [], "overall_assessment": "fine"}"#);
        let reviewer = Reviewer::new(spec("critic_a"), Arc::new(client), "m");
        let outcome = reviewer.review(&doc()).await.unwrap();
        assert!(outcome.review.issues.is_empty());
        assert_eq!(outcome.review.overall_assessment, "fine");
    }
}
