use std::sync::Arc;

use tracing::debug;

use crate::prompts;
use parley_core::{DocumentVersion, Result, Review, TokenUsage};
use parley_llm::{ChatRequest, LlmClient};

const REFINE_TEMPERATURE: f32 = 0.3;

/// The moderator synthesizes one iteration's reviews into the next document
/// version. It outputs prose, not JSON; the store assigns version numbers.
pub struct Moderator {
    focus: String,
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
}

impl Moderator {
    pub fn new(focus: impl Into<String>, client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            focus: focus.into(),
            client,
            model: model.to_string(),
            max_tokens: 16384,
        }
    }

    /// Produce the next document text from the current version and its
    /// reviews.
    pub async fn refine(
        &self,
        doc: &DocumentVersion,
        reviews: &[Review],
        goal: Option<&str>,
    ) -> Result<(String, TokenUsage)> {
        let total_issues: usize = reviews.iter().map(|r| r.issues.len()).sum();
        debug!(
            version = doc.version,
            reviews = reviews.len(),
            issues = total_issues,
            "moderator refining document"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            system: Some(prompts::moderator_system_prompt(&self.focus)),
            prompt: prompts::moderator_user_prompt(doc, reviews, goal),
            max_tokens: self.max_tokens,
            temperature: REFINE_TEMPERATURE,
            json_mode: false,
        };

        let response = self.client.complete(&request).await?;
        Ok((response.content.trim().to_string(), response.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::{Issue, Severity};
    use parley_llm::MockClient;

    fn doc() -> DocumentVersion {
        DocumentVersion::initial("T", "document", "draft one")
    }

    fn review_with_high() -> Review {
        Review {
            reviewer_name: "critic".into(),
            issues: vec![Issue {
                category: "Scope".into(),
                description: "missing success metrics".into(),
                severity: Severity::High,
                suggested_fix: None,
                reviewer_name: "critic".into(),
            }],
            overall_assessment: "incomplete".into(),
            created_at: Utc::now(),
            tokens: TokenUsage::default(),
        }
    }

    #[tokio::test]
    async fn refine_returns_trimmed_text_and_usage() {
        let client = MockClient::new("mock").with_response("\n\nrefined draft\n");
        let moderator = Moderator::new("fix everything high", Arc::new(client), "test-model");
        let (text, tokens) = moderator
            .refine(&doc(), &[review_with_high()], None)
            .await
            .unwrap();
        assert_eq!(text, "refined draft");
        assert_eq!(tokens.total, 150);
    }

    #[tokio::test]
    async fn refine_request_is_prose_mode_with_policy() {
        let client = MockClient::new("mock").with_default_response("v2");
        let requests = client.recorded_requests();
        let moderator = Moderator::new("keep it tight", Arc::new(client), "test-model");
        let _ = moderator
            .refine(&doc(), &[review_with_high()], Some("launch"))
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert!(!requests[0].json_mode);
        let system = requests[0].system.as_deref().unwrap();
        assert!(system.contains("Focus: keep it tight"));
        assert!(system.contains("MUST resolve every High severity issue"));
        assert!(requests[0].prompt.contains("missing success metrics"));
        assert!(requests[0].prompt.contains("Goal: launch"));
    }
}
