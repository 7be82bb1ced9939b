//! Prompt construction for the three agents. The reviewer output contract
//! is stated in both the role-spec's system prompt (the planner embeds it)
//! and the per-call user prompt, so even hand-written role-specs produce
//! parseable output.

use parley_core::{DocumentVersion, Review};

/// The exact JSON shape reviewers must emit.
pub const REVIEW_OUTPUT_CONTRACT: &str = r#"You must respond with a JSON object in this EXACT format:
{
  "issues": [
    {
      "category": "Issue category (e.g., 'Clarity', 'Technical Feasibility', 'Security')",
      "description": "Detailed description of the issue",
      "severity": "High|Medium|Low",
      "suggested_fix": "Suggested fix or improvement (optional)",
      "reviewer": "Your name"
    }
  ],
  "overall_assessment": "Overall assessment and summary"
}

ALL fields are required except suggested_fix which can be null. Output only the JSON object — no prose, no code fences."#;

/// User prompt for one reviewer call against one document version.
pub fn review_user_prompt(doc: &DocumentVersion) -> String {
    format!(
        "Review the following {document_type} (Version {version}):\n\n\
         Title: {title}\n\n\
         <document>\n{content}\n</document>\n\n\
         Provide your expert review following the instructions in your system prompt.\n\
         Focus on your specific area of expertise and flag any issues you identify.\n\n\
         {contract}",
        document_type = doc.document_type,
        version = doc.version,
        title = doc.title,
        content = doc.content,
        contract = REVIEW_OUTPUT_CONTRACT,
    )
}

/// One salvage attempt after an unparseable reviewer response.
pub fn salvage_prompt(raw: &str) -> String {
    format!(
        "Your previous answer could not be parsed as JSON. Reformat it as a single \
         valid JSON object, changing nothing about its substance.\n\n\
         Previous answer:\n{raw}\n\n\
         {contract}",
        contract = REVIEW_OUTPUT_CONTRACT,
    )
}

/// Moderator system prompt. The policy lines are non-negotiable: they are
/// what makes High-severity issues actually block convergence.
pub fn moderator_system_prompt(focus: &str) -> String {
    format!(
        "You are a skilled moderator facilitating a document refinement discussion.\n\
         Your job is to take feedback from multiple expert reviewers and create an \
         improved version of the document that addresses their concerns.\n\n\
         Focus: {focus}\n\n\
         Rules:\n\
         - You MUST resolve every High severity issue.\n\
         - You SHOULD resolve Medium issues when doing so materially improves clarity or feasibility.\n\
         - You MAY ignore Low issues.\n\
         - You MUST preserve the document's overall purpose and any section explicitly declared in scope.\n\
         - You MUST NOT invent facts beyond what the document and reviews contain. Where required \
           information is missing, insert a placeholder section that explicitly calls out the gap.\n\
         - Keep the document focused; do not add scope beyond what fixing an issue requires.\n\n\
         Output ONLY the refined document content (markdown format) — no JSON, no commentary."
    )
}

/// Moderator user prompt: the current document plus every review as a
/// structured per-reviewer list, so the moderator sees who raised what.
pub fn moderator_user_prompt(
    doc: &DocumentVersion,
    reviews: &[Review],
    goal: Option<&str>,
) -> String {
    let mut reviews_text = String::new();
    for review in reviews {
        reviews_text.push_str(&format!("\n=== {} ===\n", review.reviewer_name));
        reviews_text.push_str(&format!("Overall: {}\n", review.overall_assessment));
        for issue in &review.issues {
            reviews_text.push_str(&format!(
                "[{}] {}: {}\n",
                issue.severity, issue.category, issue.description
            ));
            if let Some(ref fix) = issue.suggested_fix {
                reviews_text.push_str(&format!("  Suggested fix: {fix}\n"));
            }
        }
    }

    let goal_line = goal
        .map(|g| format!("Goal: {g}\n\n"))
        .unwrap_or_default();

    format!(
        "Current {document_type} (Version {version}):\n\n\
         Title: {title}\n\n\
         {goal_line}\
         Content:\n{content}\n\n\
         === EXPERT REVIEWS ===\n{reviews_text}\n\
         === INSTRUCTIONS ===\n\n\
         Produce an improved version that addresses these reviews. \
         Output the complete refined document.",
        document_type = doc.document_type,
        version = doc.version,
        title = doc.title,
        content = doc.content,
    )
}

/// Meta-planner system prompt: designs the reviewer panel.
pub const META_PLANNER_SYSTEM: &str = r#"You are a meta-planner that designs expert roundtable discussions.

Your job is to analyze a topic and generate the most valuable set of expert participants
who should review and refine the document through iterative discussion.

For each participant you must:
1. Define their name/title (e.g., "Senior Product Manager", "Security Architect")
2. Explain what they'll review (e.g., "User value and market fit")
3. List their expertise areas
4. Describe the perspective they bring
5. Write a COMPLETE system prompt for them that includes their role and expertise,
   what aspects they should focus on, what the High/Medium/Low severity levels mean,
   and examples of the kinds of issues they should flag.

Think about diversity of perspectives: you want constructive tension and comprehensive
coverage, with distinct, non-overlapping expertises.

Also specify what the moderator should focus on when incorporating feedback, and what
constitutes convergence (when to stop iterating).

Output valid JSON matching this schema, and nothing else:
{
  "participants": [
    {
      "name": "...",
      "role": "...",
      "expertise": "...",
      "perspective": "...",
      "system_prompt": "..."
    }
  ],
  "moderator_focus": "...",
  "convergence_criteria": "..."
}"#;

/// Meta-planner user prompt.
pub fn planner_user_prompt(
    title: &str,
    document_type: &str,
    content_preview: &str,
    num_participants: u32,
    goal: Option<&str>,
    participant_style: Option<&str>,
) -> String {
    let goal_line = goal.map(|g| format!("Goal: {g}\n")).unwrap_or_default();
    let style_line = participant_style
        .map(|s| {
            format!(
                "STYLE INSTRUCTION: the user wants the participants to be '{s}'. \
                 Their system prompts and personas must reflect this tone and approach.\n"
            )
        })
        .unwrap_or_default();
    let goal_focus = goal
        .map(|g| format!("Focus on participants who can help achieve this goal: {g}\n"))
        .unwrap_or_default();

    format!(
        "Topic: {title}\n\
         Document type: {document_type}\n\
         {goal_line}\n\
         Content to be refined (preview):\n{content_preview}\n\n\
         {style_line}\
         Generate exactly {num_participants} expert participants who should review and \
         refine this document.\n\
         {goal_focus}\
         Make sure participants have diverse, complementary perspectives that cover all \
         critical aspects. Each participant's system_prompt must be detailed and specific \
         to their role."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::{Issue, Severity, TokenUsage};

    fn doc() -> DocumentVersion {
        DocumentVersion::initial("Chatbot PRD", "prd", "Build a chatbot.")
    }

    #[test]
    fn review_prompt_embeds_document_and_contract() {
        let prompt = review_user_prompt(&doc());
        assert!(prompt.contains("<document>\nBuild a chatbot.\n</document>"));
        assert!(prompt.contains("Version 1"));
        assert!(prompt.contains("\"severity\": \"High|Medium|Low\""));
    }

    #[test]
    fn moderator_prompt_lists_reviews_per_reviewer() {
        let reviews = vec![Review {
            reviewer_name: "Security Architect".into(),
            issues: vec![Issue {
                category: "Security".into(),
                description: "No auth story".into(),
                severity: Severity::High,
                suggested_fix: Some("Add an auth section".into()),
                reviewer_name: "Security Architect".into(),
            }],
            overall_assessment: "Risky".into(),
            created_at: Utc::now(),
            tokens: TokenUsage::default(),
        }];
        let prompt = moderator_user_prompt(&doc(), &reviews, Some("ship v1"));
        assert!(prompt.contains("=== Security Architect ==="));
        assert!(prompt.contains("[High] Security: No auth story"));
        assert!(prompt.contains("Suggested fix: Add an auth section"));
        assert!(prompt.contains("Goal: ship v1"));
    }

    #[test]
    fn moderator_system_prompt_carries_the_policy() {
        let prompt = moderator_system_prompt("tighten scope");
        assert!(prompt.contains("MUST resolve every High severity issue"));
        assert!(prompt.contains("MUST NOT invent facts"));
        assert!(prompt.contains("placeholder section"));
        assert!(prompt.contains("Focus: tighten scope"));
    }

    #[test]
    fn planner_prompt_mentions_style_and_count() {
        let prompt = planner_user_prompt(
            "API design",
            "architecture",
            "some content",
            4,
            Some("handle 1M rps"),
            Some("blunt and pragmatic"),
        );
        assert!(prompt.contains("exactly 4 expert participants"));
        assert!(prompt.contains("blunt and pragmatic"));
        assert!(prompt.contains("handle 1M rps"));
    }
}
