use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::presets::{preset_template, PresetTemplate, FALLBACK};
use crate::prompts::{self, REVIEW_OUTPUT_CONTRACT};
use parley_core::{ModelStrategy, Preset, Result, RoleSpec, TokenUsage};
use parley_llm::{ChatRequest, LlmClient};

const PLAN_TEMPERATURE: f32 = 0.7;
/// How much of the document the meta-prompt gets to see.
const CONTENT_PREVIEW_CHARS: usize = 500;

/// Round-robin pool for `model_strategy = diverse`. Only the round-robin
/// property is promised; the pool itself is an implementation detail.
pub const DIVERSE_MODEL_POOL: &[&str] = &[
    "claude-sonnet-4-5",
    "gpt-5.2",
    "gemini-3-pro-preview",
    "claude-opus-4-6",
    "gpt-5.2-pro",
    "gemini-3-flash-preview",
];

/// Inputs to one planning call.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub title: String,
    pub document_type: String,
    /// Initial document content; only a preview is forwarded to the model.
    pub content: String,
    pub goal: Option<String>,
    pub participant_style: Option<String>,
    pub num_participants: u32,
    pub preset: Preset,
    pub model_strategy: ModelStrategy,
    pub primary_model: String,
}

/// The planner's output: a complete reviewer panel plus directives.
#[derive(Debug, Clone)]
pub struct PlannedRoundtable {
    pub participants: Vec<RoleSpec>,
    pub moderator_focus: String,
    pub convergence_criteria: String,
    pub tokens: TokenUsage,
    /// Non-fatal notes, e.g. fallback-template use.
    pub warnings: Vec<String>,
}

/// Designs the reviewer panel for a session: preset template, LLM-generated
/// panel, or the generic fallback when the model's output doesn't validate.
/// The fallback means planning itself essentially cannot fail a session.
pub struct MetaPlanner {
    client: Arc<dyn LlmClient>,
    model: String,
}

#[derive(Deserialize)]
struct WirePlan {
    #[serde(default)]
    participants: Vec<WireParticipant>,
    #[serde(default)]
    moderator_focus: String,
    #[serde(default)]
    convergence_criteria: String,
}

#[derive(Deserialize)]
struct WireParticipant {
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    expertise: String,
    #[serde(default)]
    perspective: String,
    #[serde(default)]
    system_prompt: String,
}

impl MetaPlanner {
    pub fn new(client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    /// Produce the roundtable plan. Presets never call the LLM.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlannedRoundtable> {
        let n = request.num_participants.clamp(2, 6) as usize;

        if let Some(template) = preset_template(request.preset) {
            info!(preset = ?request.preset, participants = n, "using preset roundtable template");
            return Ok(finish(
                from_template(template, n),
                template.moderator_focus.to_string(),
                template.convergence_criteria.to_string(),
                TokenUsage::default(),
                Vec::new(),
                request,
            ));
        }

        match self.generate(request, n).await {
            Ok(planned) => Ok(planned),
            Err((reason, tokens)) => {
                warn!(error = %reason, "meta-planner failed, using generic fallback template");
                let warning = format!("meta-planner fell back to the generic template: {reason}");
                Ok(finish(
                    from_template(&FALLBACK, n),
                    FALLBACK.moderator_focus.to_string(),
                    FALLBACK.convergence_criteria.to_string(),
                    tokens,
                    vec![warning],
                    request,
                ))
            }
        }
    }

    /// One LLM call producing the panel. Errors carry whatever tokens the
    /// failed exchange consumed so the session can still account for them.
    async fn generate(
        &self,
        request: &PlanRequest,
        n: usize,
    ) -> std::result::Result<PlannedRoundtable, (String, TokenUsage)> {
        let preview: String = request.content.chars().take(CONTENT_PREVIEW_CHARS).collect();
        let chat = ChatRequest {
            model: self.model.clone(),
            system: Some(prompts::META_PLANNER_SYSTEM.to_string()),
            prompt: prompts::planner_user_prompt(
                &request.title,
                &request.document_type,
                &preview,
                n as u32,
                request.goal.as_deref(),
                request.participant_style.as_deref(),
            ),
            max_tokens: 8192,
            temperature: PLAN_TEMPERATURE,
            json_mode: true,
        };

        let response = self
            .client
            .complete(&chat)
            .await
            .map_err(|e| (e.to_string(), TokenUsage::default()))?;
        let tokens = response.usage;

        let wire: WirePlan = serde_json::from_str(extract_json(&response.content))
            .map_err(|e| (format!("invalid JSON: {e}"), tokens))?;

        let mut participants: Vec<RoleSpec> = wire
            .participants
            .into_iter()
            .filter(|p| !p.name.trim().is_empty() && !p.system_prompt.trim().is_empty())
            .map(|p| RoleSpec {
                name: p.name.trim().to_string(),
                role: p.role,
                expertise: p.expertise,
                perspective: p.perspective,
                system_prompt: p.system_prompt,
                model: None,
            })
            .collect();

        if participants.is_empty() {
            return Err(("model produced no usable participants".into(), tokens));
        }

        let mut warnings = Vec::new();
        if participants.len() != n {
            warnings.push(format!(
                "meta-planner produced {} participants, adjusted to {n}",
                participants.len()
            ));
        }
        adjust_count(&mut participants, n);

        let moderator_focus = if wire.moderator_focus.trim().is_empty() {
            FALLBACK.moderator_focus.to_string()
        } else {
            wire.moderator_focus
        };
        let convergence_criteria = if wire.convergence_criteria.trim().is_empty() {
            FALLBACK.convergence_criteria.to_string()
        } else {
            wire.convergence_criteria
        };

        Ok(finish(
            participants,
            moderator_focus,
            convergence_criteria,
            tokens,
            warnings,
            request,
        ))
    }
}

fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Materialize a template panel of exactly `n` participants.
fn from_template(template: &PresetTemplate, n: usize) -> Vec<RoleSpec> {
    let mut specs: Vec<RoleSpec> = template
        .roles
        .iter()
        .take(n)
        .map(|r| r.to_role_spec())
        .collect();
    adjust_count(&mut specs, n);
    specs
}

/// Truncate or extend a panel to exactly `n`, drawing extra reviewers from
/// the generic fallback roles.
fn adjust_count(specs: &mut Vec<RoleSpec>, n: usize) {
    specs.truncate(n);
    let mut extra = 0usize;
    while specs.len() < n {
        let template = &FALLBACK.roles[extra % FALLBACK.roles.len()];
        specs.push(template.to_role_spec());
        extra += 1;
    }
}

/// Deduplicate names with deterministic " A", " B", … suffixes.
fn dedupe_names(specs: &mut [RoleSpec]) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut next_suffix = 0u8;
    for spec in specs.iter_mut() {
        if !seen.insert(spec.name.clone()) {
            loop {
                let candidate = format!("{} {}", spec.name, (b'A' + next_suffix) as char);
                next_suffix += 1;
                if seen.insert(candidate.clone()) {
                    spec.name = candidate;
                    break;
                }
            }
        }
    }
}

/// Assign models per strategy and guarantee parseable reviewer output.
fn finish(
    mut participants: Vec<RoleSpec>,
    moderator_focus: String,
    convergence_criteria: String,
    tokens: TokenUsage,
    warnings: Vec<String>,
    request: &PlanRequest,
) -> PlannedRoundtable {
    dedupe_names(&mut participants);

    for (i, spec) in participants.iter_mut().enumerate() {
        spec.model = Some(match request.model_strategy {
            ModelStrategy::Uniform => request.primary_model.clone(),
            ModelStrategy::Diverse => DIVERSE_MODEL_POOL[i % DIVERSE_MODEL_POOL.len()].to_string(),
        });
        // Every reviewer must know the output shape, wherever the spec came from.
        if !spec.system_prompt.contains("\"overall_assessment\"") {
            spec.system_prompt
                .push_str(&format!("\n\n{REVIEW_OUTPUT_CONTRACT}"));
        }
    }

    PlannedRoundtable {
        participants,
        moderator_focus,
        convergence_criteria,
        tokens,
        warnings,
    }
}
