use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration — maps to `parley.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub llm: LlmConfig,
    pub refinement: RefinementConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

// ── LLM ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Transport: "anthropic", "openai", or "mock" (tests/dry runs).
    pub provider: String,
    /// Primary model identifier, e.g. "claude-sonnet-4-5".
    pub model: String,
    /// Temperature for reviewer calls.
    pub review_temperature: f32,
    /// Temperature for moderator refinement calls.
    pub refine_temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Anthropic API key; `ANTHROPIC_API_KEY` env var is the fallback.
    pub anthropic_api_key: Option<String>,
    /// OpenAI API key; `OPENAI_API_KEY` env var is the fallback.
    pub openai_api_key: Option<String>,
    /// Custom base URL for OpenAI-compatible gateways.
    pub openai_base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            review_temperature: 0.2,
            refine_temperature: 0.3,
            max_tokens: 8192,
            anthropic_api_key: None,
            openai_api_key: None,
            openai_base_url: None,
        }
    }
}

// ── Refinement defaults ────────────────────────────────────────

/// Defaults applied to sessions that don't specify their own values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_iterations: u32,
    pub delta_threshold: f64,
    pub stop_on_no_high_issues: bool,
    pub num_participants: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            delta_threshold: 0.05,
            stop_on_no_high_issues: true,
            num_participants: 3,
        }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database holding all session artifacts.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".parley")
                .join("parley.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter: trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl ParleyConfig {
    /// Validate the configuration. Returns soft warnings; hard errors are
    /// returned as `Err` and should abort startup.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        match self.llm.provider.as_str() {
            "anthropic" => {
                if self.llm.anthropic_api_key.is_none() {
                    warnings.push(
                        "llm.anthropic_api_key not set; relying on ANTHROPIC_API_KEY".into(),
                    );
                }
            }
            "openai" => {
                if self.llm.openai_api_key.is_none() {
                    warnings.push("llm.openai_api_key not set; relying on OPENAI_API_KEY".into());
                }
            }
            "mock" => {}
            other => return Err(format!("llm.provider: unknown provider '{other}'")),
        }

        if self.refinement.max_iterations == 0 {
            return Err("refinement.max_iterations: must be at least 1".into());
        }
        if self.refinement.delta_threshold <= 0.0 || self.refinement.delta_threshold >= 1.0 {
            return Err("refinement.delta_threshold: must be in (0, 1)".into());
        }
        if !(2..=6).contains(&self.refinement.num_participants) {
            warnings.push(format!(
                "refinement.num_participants: {} outside [2, 6], will be clamped",
                self.refinement.num_participants
            ));
        }

        Ok(warnings)
    }
}
