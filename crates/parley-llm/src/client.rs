use async_trait::async_trait;
use parley_core::{Result, TokenUsage};

/// One prompt/response exchange with an LLM.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier, e.g. "claude-sonnet-4-5".
    pub model: String,
    /// System prompt, separate from the user prompt.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
    /// Ask the provider for a JSON object response where supported.
    /// Providers without a JSON mode rely on the prompt's output contract.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: 8192,
            temperature: 0.3,
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A complete response from an LLM.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Trait implemented by each LLM transport (Anthropic, OpenAI, mock).
///
/// Implementations must be safe for concurrent calls; the core imposes no
/// additional coordination. Transient failures surface as
/// `ParleyError::LlmTransient` / `RateLimited`, non-retryable failures
/// (auth, quota, content filter) as `ParleyError::LlmFatal`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Human-readable transport name, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Send a request and await the full response.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
