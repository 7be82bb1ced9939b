use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::client::{ChatRequest, ChatResponse, LlmClient};
use parley_core::{ParleyError, Result, TokenUsage};

/// OpenAI-compatible chat-completions transport (works with OpenAI, Azure,
/// Together, vLLM, and other compatible gateways).
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    client_name: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            client_name: "openai".into(),
        }
    }

    /// Use a custom base URL and display name (for compatible gateways).
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url;
        self.client_name = name;
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.client_name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt,
        }));

        let mut body = serde_json::json!({
            "model": &request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        debug!(model = %request.model, "sending OpenAI API request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::LlmTransient(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(match status {
                429 => ParleyError::RateLimited {
                    retry_after_secs: 30,
                },
                400 | 401 | 403 | 404 | 422 => {
                    ParleyError::LlmFatal(format!("HTTP {status}: {text}"))
                }
                _ => ParleyError::LlmTransient(format!("HTTP {status}: {text}")),
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ParleyError::LlmTransient(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage::new(
            data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ChatResponse { content, usage })
    }
}
