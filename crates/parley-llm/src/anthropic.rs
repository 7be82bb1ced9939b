use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::client::{ChatRequest, ChatResponse, LlmClient};
use parley_core::{ParleyError, Result, TokenUsage};

/// Anthropic Claude API transport.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{
                "role": "user",
                "content": request.prompt,
            }],
        });

        if let Some(ref system) = request.system {
            body["system"] = serde_json::json!(system);
        }
        // No native JSON mode; the prompt's output contract carries it.

        body
    }
}

/// Classify a non-success HTTP status into the error taxonomy.
fn classify_status(status: u16, retry_after: Option<u64>, body: &str) -> ParleyError {
    match status {
        429 => ParleyError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(30),
        },
        400 | 401 | 403 | 404 | 422 => ParleyError::LlmFatal(format!("HTTP {status}: {body}")),
        _ => ParleyError::LlmTransient(format!("HTTP {status}: {body}")),
    }
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request_body(request);
        debug!(model = %request.model, "sending Anthropic API request");

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::LlmTransient(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = retry_after_secs(&resp);
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ParleyError::LlmTransient(e.to_string()))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        if b["type"] == "text" {
                            b["text"].as_str().map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage_data = &data["usage"];
        let usage = TokenUsage::new(
            usage_data["input_tokens"].as_u64().unwrap_or(0),
            usage_data["output_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ChatResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_retryable() {
        let err = classify_status(429, Some(12), "slow down");
        match err {
            ParleyError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 12),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn auth_failures_are_fatal() {
        assert!(matches!(
            classify_status(401, None, "bad key"),
            ParleyError::LlmFatal(_)
        ));
        assert!(matches!(
            classify_status(400, None, "bad request"),
            ParleyError::LlmFatal(_)
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(503, None, "overloaded").is_transient());
        assert!(classify_status(529, None, "overloaded").is_transient());
    }
}
