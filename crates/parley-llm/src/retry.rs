use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::client::{ChatRequest, ChatResponse, LlmClient};
use parley_core::{ParleyError, Result};

/// Total attempts per call, including the first.
const MAX_ATTEMPTS: u32 = 3;
/// Base delay for exponential backoff (doubles each retry).
const BASE_DELAY_MS: u64 = 500;

/// Extract the retry-after hint from a rate-limit error (in seconds).
fn retry_after_hint(err: &ParleyError) -> Option<u64> {
    if let ParleyError::RateLimited { retry_after_secs } = err {
        Some(*retry_after_secs)
    } else {
        None
    }
}

/// Wraps any [`LlmClient`] with the transient-retry policy: up to three
/// attempts, exponential backoff with jitter, rate-limit hints honored.
/// Fatal errors pass through untouched.
pub struct RetryClient {
    inner: Arc<dyn LlmClient>,
    max_attempts: u32,
}

impl RetryClient {
    pub fn new(inner: Arc<dyn LlmClient>) -> Self {
        Self {
            inner,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait]
impl LlmClient for RetryClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            match self.inner.complete(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let base = retry_after_hint(&e)
                        .map(|s| s * 1000)
                        .unwrap_or(BASE_DELAY_MS * 2u64.pow(attempt));
                    let jitter = rand::thread_rng().gen_range(0..=base / 4);
                    warn!(
                        client = self.inner.name(),
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = base + jitter,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(Duration::from_millis(base + jitter)).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ParleyError::LlmTransient("retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockFailure, MockResponse};

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", "hello")
    }

    #[tokio::test]
    async fn recovers_from_transient_errors() {
        let mock = MockClient::new("mock")
            .with_failure(MockFailure::Transient("HTTP 503".into()))
            .with_failure(MockFailure::Transient("HTTP 529".into()))
            .with_response("recovered");
        let requests = mock.recorded_requests();
        let client = RetryClient::new(Arc::new(mock));

        let resp = client.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "recovered");
        assert_eq!(requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mock = MockClient::new("mock")
            .with_default_failure(MockFailure::Transient("HTTP 503".into()));
        let requests = mock.recorded_requests();
        let client = RetryClient::new(Arc::new(mock));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(requests.lock().unwrap().len(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let mock = MockClient::new("mock")
            .with_failure(MockFailure::Fatal("invalid api key".into()))
            .with_response("never reached");
        let requests = mock.recorded_requests();
        let client = RetryClient::new(Arc::new(mock));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ParleyError::LlmFatal(_)));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }
}
