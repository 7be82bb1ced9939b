//! Mock LLM client for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{ChatRequest, ChatResponse, LlmClient};
use parley_core::{ParleyError, Result, TokenUsage};

/// A scripted failure for the mock to return.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transient(String),
    Fatal(String),
}

impl MockFailure {
    fn into_error(self) -> ParleyError {
        match self {
            MockFailure::Transient(msg) => ParleyError::LlmTransient(msg),
            MockFailure::Fatal(msg) => ParleyError::LlmFatal(msg),
        }
    }
}

/// A pre-configured response from the mock client.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// If set, the client returns this error instead.
    pub failure: Option<MockFailure>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: String::new(),
            usage: TokenUsage::new(100, 50),
            failure: None,
        }
    }
}

impl MockResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }
}

type Handler = dyn Fn(&ChatRequest) -> MockResponse + Send + Sync;

/// A mock LLM client that replays queued responses, a default response, or
/// answers through a request-aware handler.
///
/// # Example
/// ```
/// use parley_llm::MockClient;
/// let client = MockClient::new("mock").with_response("looks fine");
/// ```
pub struct MockClient {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    default_response: Arc<Mutex<Option<MockResponse>>>,
    handler: Arc<Mutex<Option<Box<Handler>>>>,
    /// Every request received, for assertions in tests.
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    name: String,
}

impl MockClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            default_response: Arc::new(Mutex::new(None)),
            handler: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a text response.
    pub fn with_response(self, content: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::text(content));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, failure: MockFailure) -> Self {
        self.responses.lock().unwrap().push(MockResponse {
            failure: Some(failure),
            ..Default::default()
        });
        self
    }

    /// Response returned whenever the queue is empty.
    pub fn with_default_response(self, content: &str) -> Self {
        *self.default_response.lock().unwrap() = Some(MockResponse::text(content));
        self
    }

    /// Failure returned whenever the queue is empty.
    pub fn with_default_failure(self, failure: MockFailure) -> Self {
        *self.default_response.lock().unwrap() = Some(MockResponse {
            failure: Some(failure),
            ..Default::default()
        });
        self
    }

    /// Answer every request through a closure. Takes precedence over the
    /// queue; lets one shared client serve reviewer, moderator, and planner
    /// calls deterministically.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&ChatRequest) -> MockResponse + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
        self
    }

    /// All requests made to this client so far.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self, request: &ChatRequest) -> MockResponse {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            return handler(request);
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            self.default_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| MockResponse::text("(mock: no more queued responses)"))
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response(request);

        if let Some(failure) = mock.failure {
            return Err(failure.into_error());
        }

        Ok(ChatResponse {
            content: mock.content,
            usage: mock.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_queued_responses_in_order() {
        let client = MockClient::new("mock")
            .with_response("first")
            .with_response("second");
        let req = ChatRequest::new("m", "p");

        assert_eq!(client.complete(&req).await.unwrap().content, "first");
        assert_eq!(client.complete(&req).await.unwrap().content, "second");
        // Queue exhausted, no default configured
        assert!(client
            .complete(&req)
            .await
            .unwrap()
            .content
            .contains("no more queued"));
    }

    #[tokio::test]
    async fn default_response_repeats() {
        let client = MockClient::new("mock").with_default_response("same");
        let req = ChatRequest::new("m", "p");
        for _ in 0..3 {
            assert_eq!(client.complete(&req).await.unwrap().content, "same");
        }
    }

    #[tokio::test]
    async fn handler_sees_the_request() {
        let client = MockClient::new("mock").with_handler(|req| {
            if req.json_mode {
                MockResponse::text("{}")
            } else {
                MockResponse::text("prose")
            }
        });
        let json = client
            .complete(&ChatRequest::new("m", "p").json())
            .await
            .unwrap();
        let prose = client.complete(&ChatRequest::new("m", "p")).await.unwrap();
        assert_eq!(json.content, "{}");
        assert_eq!(prose.content, "prose");
    }

    #[tokio::test]
    async fn records_requests() {
        let client = MockClient::new("mock").with_default_response("ok");
        let req = ChatRequest::new("m", "hello").with_system("be brief");
        let _ = client.complete(&req).await;
        let recorded = client.recorded_requests();
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn failures_map_to_error_kinds() {
        let client = MockClient::new("mock")
            .with_failure(MockFailure::Transient("503".into()))
            .with_failure(MockFailure::Fatal("quota".into()));
        let req = ChatRequest::new("m", "p");
        assert!(client.complete(&req).await.unwrap_err().is_transient());
        assert!(!client.complete(&req).await.unwrap_err().is_transient());
    }
}
