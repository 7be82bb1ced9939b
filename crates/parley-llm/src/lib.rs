//! # parley-llm
//!
//! The single LLM capability the roundtable core consumes: one
//! prompt/response exchange with token accounting. Ships a retrying
//! wrapper, thin Anthropic/OpenAI transports, and a deterministic mock
//! for tests.

pub mod anthropic;
pub mod client;
pub mod mock;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicClient;
pub use client::{ChatRequest, ChatResponse, LlmClient};
pub use mock::{MockClient, MockFailure, MockResponse};
pub use openai::OpenAiClient;
pub use retry::RetryClient;
