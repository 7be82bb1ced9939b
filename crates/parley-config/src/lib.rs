//! # parley-config
//!
//! Process-level configuration for the Parley runtime: the `parley.toml`
//! schema, defaults, validation, and an environment-aware loader.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{LlmConfig, LoggingConfig, ParleyConfig, RefinementConfig, StorageConfig};
