//! # parley-core
//!
//! Core types, errors, and events for the Parley roundtable refinement
//! engine. This crate defines the shared vocabulary used by every other
//! crate in the workspace: the document/review data model, the unified
//! error type, and the per-session event bus.

pub mod error;
pub mod event;
pub mod types;

pub use error::{ErrorCategory, ParleyError, Result};
pub use event::{EventStream, LogLevel, ParticipantInfo, RoundtableBus, SessionEvent};
pub use types::*;
