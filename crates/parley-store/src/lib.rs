//! # parley-store
//!
//! Durable, session-scoped persistence for document versions, per-version
//! reviews, session metadata, and convergence reports. One SQLite database
//! per process; every artifact is an individually retrievable, atomically
//! written JSON record.

pub mod store;

pub use store::SessionStore;
