//! # parley-cli
//!
//! Command-line interface for the Parley roundtable refinement engine.
//!
//! ## Commands
//!
//! - `parley start` — Run a refinement session on a document file
//! - `parley status` — Poll a session's status
//! - `parley list` — List sessions, newest first
//! - `parley show` — Print a document version
//! - `parley reviews` — Print the reviews for a version
//! - `parley report` — Print a session's convergence report
//! - `parley continue` — Extend a max-iterations session
//! - `parley delete` — Delete a terminal session
//! - `parley completions` — Generate shell completions

pub mod commands;

pub use commands::Cli;
