//! # parley-runtime
//!
//! The heart of Parley: the pure convergence engine, the session runtime
//! that drives refinement loops as background tasks, and the single-call
//! roundtable entry point.

pub mod convergence;
mod driver;
pub mod roundtable;
pub mod runtime;

pub use convergence::{decide, document_delta, ConvergencePolicy, DELTA_METRIC};
pub use roundtable::{run_roundtable, RefinementOutcome, RoundtableRequest};
pub use runtime::{Runtime, StartRequest, StatusSnapshot};
