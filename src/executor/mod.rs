//! Execution scheduler
//!
//! Runs a catalog on a bounded virtual pool and on every physical target
//! discovery turns up, posting results as they arrive.

mod parallel;
mod physical;
mod runner;
mod session;
mod sink;

pub use runner::{
    Orchestrator, RunOptions, FILTERED_OUT, NO_ELIGIBLE_TARGET, NO_TARGET, NO_VIRTUAL_RESULT,
};
pub use session::{CANCELLED, EXECUTION_GRACE};
pub use sink::{CollectingSink, ResultSink};
