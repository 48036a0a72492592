//! Selection and equivalence engine
//!
//! Decides, per physical target, which cases of a selection run there.
//! Targets investigate a selection one at a time so that equivalence is
//! only ever judged against targets that already concluded.

mod context;
mod engine;

pub use context::{
    Claim, ConcludedView, ContextState, ExecutionContext, SelectionSlot, INVESTIGATION_POLL,
};
pub use engine::{investigate, Investigation};
