//! The logical/physical plan representation: an arena of operator nodes
//! addressed by [NodeId] rather than live-object parent pointers.
pub mod plan;

pub use plan::{NodeId, Plan, PlanKind, SinkKind};
