//! Workflow graph model
//!
//! This module contains the immutable template side of the engine:
//! - [`Workflow`] and [`Step`], the published step graph
//! - [`TransitionTable`], the per-step outcome routing
//! - [`JoinSpec`], fan-in declarations on join steps

mod definition;
mod transition;

pub use definition::{JoinSpec, Step, Workflow, WorkflowBuilder, WorkflowValidationError};
pub use transition::{
    Outcome, Resolution, Route, RouteMatch, TransitionTable, UnroutableOutcome, ERROR_OUTCOME,
};
