//! Workflow orchestration engine
//!
//! The engine module provides the [`Engine`], which starts work orders and
//! runs their workers on the execution pool. Workers execute one step at a
//! time through the step executor and follow the resolved transitions.

mod context;
mod runtime;
mod step_executor;
mod worker;

pub use runtime::{Engine, EngineBuilder, EngineError, WorkOrderReport};
