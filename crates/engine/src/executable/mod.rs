//! Late-bound step bodies
//!
//! This module contains the dispatch side of the engine:
//! - [`Invocable`], the capability a step body implements
//! - [`ExecutableRegistry`], mapping executable references to bodies
//! - [`StepContext`], what a body sees while it runs

mod context;
mod invocable;
mod registry;

pub use context::StepContext;
pub use invocable::{ConstantOutcome, FnInvocable, Invocable, InvocationError, InvocationResult};
pub use registry::{ExecutableRef, ExecutableRegistry, RegistryError};
