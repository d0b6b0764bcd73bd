//! Invocable step bodies

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StepContext;
use crate::workflow::Outcome;

/// Fault raised by a step body
///
/// The engine converts any fault into the reserved `ERROR` outcome and
/// attaches the fault to the step's exit event. Bodies do not need to catch
/// their own errors; panics are captured the same way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub kind: Option<String>,

    /// Additional error details
    pub details: Option<serde_json::Value>,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            details: None,
        }
    }

    /// Fault recorded for a body that panicked
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(message).with_kind("panic")
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}: {}", kind, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for InvocationError {}

impl From<anyhow::Error> for InvocationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Result of invoking a step body
pub type InvocationResult = Result<Outcome, InvocationError>;

/// A step body the engine can run
///
/// Implementations are registered in the
/// [`ExecutableRegistry`](super::ExecutableRegistry) under an executable
/// reference and looked up when a step naming that reference runs.
///
/// # Example
///
/// ```ignore
/// struct Validate;
///
/// #[async_trait]
/// impl Invocable for Validate {
///     async fn invoke(&self, ctx: &StepContext) -> InvocationResult {
///         let rows = ctx.get_context_value("rows").unwrap_or_default();
///         ctx.report_step_progress(1, 1, "validated");
///         Ok(if rows.is_null() { "empty".into() } else { "ok".into() })
///     }
/// }
/// ```
#[async_trait]
pub trait Invocable: Send + Sync + 'static {
    async fn invoke(&self, ctx: &StepContext) -> InvocationResult;
}

/// Adapter turning an async closure into an [`Invocable`]
pub struct FnInvocable<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnInvocable<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Invocable for FnInvocable<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationResult> + Send + 'static,
{
    async fn invoke(&self, ctx: &StepContext) -> InvocationResult {
        (self.f)(ctx.clone()).await
    }
}

/// Body that always reports the same outcome
#[derive(Debug, Clone)]
pub struct ConstantOutcome(pub Outcome);

impl ConstantOutcome {
    pub fn new(outcome: impl Into<Outcome>) -> Self {
        Self(outcome.into())
    }
}

#[async_trait]
impl Invocable for ConstantOutcome {
    async fn invoke(&self, _ctx: &StepContext) -> InvocationResult {
        Ok(self.0.clone())
    }
}
