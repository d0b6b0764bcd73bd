//! Step executor
//!
//! Runs exactly one step body for one worker visit:
//! resolve the executable, record the start time, invoke, and turn the
//! result into an [`Outcome`]. Faults never escape; a returned error, a
//! panic or a missing binding all become the reserved `ERROR` outcome with
//! the fault attached to the exit event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use minijinja::context;
use tracing::{debug, instrument, warn};

use super::context::EngineContext;
use crate::events::{template_names, ErrorKind, Event, EventDraft, EventLevel, StepPhase};
use crate::executable::{InvocationError, RegistryError, StepContext};
use crate::ids::WorkerId;
use crate::work_order::WorkOrder;
use crate::workflow::{Outcome, Step};

/// Why a step produced the `ERROR` outcome
#[derive(Debug, Clone)]
pub(crate) enum StepFault {
    Unresolved(RegistryError),
    Invocation(InvocationError),
}

/// What one step visit produced
#[derive(Debug)]
pub(crate) struct StepReport {
    pub outcome: Outcome,
    pub fault: Option<StepFault>,
    pub elapsed: Duration,
    pub exit_event: Event,
}

/// Run `step` once for `worker_id`
///
/// Always emits exactly one entry event before and one exit event after the
/// body; progress events the body reports fall in between.
#[instrument(skip_all, fields(work_order_id = %order.id(), worker_id = %worker_id, step = %step.name))]
pub(crate) async fn execute_step(
    ctx: &EngineContext,
    order: &WorkOrder,
    worker_id: &WorkerId,
    step: &Step,
) -> StepReport {
    ctx.emitter.emit(
        EventDraft::status(order.id(), worker_id, EventLevel::Info)
            .step(step.name.as_str())
            .phase(StepPhase::Entered),
        template_names::STEP_STARTED,
        context! { step => step.name.as_str() },
    );

    let started_at = Utc::now();
    let clock = Instant::now();

    let result = match ctx.registry.resolve(&step.executable) {
        Err(e) => Err(StepFault::Unresolved(e)),
        Ok(body) => {
            let step_ctx = StepContext::new(
                worker_id.clone(),
                step.name.as_str(),
                started_at,
                order.context().clone(),
                ctx.emitter.clone(),
                order.status_receiver(),
            );
            match AssertUnwindSafe(body.invoke(&step_ctx)).catch_unwind().await {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(StepFault::Invocation(e)),
                Err(panic) => Err(StepFault::Invocation(InvocationError::panicked(
                    panic_message(panic.as_ref()),
                ))),
            }
        }
    };

    let elapsed = clock.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;
    let exit = EventDraft::status(order.id(), worker_id, EventLevel::Info)
        .step(step.name.as_str())
        .phase(StepPhase::Exited);

    match result {
        Ok(outcome) => {
            debug!(outcome = %outcome, elapsed_ms, "Step finished");
            let exit_event = ctx.emitter.emit(
                exit,
                template_names::STEP_FINISHED,
                context! {
                    step => step.name.as_str(),
                    outcome => outcome.as_str(),
                    elapsed_ms => elapsed_ms,
                },
            );
            StepReport {
                outcome,
                fault: None,
                elapsed,
                exit_event,
            }
        }
        Err(StepFault::Unresolved(e)) => {
            warn!(executable = %step.executable, "Step has no executable binding");
            let exit_event = ctx.emit_error(
                order,
                exit.error(ErrorKind::UnresolvedExecutable)
                    .details(serde_json::json!({ "executable": step.executable.as_str() })),
                template_names::UNRESOLVED_EXECUTABLE,
                context! {
                    step => step.name.as_str(),
                    executable => step.executable.as_str(),
                },
            );
            StepReport {
                outcome: Outcome::error(),
                fault: Some(StepFault::Unresolved(e)),
                elapsed,
                exit_event,
            }
        }
        Err(StepFault::Invocation(e)) => {
            warn!(error = %e, elapsed_ms, "Step body faulted");
            let details = serde_json::to_value(&e).unwrap_or(serde_json::Value::Null);
            let exit_event = ctx.emit_error(
                order,
                exit.error(ErrorKind::InvocationFault).details(details),
                template_names::STEP_FAULTED,
                context! {
                    step => step.name.as_str(),
                    elapsed_ms => elapsed_ms,
                    error => e.to_string(),
                },
            );
            StepReport {
                outcome: Outcome::error(),
                fault: Some(StepFault::Invocation(e)),
                elapsed,
                exit_event,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "step body panicked".to_string()
    }
}
