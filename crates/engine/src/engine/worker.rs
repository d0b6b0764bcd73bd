//! Worker run loop
//!
//! A worker walks one linear path through the workflow graph. At every step
//! boundary it checks the work order status, counts join arrivals, runs the
//! step through the executor and applies the resolved transition. The last
//! worker to stop settles the work order.

use std::sync::Arc;

use futures::future::BoxFuture;
use minijinja::context;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::context::EngineContext;
use super::step_executor::{execute_step, StepFault};
use crate::events::{template_names, ErrorKind, EventDraft, EventLevel};
use crate::ids::WorkerId;
use crate::pool::PoolError;
use crate::work_order::{JoinArrival, WorkOrder, WorkOrderStatus, WorkerStatus};
use crate::workflow::{Resolution, Step};

/// How a worker left its run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// Reached a terminal route
    Done,
    /// Arrived at a join but was not the last predecessor
    Subsumed,
    /// Forked children that run into a downstream join
    WaitingJoin,
    /// Stopped at a boundary while the order is paused
    Parked,
    /// Stopped at a boundary because the order is cancelled or failed
    Cancelled,
    /// Could not continue; the order has been failed
    Failed,
}

impl StepFault {
    fn describe(&self) -> String {
        match self {
            StepFault::Unresolved(e) => e.to_string(),
            StepFault::Invocation(e) => e.to_string(),
        }
    }
}

/// Boxed worker future, so a running worker can schedule further workers
pub(crate) fn worker_task(
    ctx: Arc<EngineContext>,
    order: Arc<WorkOrder>,
    worker_id: WorkerId,
) -> BoxFuture<'static, ()> {
    Box::pin(run_worker(ctx, order, worker_id))
}

/// Submit a worker to the pool; a refused submission fails the order
///
/// Returns the pool error so entry points can surface it to their caller.
pub(crate) async fn schedule(
    ctx: &Arc<EngineContext>,
    order: &Arc<WorkOrder>,
    worker_id: &WorkerId,
) -> Result<(), PoolError> {
    let task = worker_task(Arc::clone(ctx), Arc::clone(order), worker_id.clone());
    if let Err(e) = ctx.pool.submit(task) {
        reject_worker(ctx, order, worker_id, &e).await;
        return Err(e);
    }
    Ok(())
}

#[instrument(skip_all, fields(work_order_id = %order.id(), worker_id = %worker_id))]
async fn run_worker(ctx: Arc<EngineContext>, order: Arc<WorkOrder>, worker_id: WorkerId) {
    debug!("Worker started");
    let exit = drive(&ctx, &order, &worker_id).await;
    finish(&ctx, &order, &worker_id, exit).await;
}

async fn drive(ctx: &Arc<EngineContext>, order: &Arc<WorkOrder>, worker_id: &WorkerId) -> WorkerExit {
    let workflow = Arc::clone(order.workflow());

    loop {
        match order.status() {
            WorkOrderStatus::Paused => {
                if order.park(worker_id) {
                    debug!("Worker parked");
                    return WorkerExit::Parked;
                }
                // resumed or cancelled while parking; look again
                continue;
            }
            status if status.is_terminal() => {
                debug!(%status, "Work order stopped; worker will not continue");
                return WorkerExit::Cancelled;
            }
            _ => {}
        }

        let Some(record) = order.worker(worker_id) else {
            error!("Worker record missing");
            fail_order(ctx, order).await;
            return WorkerExit::Failed;
        };
        let Some(step) = workflow.step(&record.current_step) else {
            error!(step = %record.current_step, "Worker positioned at an unknown step");
            fail_order(ctx, order).await;
            return WorkerExit::Failed;
        };

        if let Some(join) = step.join.as_ref().filter(|_| !record.joined) {
            let arrival = order.with_joins(|joins| {
                joins.arrive(&step.name, join, record.previous_step.as_deref(), worker_id)
            });
            match arrival {
                JoinArrival::Waiting { arrived, required } => {
                    debug!(join = %step.name, arrived, required, "Arrived at join");
                    ctx.checkpoint(order).await;
                    return WorkerExit::Subsumed;
                }
                JoinArrival::Released { waiting_parents } => {
                    debug!(join = %step.name, "Last arrival at join; running join step");
                    for parent in waiting_parents {
                        if let Some(rec) = order.set_worker_status(&parent, WorkerStatus::Done) {
                            ctx.save_worker(order, rec).await;
                        }
                    }
                    if let Some(rec) = order.update_worker(worker_id, |w| w.joined = true) {
                        ctx.save_worker(order, rec).await;
                    }
                    ctx.checkpoint(order).await;
                }
            }
        }

        let report = execute_step(ctx, order, worker_id, step).await;

        // the visit completed, but a stopped order takes no further transitions
        if order.status().is_terminal() {
            debug!(step = %step.name, "Work order stopped during step");
            return WorkerExit::Cancelled;
        }

        let route = match step.transitions.resolve(&report.outcome) {
            Ok(route) => route,
            Err(unroutable) => {
                warn!(step = %step.name, outcome = %report.outcome, "Unroutable outcome");
                ctx.emit_error(
                    order,
                    EventDraft::status(order.id(), worker_id, EventLevel::Error)
                        .step(step.name.as_str())
                        .error(ErrorKind::UnroutableOutcome)
                        .details(json!({
                            "outcome": unroutable.outcome,
                            "exitSequence": report.exit_event.sequence,
                            "fault": report.fault.as_ref().map(StepFault::describe),
                        })),
                    template_names::UNROUTABLE_OUTCOME,
                    context! {
                        step => step.name.as_str(),
                        outcome => report.outcome.as_str(),
                    },
                );
                fail_order(ctx, order).await;
                return WorkerExit::Failed;
            }
        };

        debug!(
            step = %step.name,
            outcome = %report.outcome,
            matched = ?route.matched,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Resolved transition"
        );

        match route.resolution() {
            Resolution::Terminate => return WorkerExit::Done,
            Resolution::Continue(next) => {
                let moved = order.update_worker(worker_id, |w| {
                    w.previous_step = Some(step.name.clone());
                    w.current_step = next.to_string();
                    w.joined = false;
                });
                if let Some(rec) = moved {
                    ctx.save_worker(order, rec).await;
                }
                ctx.checkpoint(order).await;
            }
            Resolution::FanOut(successors) => {
                return fan_out(ctx, order, worker_id, step, successors).await;
            }
        }
    }
}

/// Spawn one child worker per successor
async fn fan_out(
    ctx: &Arc<EngineContext>,
    order: &Arc<WorkOrder>,
    worker_id: &WorkerId,
    step: &Step,
    successors: &[String],
) -> WorkerExit {
    let join = order
        .workflow()
        .downstream_join(successors)
        .map(|s| s.name.clone());

    // the parent waits before any child can reach the join
    if let Some(join) = &join {
        order.with_joins(|joins| joins.wait_on(join, worker_id));
        if let Some(rec) = order.set_worker_status(worker_id, WorkerStatus::WaitingJoin) {
            ctx.save_worker(order, rec).await;
        }
    }

    let mut children = Vec::with_capacity(successors.len());
    for successor in successors {
        let child = order.add_worker(successor, Some(&step.name), Some(worker_id));
        ctx.save_worker(order, child.clone()).await;
        children.push(child.id);
    }
    ctx.checkpoint(order).await;

    debug!(
        step = %step.name,
        branches = children.len(),
        join = ?join,
        "Fanned out"
    );

    let mut rejected = false;
    for child in &children {
        rejected |= schedule(ctx, order, child).await.is_err();
    }

    match (rejected, join) {
        (true, _) => WorkerExit::Failed,
        (false, Some(_)) => WorkerExit::WaitingJoin,
        (false, None) => WorkerExit::Done,
    }
}

async fn finish(ctx: &EngineContext, order: &WorkOrder, worker_id: &WorkerId, exit: WorkerExit) {
    let status = match exit {
        WorkerExit::Parked => return,
        // already recorded before the children were scheduled
        WorkerExit::WaitingJoin => None,
        WorkerExit::Done | WorkerExit::Subsumed => Some(WorkerStatus::Done),
        WorkerExit::Cancelled => Some(WorkerStatus::Cancelled),
        WorkerExit::Failed => Some(WorkerStatus::Error),
    };
    if let Some(status) = status {
        if let Some(rec) = order.set_worker_status(worker_id, status) {
            ctx.save_worker(order, rec).await;
        }
    }

    debug!(?exit, "Worker stopped");
    if order.worker_stopped() {
        settle(ctx, order).await;
    }
}

/// Mark a worker the pool refused and fail the order
async fn reject_worker(ctx: &EngineContext, order: &WorkOrder, worker_id: &WorkerId, e: &PoolError) {
    let step = order
        .worker(worker_id)
        .map(|w| w.current_step)
        .unwrap_or_default();
    warn!(%worker_id, error = %e, "Worker submission rejected");

    ctx.emit_error(
        order,
        EventDraft::status(order.id(), worker_id, EventLevel::Error)
            .step(step.as_str())
            .error(ErrorKind::SubmissionRejected),
        template_names::SUBMISSION_REJECTED,
        context! {
            step => step.as_str(),
            error => e.to_string(),
        },
    );
    if let Some(rec) = order.set_worker_status(worker_id, WorkerStatus::Error) {
        ctx.save_worker(order, rec).await;
    }
    fail_order(ctx, order).await;
    if order.worker_stopped() {
        settle(ctx, order).await;
    }
}

async fn fail_order(ctx: &EngineContext, order: &WorkOrder) {
    if order.transition(WorkOrderStatus::Failed).is_ok() {
        error!(work_order_id = %order.id(), "Work order failed");
        ctx.checkpoint(order).await;
    }
}

/// Stop parked workers of a cancelled order
pub(crate) async fn cancel_parked(ctx: &EngineContext, order: &WorkOrder) {
    for worker_id in order.take_parked() {
        if let Some(rec) = order.set_worker_status(&worker_id, WorkerStatus::Cancelled) {
            ctx.save_worker(order, rec).await;
        }
        if order.worker_stopped() {
            settle(ctx, order).await;
        }
    }
}

/// Close out a work order once no worker is running
///
/// A non-terminal order finishes, unless a join still holds partial
/// arrivals: then no worker is left to complete it and the order fails.
/// Parents still waiting on a join are released here.
pub(crate) async fn settle(ctx: &EngineContext, order: &WorkOrder) {
    if !order.status().is_terminal() {
        let stalled: Vec<(String, usize, usize)> = order.with_joins(|joins| {
            joins
                .stalled()
                .map(|(name, state)| {
                    let required = order
                        .workflow()
                        .step(name)
                        .and_then(|s| s.join.as_ref())
                        .map(|j| j.predecessors.len())
                        .unwrap_or_default();
                    (name.to_string(), state.arrived.len(), required)
                })
                .collect()
        });

        if stalled.is_empty() {
            if order.transition(WorkOrderStatus::Finished).is_ok() {
                info!(work_order_id = %order.id(), "Work order finished");
            }
        } else {
            let root = WorkerId::root(order.id());
            for (join, arrived, required) in &stalled {
                ctx.emit_error(
                    order,
                    EventDraft::status(order.id(), &root, EventLevel::Error)
                        .step(join.as_str())
                        .error(ErrorKind::JoinStalled)
                        .details(json!({ "arrived": arrived, "required": required })),
                    template_names::JOIN_STALLED,
                    context! {
                        step => join.as_str(),
                        arrived => arrived,
                        required => required,
                    },
                );
            }
            fail_order(ctx, order).await;
        }
    }

    let parent_status = match order.status() {
        WorkOrderStatus::Finished => WorkerStatus::Done,
        _ => WorkerStatus::Cancelled,
    };
    for parent in order.with_joins(|joins| joins.drain_waiting_parents()) {
        if let Some(rec) = order.set_worker_status(&parent, parent_status) {
            ctx.save_worker(order, rec).await;
        }
    }

    ctx.checkpoint(order).await;
    order.mark_settled();
    debug!(work_order_id = %order.id(), status = %order.status(), "Work order settled");
}
