//! Step execution context

use chrono::{DateTime, Utc};
use minijinja::context;
use serde_json::Value;
use tokio::sync::watch;

use crate::events::{template_names, Event, EventDraft, EventEmitter};
use crate::ids::{WorkOrderId, WorkerId};
use crate::work_order::{WorkOrderContext, WorkOrderStatus};

/// Context handed to a step body for one visit of one step
///
/// The context provides:
/// - The ids of the owning work order and worker, and the step start time
/// - Read/write access to the work order's shared key/value context
/// - Progress reporting through the event pipeline
/// - Cooperative cancellation detection
///
/// Cloning is cheap; clones share the underlying work order state.
#[derive(Debug, Clone)]
pub struct StepContext {
    work_order_id: WorkOrderId,
    worker_id: WorkerId,
    step: String,
    started_at: DateTime<Utc>,
    values: WorkOrderContext,
    emitter: EventEmitter,
    status: watch::Receiver<WorkOrderStatus>,
}

impl StepContext {
    pub(crate) fn new(
        worker_id: WorkerId,
        step: impl Into<String>,
        started_at: DateTime<Utc>,
        values: WorkOrderContext,
        emitter: EventEmitter,
        status: watch::Receiver<WorkOrderStatus>,
    ) -> Self {
        Self {
            work_order_id: worker_id.work_order_id(),
            worker_id,
            step: step.into(),
            started_at,
            values,
            emitter,
            status,
        }
    }

    pub fn work_order_id(&self) -> &WorkOrderId {
        &self.work_order_id
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// When the engine invoked this step body
    pub fn step_started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn get_context_value(&self, key: &str) -> Option<Value> {
        self.values.get(key)
    }

    /// Write a context value, visible to every worker of the work order
    pub fn set_context_value(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.set(key, value);
    }

    /// The shared context handle itself
    pub fn context(&self) -> &WorkOrderContext {
        &self.values
    }

    /// Emit a `PROGRESS` event for this step
    pub fn report_step_progress(&self, current: u64, total: u64, message: &str) -> Event {
        self.emitter.emit(
            EventDraft::progress(&self.work_order_id, &self.worker_id, current, total)
                .step(self.step.clone()),
            template_names::PROGRESS,
            context! {
                message => message,
                current => current,
                total => total,
                step => self.step.as_str(),
            },
        )
    }

    /// Whether the work order has been cancelled
    ///
    /// The engine never interrupts a running body; long-running bodies may
    /// poll this to return early.
    pub fn is_cancel_requested(&self) -> bool {
        *self.status.borrow() == WorkOrderStatus::Cancelled
    }
}
