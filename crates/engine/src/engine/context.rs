//! Collaborators shared by every worker
//!
//! One [`EngineContext`] is built per engine and passed explicitly to every
//! worker task; nothing in the crate reaches engine facilities through
//! global state.

use std::sync::Arc;

use minijinja::context;
use tracing::{debug, error};

use crate::events::{template_names, ErrorKind, Event, EventDraft, EventEmitter, EventLevel};
use crate::executable::ExecutableRegistry;
use crate::ids::WorkerId;
use crate::persistence::{WorkOrderStore, WorkerRecord};
use crate::pool::ExecutionPool;
use crate::work_order::WorkOrder;

pub(crate) struct EngineContext {
    pub registry: Arc<ExecutableRegistry>,
    pub store: Arc<dyn WorkOrderStore>,
    pub emitter: EventEmitter,
    pub pool: ExecutionPool,
}

impl EngineContext {
    /// Persist the current work order state
    ///
    /// A stale revision only means a concurrent checkpoint with newer state
    /// got there first. Other failures are logged and reported as an error
    /// event; execution continues.
    pub async fn checkpoint(&self, order: &WorkOrder) {
        let record = order.checkpoint();
        let revision = record.revision;
        match self.store.save_work_order(record).await {
            Ok(()) => {}
            Err(e) if e.is_stale() => {
                debug!(work_order_id = %order.id(), revision, "Skipped stale checkpoint");
            }
            Err(e) => {
                error!(work_order_id = %order.id(), revision, error = %e, "Failed to checkpoint work order");
                self.report_store_failure(order, &e.to_string());
            }
        }
    }

    /// Persist a worker record
    pub async fn save_worker(&self, order: &WorkOrder, record: WorkerRecord) {
        let worker_id = record.id.clone();
        if let Err(e) = self.store.save_worker(record).await {
            error!(%worker_id, error = %e, "Failed to save worker record");
            self.report_store_failure(order, &e.to_string());
        }
    }

    /// Emit an error event for a work order and remember it as the last error
    pub fn emit_error(
        &self,
        order: &WorkOrder,
        draft: EventDraft,
        template: &str,
        values: minijinja::Value,
    ) -> Event {
        let event = self.emitter.emit(draft, template, values);
        order.record_error(event.clone());
        event
    }

    fn report_store_failure(&self, order: &WorkOrder, error: &str) {
        let root = WorkerId::root(order.id());
        self.emit_error(
            order,
            EventDraft::status(order.id(), &root, EventLevel::Error)
                .error(ErrorKind::Persistence),
            template_names::CHECKPOINT_FAILED,
            context! {
                work_order => order.id().as_str(),
                error => error,
            },
        );
    }
}
