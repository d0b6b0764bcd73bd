//! Live state of a running work order

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::{JoinBarriers, WorkOrderContext, WorkOrderStatus, WorkerStatus};
use crate::events::Event;
use crate::ids::{WorkOrderId, WorkerId};
use crate::persistence::{WorkOrderRecord, WorkerRecord};
use crate::workflow::Workflow;

/// A status change that is not allowed from the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move work order from {from} to {to}")]
pub struct InvalidTransition {
    pub from: WorkOrderStatus,
    pub to: WorkOrderStatus,
}

/// In-process state shared by every worker of one work order
///
/// The status lives in a `watch` channel: transitions are applied atomically
/// and every reader sees either the old or the new value. `running` counts
/// workers that are scheduled, running or parked; the order settles when it
/// drops to zero.
pub(crate) struct WorkOrder {
    id: WorkOrderId,
    workflow: Arc<Workflow>,
    context: WorkOrderContext,
    status: watch::Sender<WorkOrderStatus>,
    settled: watch::Sender<bool>,
    running: AtomicUsize,
    next_branch: AtomicU64,
    revision: Mutex<u64>,
    workers: RwLock<BTreeMap<WorkerId, WorkerRecord>>,
    joins: Mutex<JoinBarriers>,
    parked: Mutex<Vec<WorkerId>>,
    last_error: RwLock<Option<Event>>,
    created_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn new(id: WorkOrderId, workflow: Arc<Workflow>, context: WorkOrderContext) -> Self {
        Self {
            id,
            workflow,
            context,
            status: watch::Sender::new(WorkOrderStatus::Created),
            settled: watch::Sender::new(false),
            running: AtomicUsize::new(0),
            next_branch: AtomicU64::new(0),
            revision: Mutex::new(0),
            workers: RwLock::new(BTreeMap::new()),
            joins: Mutex::new(JoinBarriers::new()),
            parked: Mutex::new(Vec::new()),
            last_error: RwLock::new(None),
            created_at: Utc::now(),
        }
    }

    /// Rebuild live state from checkpoints
    ///
    /// Workers are restored but not counted as running; the caller counts
    /// each worker it reschedules through [`resume_worker`](Self::resume_worker).
    pub fn restore(
        record: WorkOrderRecord,
        workflow: Arc<Workflow>,
        workers: Vec<WorkerRecord>,
    ) -> Self {
        let order = Self {
            id: record.id,
            workflow,
            context: WorkOrderContext::from_map(record.context),
            status: watch::Sender::new(record.status),
            settled: watch::Sender::new(false),
            running: AtomicUsize::new(0),
            next_branch: AtomicU64::new(record.next_branch),
            revision: Mutex::new(record.revision),
            workers: RwLock::new(workers.into_iter().map(|w| (w.id.clone(), w)).collect()),
            joins: Mutex::new(JoinBarriers::from_snapshot(record.joins)),
            parked: Mutex::new(Vec::new()),
            last_error: RwLock::new(record.last_error),
            created_at: record.created_at,
        };
        if order.status().is_terminal() {
            order.mark_settled();
        }
        order
    }

    pub fn id(&self) -> &WorkOrderId {
        &self.id
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn context(&self) -> &WorkOrderContext {
        &self.context
    }

    pub fn status(&self) -> WorkOrderStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<WorkOrderStatus> {
        self.status.subscribe()
    }

    /// Move to `to` if the current status allows it, returning the old status
    pub fn transition(&self, to: WorkOrderStatus) -> Result<WorkOrderStatus, InvalidTransition> {
        let mut result = Err(InvalidTransition { from: to, to });
        self.status.send_if_modified(|current| {
            if current.can_transition_to(to) {
                result = Ok(*current);
                *current = to;
                true
            } else {
                result = Err(InvalidTransition { from: *current, to });
                false
            }
        });
        result
    }

    // ---- workers ----

    /// Allocate a branch and register a new ACTIVE worker at `step`
    ///
    /// The worker counts as running from this point.
    pub fn add_worker(
        &self,
        step: &str,
        previous_step: Option<&str>,
        parent: Option<&WorkerId>,
    ) -> WorkerRecord {
        let branch = self.next_branch.fetch_add(1, Ordering::SeqCst);
        let record = WorkerRecord {
            id: WorkerId::new(&self.id, branch),
            work_order_id: self.id.clone(),
            current_step: step.to_string(),
            previous_step: previous_step.map(str::to_string),
            joined: false,
            parent: parent.cloned(),
            status: WorkerStatus::Active,
            updated_at: Utc::now(),
        };
        self.running.fetch_add(1, Ordering::SeqCst);
        self.workers.write().insert(record.id.clone(), record.clone());
        record
    }

    /// Count a restored worker as running again
    pub fn resume_worker(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker(&self, id: &WorkerId) -> Option<WorkerRecord> {
        self.workers.read().get(id).cloned()
    }

    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.workers.read().values().cloned().collect()
    }

    /// Apply a change to a worker record, returning the updated copy
    pub fn update_worker(
        &self,
        id: &WorkerId,
        f: impl FnOnce(&mut WorkerRecord),
    ) -> Option<WorkerRecord> {
        let mut workers = self.workers.write();
        let record = workers.get_mut(id)?;
        f(record);
        record.updated_at = Utc::now();
        Some(record.clone())
    }

    pub fn set_worker_status(&self, id: &WorkerId, status: WorkerStatus) -> Option<WorkerRecord> {
        self.update_worker(id, |w| w.status = status)
    }

    /// Record that a worker stopped running; true when it was the last one
    pub fn worker_stopped(&self) -> bool {
        self.running.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn running_workers(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    // ---- pause ----

    /// Park a worker if the order is still paused
    ///
    /// The status is re-read under the parked lock, so a concurrent resume
    /// or cancel either sees this worker in the list or this call sees the
    /// new status and returns false.
    pub fn park(&self, id: &WorkerId) -> bool {
        let mut parked = self.parked.lock();
        if self.status() != WorkOrderStatus::Paused {
            return false;
        }
        parked.push(id.clone());
        true
    }

    /// Take every parked worker
    pub fn take_parked(&self) -> Vec<WorkerId> {
        std::mem::take(&mut *self.parked.lock())
    }

    // ---- joins ----

    pub fn with_joins<R>(&self, f: impl FnOnce(&mut JoinBarriers) -> R) -> R {
        f(&mut self.joins.lock())
    }

    // ---- errors ----

    pub fn record_error(&self, event: Event) {
        *self.last_error.write() = Some(event);
    }

    pub fn last_error(&self) -> Option<Event> {
        self.last_error.read().clone()
    }

    // ---- completion ----

    pub fn mark_settled(&self) {
        self.settled.send_replace(true);
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Wait until the order is terminal and no worker is running
    pub async fn wait_settled(&self) {
        let mut rx = self.settled.subscribe();
        // the sender lives in self, so this cannot fail while we hold &self
        let _ = rx.wait_for(|settled| *settled).await;
    }

    /// Snapshot the order for checkpointing, bumping the revision
    ///
    /// The revision is taken under the same lock the snapshot is built in,
    /// so a higher revision never carries older state.
    pub fn checkpoint(&self) -> WorkOrderRecord {
        let mut revision = self.revision.lock();
        *revision += 1;
        WorkOrderRecord {
            id: self.id.clone(),
            workflow_uri: self.workflow.uri().to_string(),
            status: self.status(),
            context: self.context.snapshot(),
            workers: self.workers.read().keys().cloned().collect(),
            joins: self.joins.lock().snapshot(),
            next_branch: self.next_branch.load(Ordering::SeqCst),
            last_error: self.last_error(),
            revision: *revision,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for WorkOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkOrder")
            .field("id", &self.id)
            .field("workflow", &self.workflow.uri())
            .field("status", &self.status())
            .field("running", &self.running_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Step;

    fn order() -> WorkOrder {
        let workflow = Workflow::builder("wf://linear")
            .step(Step::new("A", "native:a").on("ok", ["B"]))
            .step(Step::new("B", "native:b").terminal_on("ok"))
            .build()
            .unwrap();
        WorkOrder::new(
            WorkOrderId::new("wo-1"),
            Arc::new(workflow),
            WorkOrderContext::new(),
        )
    }

    #[test]
    fn test_status_transitions() {
        let order = order();
        assert_eq!(order.status(), WorkOrderStatus::Created);

        assert_eq!(
            order.transition(WorkOrderStatus::Running),
            Ok(WorkOrderStatus::Created)
        );
        assert_eq!(
            order.transition(WorkOrderStatus::Created),
            Err(InvalidTransition {
                from: WorkOrderStatus::Running,
                to: WorkOrderStatus::Created,
            })
        );

        order.transition(WorkOrderStatus::Cancelled).unwrap();
        assert!(order.transition(WorkOrderStatus::Failed).is_err());
        assert_eq!(order.status(), WorkOrderStatus::Cancelled);
    }

    #[test]
    fn test_status_receiver_sees_changes() {
        let order = order();
        let rx = order.status_receiver();
        order.transition(WorkOrderStatus::Running).unwrap();
        assert_eq!(*rx.borrow(), WorkOrderStatus::Running);
    }

    #[test]
    fn test_worker_ids_and_running_count() {
        let order = order();
        let root = order.add_worker("A", None, None);
        let child = order.add_worker("B", Some("A"), Some(&root.id));

        assert_eq!(root.id.as_str(), "wo-1#0");
        assert_eq!(child.id.as_str(), "wo-1#1");
        assert_eq!(child.parent.as_ref(), Some(&root.id));
        assert_eq!(order.running_workers(), 2);

        assert!(!order.worker_stopped());
        assert!(order.worker_stopped());
    }

    #[test]
    fn test_update_worker() {
        let order = order();
        let root = order.add_worker("A", None, None);

        let updated = order
            .update_worker(&root.id, |w| {
                w.previous_step = Some(w.current_step.clone());
                w.current_step = "B".into();
            })
            .unwrap();
        assert_eq!(updated.current_step, "B");
        assert_eq!(order.worker(&root.id).unwrap().previous_step.as_deref(), Some("A"));

        let done = order.set_worker_status(&root.id, WorkerStatus::Done).unwrap();
        assert_eq!(done.status, WorkerStatus::Done);
    }

    #[test]
    fn test_park_only_while_paused() {
        let order = order();
        let root = order.add_worker("A", None, None);
        order.transition(WorkOrderStatus::Running).unwrap();
        assert!(!order.park(&root.id));

        order.transition(WorkOrderStatus::Paused).unwrap();
        assert!(order.park(&root.id));
        assert_eq!(order.take_parked(), vec![root.id.clone()]);
        assert!(order.take_parked().is_empty());
    }

    #[test]
    fn test_checkpoint_revisions_increase() {
        let order = order();
        order.add_worker("A", None, None);
        order.context().set("k", "v");

        let first = order.checkpoint();
        let second = order.checkpoint();
        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);
        assert_eq!(second.next_branch, 1);
        assert_eq!(second.context.get("k"), Some(&serde_json::json!("v")));
        assert_eq!(second.workers.len(), 1);
    }

    #[test]
    fn test_restore_from_checkpoint() {
        let order = order();
        let root = order.add_worker("A", None, None);
        order.transition(WorkOrderStatus::Running).unwrap();
        let record = order.checkpoint();

        let restored = WorkOrder::restore(record, order.workflow().clone(), order.workers());
        assert_eq!(restored.status(), WorkOrderStatus::Running);
        assert_eq!(restored.running_workers(), 0);
        assert!(restored.worker(&root.id).is_some());
        assert!(!restored.is_settled());

        let next = restored.add_worker("B", Some("A"), Some(&root.id));
        assert_eq!(next.id.branch_index(), 1);
        assert_eq!(restored.checkpoint().revision, 2);
    }

    #[tokio::test]
    async fn test_wait_settled() {
        let order = Arc::new(order());
        let waiter = {
            let order = order.clone();
            tokio::spawn(async move { order.wait_settled().await })
        };
        order.mark_settled();
        waiter.await.unwrap();
        assert!(order.is_settled());
    }
}
