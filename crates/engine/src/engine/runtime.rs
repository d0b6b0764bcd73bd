//! Orchestration engine
//!
//! The `Engine` is responsible for:
//! - Publishing workflows into its catalog
//! - Starting work orders and scheduling their root worker
//! - Pausing, resuming and cancelling live work orders
//! - Recovering work orders from the persistence capability

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::context::EngineContext;
use super::worker::{cancel_parked, schedule, settle};
use crate::config::EngineConfig;
use crate::events::{AuditSink, Event, EventEmitter, EventTemplates, TracingAuditSink};
use crate::executable::ExecutableRegistry;
use crate::ids::{IdMinter, UuidIdMinter, WorkOrderId};
use crate::persistence::{
    InMemoryWorkOrderStore, StoreError, WorkOrderFilter, WorkOrderRecord, WorkOrderStore,
    WorkerRecord,
};
use crate::pool::{ExecutionPool, PoolError};
use crate::work_order::{
    InvalidTransition, WorkOrder, WorkOrderContext, WorkOrderStatus, WorkerStatus,
};
use crate::workflow::{Workflow, WorkflowValidationError};

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow published under this uri
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A different workflow is already published under this uri
    #[error("workflow {0} is already published with a different definition")]
    WorkflowExists(String),

    /// Workflow failed validation
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(#[from] WorkflowValidationError),

    /// Work order not found
    #[error("work order not found: {0}")]
    WorkOrderNotFound(WorkOrderId),

    /// Status change not allowed from the current status
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Work order still has running workers in this engine
    #[error("work order {0} is already live in this engine")]
    AlreadyLive(WorkOrderId),

    /// Work order did not settle in time
    #[error("timed out waiting for work order {0}")]
    WaitTimeout(WorkOrderId),

    /// Execution pool refused the work
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Store error
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkOrderNotFound(id) => EngineError::WorkOrderNotFound(id),
            other => EngineError::Store(other),
        }
    }
}

/// Point-in-time view of a work order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderReport {
    pub id: WorkOrderId,
    pub workflow_uri: String,
    pub status: WorkOrderStatus,
    /// Most recent error event, if any
    pub last_error: Option<Event>,
    pub workers: Vec<WorkerRecord>,
    /// Workers scheduled, running or parked; zero for orders not live here
    pub running_workers: usize,
}

/// Builder for [`Engine`]
///
/// Every collaborator has an in-process default: an in-memory store, a
/// tracing audit sink, UUID v7 ids and the built-in event templates.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn WorkOrderStore>>,
    sink: Option<Arc<dyn AuditSink>>,
    minter: Option<Arc<dyn IdMinter>>,
    registry: Option<Arc<ExecutableRegistry>>,
    templates: Option<EventTemplates>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn WorkOrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_minter(mut self, minter: Arc<dyn IdMinter>) -> Self {
        self.minter = Some(minter);
        self
    }

    /// Share an executable registry with other engines
    pub fn with_registry(mut self, registry: Arc<ExecutableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_templates(mut self, templates: EventTemplates) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Build the engine
    ///
    /// Must be called from within a tokio runtime; the event emitter spawns
    /// its delivery task here.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let pool = ExecutionPool::new(self.config.pool.clone())?;
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let emitter = EventEmitter::spawn(
            sink,
            self.templates.unwrap_or_default(),
            self.config.event_buffer,
        );

        let ctx = EngineContext {
            registry: self.registry.unwrap_or_default(),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryWorkOrderStore::new())),
            emitter,
            pool,
        };

        info!(
            max_concurrency = self.config.pool.max_concurrency,
            "Engine started"
        );

        Ok(Engine {
            ctx: Arc::new(ctx),
            minter: self.minter.unwrap_or_else(|| Arc::new(UuidIdMinter)),
            workflows: DashMap::new(),
            orders: DashMap::new(),
            config: self.config,
        })
    }
}

/// Workflow orchestration engine
///
/// Owns the workflow catalog, the live work orders and the execution pool.
/// Each work order runs as a set of workers on the pool; the engine API
/// only changes status and schedules workers, it never blocks on a step.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use tessera_engine::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), EngineError> {
/// let engine = Engine::builder().build()?;
/// engine.registry().register("native:extract", ConstantOutcome::new("ok"));
/// engine.registry().register("native:load", ConstantOutcome::new("ok"));
///
/// let workflow = Workflow::builder("wf://etl")
///     .step(Step::new("extract", "native:extract").on("ok", ["load"]))
///     .step(Step::new("load", "native:load").terminal_on("ok"))
///     .build()?;
/// engine.publish_workflow(workflow)?;
///
/// let id = engine.start_work_order("wf://etl", HashMap::new()).await?;
/// let status = engine.wait_for_completion(&id, None).await?;
/// assert_eq!(status, WorkOrderStatus::Finished);
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    ctx: Arc<EngineContext>,
    minter: Arc<dyn IdMinter>,
    workflows: DashMap<String, Arc<Workflow>>,
    orders: DashMap<WorkOrderId, Arc<WorkOrder>>,
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine with default collaborators and the given config
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        EngineBuilder::new().with_config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry binding executable references to step bodies
    pub fn registry(&self) -> &ExecutableRegistry {
        &self.ctx.registry
    }

    pub fn store(&self) -> &Arc<dyn WorkOrderStore> {
        &self.ctx.store
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    /// Validate and publish a workflow
    ///
    /// Publishing an identical definition again is a no-op.
    pub fn publish_workflow(&self, workflow: Workflow) -> Result<Arc<Workflow>, EngineError> {
        workflow.validate()?;
        let uri = workflow.uri().to_string();

        match self.workflows.entry(uri.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if **existing.get() == workflow {
                    Ok(Arc::clone(existing.get()))
                } else {
                    Err(EngineError::WorkflowExists(uri))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let workflow = Arc::new(workflow);
                slot.insert(Arc::clone(&workflow));
                info!(workflow_uri = %uri, steps = workflow.steps().len(), "Published workflow");
                Ok(workflow)
            }
        }
    }

    pub fn workflow(&self, uri: &str) -> Option<Arc<Workflow>> {
        self.workflows.get(uri).map(|w| Arc::clone(w.value()))
    }

    // =========================================================================
    // Work orders
    // =========================================================================

    /// Start a work order from a published workflow
    ///
    /// Returns as soon as the root worker is scheduled. Step faults never
    /// surface here; only an unknown workflow, a store failure or a pool
    /// refusal does.
    #[instrument(skip(self, initial_context), fields(workflow_uri = %workflow_uri))]
    pub async fn start_work_order(
        &self,
        workflow_uri: &str,
        initial_context: HashMap<String, serde_json::Value>,
    ) -> Result<WorkOrderId, EngineError> {
        let workflow = self
            .workflow(workflow_uri)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_uri.to_string()))?;
        self.ctx.pool.check_admission()?;

        let id = self.minter.mint_work_order_id();
        let order = Arc::new(WorkOrder::new(
            id.clone(),
            Arc::clone(&workflow),
            WorkOrderContext::from_map(initial_context),
        ));
        let root = order.add_worker(workflow.start_step(), None, None);

        self.ctx.store.create_work_order(order.checkpoint()).await?;
        self.ctx.save_worker(&order, root.clone()).await;
        self.orders.insert(id.clone(), Arc::clone(&order));

        order.transition(WorkOrderStatus::Running)?;
        self.ctx.checkpoint(&order).await;
        info!(work_order_id = %id, "Starting work order");

        schedule(&self.ctx, &order, &root.id).await?;
        Ok(id)
    }

    /// Current status of a work order
    pub async fn get_status(&self, id: &WorkOrderId) -> Result<WorkOrderStatus, EngineError> {
        if let Some(order) = self.live(id) {
            return Ok(order.status());
        }
        Ok(self.ctx.store.get_status(id).await?)
    }

    /// Status, last error and worker records of a work order
    pub async fn status_report(&self, id: &WorkOrderId) -> Result<WorkOrderReport, EngineError> {
        if let Some(order) = self.live(id) {
            return Ok(WorkOrderReport {
                id: id.clone(),
                workflow_uri: order.workflow().uri().to_string(),
                status: order.status(),
                last_error: order.last_error(),
                workers: order.workers(),
                running_workers: order.running_workers(),
            });
        }

        let record = self.ctx.store.get_work_order(id).await?;
        let workers = self.ctx.store.load_workers(id).await?;
        Ok(WorkOrderReport {
            id: record.id,
            workflow_uri: record.workflow_uri,
            status: record.status,
            last_error: record.last_error,
            workers,
            running_workers: 0,
        })
    }

    /// Cancel a work order
    ///
    /// Running steps are not interrupted; each worker stops at its next step
    /// boundary. Parked workers stop immediately.
    #[instrument(skip(self), fields(work_order_id = %id))]
    pub async fn cancel(&self, id: &WorkOrderId) -> Result<(), EngineError> {
        let Some(order) = self.live(id) else {
            return self.cancel_stored(id).await;
        };

        let previous = order.transition(WorkOrderStatus::Cancelled)?;
        info!(%previous, "Cancelled work order");
        self.ctx.checkpoint(&order).await;
        cancel_parked(&self.ctx, &order).await;
        Ok(())
    }

    /// Cancel a checkpointed order that is not live in this engine
    async fn cancel_stored(&self, id: &WorkOrderId) -> Result<(), EngineError> {
        let mut record = self.ctx.store.get_work_order(id).await?;
        if !record.status.can_transition_to(WorkOrderStatus::Cancelled) {
            return Err(InvalidTransition {
                from: record.status,
                to: WorkOrderStatus::Cancelled,
            }
            .into());
        }

        let workers = self.ctx.store.load_workers(id).await?;
        for mut worker in workers.into_iter().filter(|w| !w.status.is_terminal()) {
            worker.status = WorkerStatus::Cancelled;
            worker.updated_at = chrono::Utc::now();
            self.ctx.store.save_worker(worker).await?;
        }

        record.status = WorkOrderStatus::Cancelled;
        record.revision += 1;
        record.updated_at = chrono::Utc::now();
        self.ctx.store.save_work_order(record).await?;
        info!("Cancelled stored work order");
        Ok(())
    }

    /// Pause a running work order
    ///
    /// Workers finish their current step and park at the next boundary.
    #[instrument(skip(self), fields(work_order_id = %id))]
    pub async fn pause(&self, id: &WorkOrderId) -> Result<(), EngineError> {
        let order = self.live_or_not_found(id)?;
        order.transition(WorkOrderStatus::Paused)?;
        info!("Paused work order");
        self.ctx.checkpoint(&order).await;
        Ok(())
    }

    /// Resume a paused work order, rescheduling parked workers
    #[instrument(skip(self), fields(work_order_id = %id))]
    pub async fn resume(&self, id: &WorkOrderId) -> Result<(), EngineError> {
        let order = self.live_or_not_found(id)?;
        order.transition(WorkOrderStatus::Running)?;
        self.ctx.checkpoint(&order).await;

        let parked = order.take_parked();
        info!(parked = parked.len(), "Resumed work order");
        let mut first_err = None;
        for worker_id in &parked {
            if let Err(e) = schedule(&self.ctx, &order, worker_id).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Rebuild a work order from its checkpoints and reschedule its workers
    ///
    /// Every ACTIVE worker restarts at its recorded step, so a step that was
    /// running when the previous process stopped runs again.
    #[instrument(skip(self), fields(work_order_id = %id))]
    pub async fn recover_work_order(
        &self,
        id: &WorkOrderId,
    ) -> Result<WorkOrderStatus, EngineError> {
        if let Some(order) = self.live(id) {
            if !order.is_settled() {
                return Err(EngineError::AlreadyLive(id.clone()));
            }
        }

        let record: WorkOrderRecord = self.ctx.store.get_work_order(id).await?;
        let workflow = self
            .workflow(&record.workflow_uri)
            .ok_or_else(|| EngineError::WorkflowNotFound(record.workflow_uri.clone()))?;
        let workers = self.ctx.store.load_workers(id).await?;

        let order = Arc::new(WorkOrder::restore(record, workflow, workers));
        self.orders.insert(id.clone(), Arc::clone(&order));

        let status = order.status();
        if status.is_terminal() {
            debug!(%status, "Recovered work order is already terminal");
            return Ok(status);
        }
        if status == WorkOrderStatus::Created {
            order.transition(WorkOrderStatus::Running)?;
            self.ctx.checkpoint(&order).await;
        }

        let active: Vec<_> = order
            .workers()
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Active)
            .map(|w| w.id)
            .collect();
        info!(workers = active.len(), %status, "Recovering work order");

        if active.is_empty() {
            settle(&self.ctx, &order).await;
            return Ok(order.status());
        }

        // count every worker before the first one can finish
        for _ in &active {
            order.resume_worker();
        }
        for worker_id in &active {
            if let Err(e) = schedule(&self.ctx, &order, worker_id).await {
                warn!(%worker_id, error = %e, "Could not reschedule recovered worker");
            }
        }
        Ok(order.status())
    }

    /// Wait until a work order is terminal and none of its workers is running
    pub async fn wait_for_completion(
        &self,
        id: &WorkOrderId,
        timeout: Option<Duration>,
    ) -> Result<WorkOrderStatus, EngineError> {
        let Some(order) = self.live(id) else {
            return Ok(self.ctx.store.get_status(id).await?);
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, order.wait_settled())
                .await
                .map_err(|_| EngineError::WaitTimeout(id.clone()))?,
            None => order.wait_settled().await,
        }
        Ok(order.status())
    }

    /// Drop settled work orders from the live table
    ///
    /// Their final state stays in the store, so status, reports, waiting
    /// and recovery keep working through it. Returns the number evicted.
    pub fn prune_settled(&self) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, order| !order.is_settled());
        let pruned = before.saturating_sub(self.orders.len());
        if pruned > 0 {
            debug!(pruned, live = self.orders.len(), "Pruned settled work orders");
        }
        pruned
    }

    /// Number of work orders held in memory by this engine
    pub fn live_work_orders(&self) -> usize {
        self.orders.len()
    }

    /// List checkpointed work orders
    pub async fn list_work_orders(
        &self,
        filter: WorkOrderFilter,
    ) -> Result<Vec<WorkOrderRecord>, EngineError> {
        Ok(self.ctx.store.list_work_orders(filter).await?)
    }

    // =========================================================================
    // Events and lifecycle
    // =========================================================================

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.emitter.subscribe()
    }

    /// Wait until every event emitted so far reached the audit sink
    pub async fn flush_events(&self) {
        self.ctx.emitter.flush().await;
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.ctx.pool
    }

    /// Stop accepting work, drain running workers and flush events
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let drained = self.ctx.pool.shutdown().await;
        self.ctx.emitter.flush().await;
        drained?;
        info!("Engine stopped");
        Ok(())
    }

    fn live(&self, id: &WorkOrderId) -> Option<Arc<WorkOrder>> {
        self.orders.get(id).map(|o| Arc::clone(o.value()))
    }

    fn live_or_not_found(&self, id: &WorkOrderId) -> Result<Arc<WorkOrder>, EngineError> {
        self.live(id)
            .ok_or_else(|| EngineError::WorkOrderNotFound(id.clone()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workflows", &self.workflows.len())
            .field("live_work_orders", &self.orders.len())
            .field("pool", &self.ctx.pool)
            .finish()
    }
}
