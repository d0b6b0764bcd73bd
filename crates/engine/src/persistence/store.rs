//! WorkOrderStore trait definition

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::ids::{WorkOrderId, WorkerId};
use crate::work_order::{JoinState, WorkOrderStatus, WorkerStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Work order not found
    #[error("work order not found: {0}")]
    WorkOrderNotFound(WorkOrderId),

    /// Work order already exists
    #[error("work order already exists: {0}")]
    AlreadyExists(WorkOrderId),

    /// A newer checkpoint has already been stored
    #[error("stale revision: stored {stored}, attempted {attempted}")]
    StaleRevision { stored: u64, attempted: u64 },

    /// Backend error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error only means a newer checkpoint won the race
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleRevision { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Checkpointed state of a work order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderRecord {
    pub id: WorkOrderId,
    pub workflow_uri: String,
    pub status: WorkOrderStatus,
    pub context: HashMap<String, serde_json::Value>,
    pub workers: Vec<WorkerId>,

    /// Pending join arrivals, keyed by join step
    #[serde(default)]
    pub joins: BTreeMap<String, JoinState>,

    /// Next branch index to allocate
    pub next_branch: u64,

    /// Last error event emitted for this work order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Event>,

    /// Monotonic checkpoint counter
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Checkpointed state of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub work_order_id: WorkOrderId,

    /// Step the worker is positioned at
    pub current_step: String,

    /// Step the worker came from, used to count join arrivals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_step: Option<String>,

    /// Whether the worker already passed the join barrier at `current_step`
    #[serde(default)]
    pub joined: bool,

    /// Forking worker, `None` for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<WorkerId>,

    pub status: WorkerStatus,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing work orders
#[derive(Debug, Clone, Default)]
pub struct WorkOrderFilter {
    pub status: Option<WorkOrderStatus>,
    pub workflow_uri: Option<String>,
}

impl WorkOrderFilter {
    pub fn with_status(status: WorkOrderStatus) -> Self {
        Self {
            status: Some(status),
            workflow_uri: None,
        }
    }

    pub fn matches(&self, record: &WorkOrderRecord) -> bool {
        self.status.map_or(true, |s| s == record.status)
            && self
                .workflow_uri
                .as_deref()
                .map_or(true, |uri| uri == record.workflow_uri)
    }
}

/// Store for work order and worker state
///
/// This trait defines the interface for persisting work order state.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait WorkOrderStore: Send + Sync + 'static {
    /// Persist a newly created work order
    async fn create_work_order(&self, record: WorkOrderRecord) -> Result<(), StoreError>;

    /// Load a work order record
    async fn get_work_order(&self, id: &WorkOrderId) -> Result<WorkOrderRecord, StoreError>;

    /// Checkpoint a work order
    ///
    /// Fails with [`StoreError::StaleRevision`] when a record with the same
    /// or a higher revision is already stored.
    async fn save_work_order(&self, record: WorkOrderRecord) -> Result<(), StoreError>;

    /// Get the stored status of a work order
    async fn get_status(&self, id: &WorkOrderId) -> Result<WorkOrderStatus, StoreError> {
        Ok(self.get_work_order(id).await?.status)
    }

    /// Upsert a worker record
    async fn save_worker(&self, record: WorkerRecord) -> Result<(), StoreError>;

    /// All worker records of a work order, ordered by worker id
    async fn load_workers(&self, id: &WorkOrderId) -> Result<Vec<WorkerRecord>, StoreError>;

    /// List work orders matching a filter
    async fn list_work_orders(
        &self,
        filter: WorkOrderFilter,
    ) -> Result<Vec<WorkOrderRecord>, StoreError>;
}
