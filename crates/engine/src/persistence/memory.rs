//! In-memory implementation of WorkOrderStore for testing

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::*;
use crate::ids::{WorkOrderId, WorkerId};

/// In-memory implementation of WorkOrderStore
///
/// Stores every checkpoint in process memory with the same revision
/// semantics a durable backend must provide.
///
/// # Example
///
/// ```
/// use tessera_engine::persistence::InMemoryWorkOrderStore;
///
/// let store = InMemoryWorkOrderStore::new();
/// assert_eq!(store.work_order_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryWorkOrderStore {
    work_orders: RwLock<HashMap<WorkOrderId, WorkOrderRecord>>,
    workers: RwLock<HashMap<WorkOrderId, BTreeMap<WorkerId, WorkerRecord>>>,
}

impl InMemoryWorkOrderStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of work orders
    pub fn work_order_count(&self) -> usize {
        self.work_orders.read().len()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.work_orders.write().clear();
        self.workers.write().clear();
    }
}

#[async_trait]
impl WorkOrderStore for InMemoryWorkOrderStore {
    async fn create_work_order(&self, record: WorkOrderRecord) -> Result<(), StoreError> {
        let mut work_orders = self.work_orders.write();
        if work_orders.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        work_orders.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_work_order(&self, id: &WorkOrderId) -> Result<WorkOrderRecord, StoreError> {
        self.work_orders
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::WorkOrderNotFound(id.clone()))
    }

    async fn save_work_order(&self, record: WorkOrderRecord) -> Result<(), StoreError> {
        let mut work_orders = self.work_orders.write();
        let stored = work_orders
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::WorkOrderNotFound(record.id.clone()))?;

        if record.revision <= stored.revision {
            return Err(StoreError::StaleRevision {
                stored: stored.revision,
                attempted: record.revision,
            });
        }
        *stored = record;
        Ok(())
    }

    async fn save_worker(&self, record: WorkerRecord) -> Result<(), StoreError> {
        if !self.work_orders.read().contains_key(&record.work_order_id) {
            return Err(StoreError::WorkOrderNotFound(record.work_order_id));
        }
        self.workers
            .write()
            .entry(record.work_order_id.clone())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn load_workers(&self, id: &WorkOrderId) -> Result<Vec<WorkerRecord>, StoreError> {
        if !self.work_orders.read().contains_key(id) {
            return Err(StoreError::WorkOrderNotFound(id.clone()));
        }
        Ok(self
            .workers
            .read()
            .get(id)
            .map(|workers| workers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_work_orders(
        &self,
        filter: WorkOrderFilter,
    ) -> Result<Vec<WorkOrderRecord>, StoreError> {
        let mut records: Vec<_> = self
            .work_orders
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_order::{WorkOrderStatus, WorkerStatus};
    use chrono::Utc;

    fn record(id: &str, revision: u64) -> WorkOrderRecord {
        WorkOrderRecord {
            id: WorkOrderId::new(id),
            workflow_uri: "wf://test".into(),
            status: WorkOrderStatus::Created,
            context: HashMap::new(),
            workers: vec![],
            joins: BTreeMap::new(),
            next_branch: 0,
            last_error: None,
            revision,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn worker(order: &WorkOrderId, branch: u64, step: &str) -> WorkerRecord {
        WorkerRecord {
            id: WorkerId::new(order, branch),
            work_order_id: order.clone(),
            current_step: step.into(),
            previous_step: None,
            joined: false,
            parent: None,
            status: WorkerStatus::Active,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_work_order() {
        let store = InMemoryWorkOrderStore::new();
        store.create_work_order(record("wo-1", 0)).await.unwrap();

        let loaded = store.get_work_order(&"wo-1".into()).await.unwrap();
        assert_eq!(loaded.workflow_uri, "wf://test");
        assert_eq!(
            store.get_status(&"wo-1".into()).await.unwrap(),
            WorkOrderStatus::Created
        );
        assert_eq!(store.work_order_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryWorkOrderStore::new();
        store.create_work_order(record("wo-1", 0)).await.unwrap();
        let result = store.create_work_order(record("wo-1", 0)).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_stale_revision_rejected() {
        let store = InMemoryWorkOrderStore::new();
        store.create_work_order(record("wo-1", 0)).await.unwrap();

        let mut newer = record("wo-1", 5);
        newer.status = WorkOrderStatus::Running;
        store.save_work_order(newer).await.unwrap();

        let result = store.save_work_order(record("wo-1", 3)).await;
        match result {
            Err(e @ StoreError::StaleRevision { .. }) => assert!(e.is_stale()),
            other => panic!("expected stale revision, got {:?}", other),
        }

        let stored = store.get_work_order(&"wo-1".into()).await.unwrap();
        assert_eq!(stored.revision, 5);
        assert_eq!(stored.status, WorkOrderStatus::Running);
    }

    #[tokio::test]
    async fn test_save_unknown_work_order() {
        let store = InMemoryWorkOrderStore::new();
        let result = store.save_work_order(record("ghost", 1)).await;
        assert!(matches!(result, Err(StoreError::WorkOrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_workers_upsert_and_load() {
        let store = InMemoryWorkOrderStore::new();
        let id = WorkOrderId::new("wo-1");
        store.create_work_order(record("wo-1", 0)).await.unwrap();

        store.save_worker(worker(&id, 1, "B")).await.unwrap();
        store.save_worker(worker(&id, 0, "A")).await.unwrap();

        let mut moved = worker(&id, 0, "C");
        moved.previous_step = Some("A".into());
        store.save_worker(moved).await.unwrap();

        let workers = store.load_workers(&id).await.unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].id.as_str(), "wo-1#0");
        assert_eq!(workers[0].current_step, "C");
        assert_eq!(workers[1].current_step, "B");
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = InMemoryWorkOrderStore::new();
        store.create_work_order(record("wo-1", 0)).await.unwrap();
        let mut failed = record("wo-2", 0);
        failed.status = WorkOrderStatus::Failed;
        store.create_work_order(failed).await.unwrap();

        let all = store
            .list_work_orders(WorkOrderFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let failed = store
            .list_work_orders(WorkOrderFilter::with_status(WorkOrderStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id.as_str(), "wo-2");

        store.clear();
        assert_eq!(store.work_order_count(), 0);
    }
}
