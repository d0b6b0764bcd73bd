//! Shared key/value context of a work order

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Key/value store shared by every worker of a work order
///
/// Cloning yields another handle to the same map, so a child worker created
/// at a fan-out sees writes made before and after it was spawned. Concurrent
/// writes to one key are last-writer-wins; there is no cross-key transaction.
#[derive(Clone, Default)]
pub struct WorkOrderContext {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl WorkOrderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Write a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.write().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Point-in-time copy, used for checkpoints
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().clone()
    }

    /// Whether two handles share the same underlying map
    pub fn same_as(&self, other: &WorkOrderContext) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl fmt::Debug for WorkOrderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkOrderContext")
            .field("keys", &self.values.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
