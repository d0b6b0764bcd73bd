//! Work order and worker identifiers
//!
//! Work order ids are minted by an [`IdMinter`] supplied by the host. Worker
//! ids are derived from the work order id and a per-work-order branch index,
//! rendered as `<workOrderId>#<branchIndex>`, so a worker id alone is enough
//! to correlate audit records back to the owning work order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between the work order id and the branch index in a worker id
pub const BRANCH_SEPARATOR: char = '#';

/// Identifier of a work order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(String);

impl WorkOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a worker: `<workOrderId>#<branchIndex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Build the id of branch `branch` of `work_order`
    pub fn new(work_order: &WorkOrderId, branch: u64) -> Self {
        Self(format!("{}{}{}", work_order, BRANCH_SEPARATOR, branch))
    }

    /// Id of the root worker of a work order (branch 0)
    pub fn root(work_order: &WorkOrderId) -> Self {
        Self::new(work_order, 0)
    }

    /// Parse a rendered worker id
    ///
    /// Work order ids may themselves contain `#`, so the split happens on
    /// the last separator.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let (order, branch) = s
            .rsplit_once(BRANCH_SEPARATOR)
            .ok_or_else(|| IdError::MissingBranch(s.to_string()))?;
        if order.is_empty() {
            return Err(IdError::EmptyWorkOrder(s.to_string()));
        }
        branch
            .parse::<u64>()
            .map_err(|_| IdError::InvalidBranch(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    /// The owning work order id
    pub fn work_order_id(&self) -> WorkOrderId {
        match self.0.rsplit_once(BRANCH_SEPARATOR) {
            Some((order, _)) => WorkOrderId::new(order),
            None => WorkOrderId::new(self.0.clone()),
        }
    }

    /// The branch index within the work order
    pub fn branch_index(&self) -> u64 {
        self.0
            .rsplit_once(BRANCH_SEPARATOR)
            .and_then(|(_, b)| b.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_root(&self) -> bool {
        self.branch_index() == 0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from parsing identifiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("worker id {0:?} has no branch separator")]
    MissingBranch(String),

    #[error("worker id {0:?} has an empty work order part")]
    EmptyWorkOrder(String),

    #[error("worker id {0:?} has a non-numeric branch index")]
    InvalidBranch(String),
}

/// Capability for minting work order identifiers
pub trait IdMinter: Send + Sync + 'static {
    fn mint_work_order_id(&self) -> WorkOrderId;
}

/// Mints time-ordered UUID v7 ids
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdMinter;

impl IdMinter for UuidIdMinter {
    fn mint_work_order_id(&self) -> WorkOrderId {
        WorkOrderId(Uuid::now_v7().to_string())
    }
}

/// Mints `<prefix>-<counter>` ids from a monotonic counter
///
/// The counter is zero-padded to 10 digits so ids sort lexicographically in
/// minting order.
#[derive(Debug)]
pub struct SequentialIdMinter {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdMinter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::starting_at(prefix, 1)
    }

    pub fn starting_at(prefix: impl Into<String>, first: u64) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(first),
        }
    }
}

impl IdMinter for SequentialIdMinter {
    fn mint_work_order_id(&self) -> WorkOrderId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        WorkOrderId(format!("{}-{:010}", self.prefix, n))
    }
}
