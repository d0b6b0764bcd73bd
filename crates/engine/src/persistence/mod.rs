//! Persistence capability for work order state
//!
//! This module provides:
//! - [`WorkOrderStore`] trait for work order and worker checkpoints
//! - [`InMemoryWorkOrderStore`] for tests and embedding

mod memory;
mod store;

pub use memory::InMemoryWorkOrderStore;
pub use store::{StoreError, WorkOrderFilter, WorkOrderRecord, WorkOrderStore, WorkerRecord};
