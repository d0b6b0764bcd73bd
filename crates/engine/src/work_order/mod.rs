//! Work orders: running instances of a workflow
//!
//! - [`WorkOrderContext`] is the key/value store shared by all workers
//! - [`WorkOrderStatus`] and [`WorkerStatus`] are the two state machines
//! - [`JoinBarriers`] counts predecessor arrivals at join steps

mod context;
mod join;
mod order;
mod status;

pub use context::WorkOrderContext;
pub use join::{JoinArrival, JoinBarriers, JoinState, NO_PREDECESSOR};
pub use order::InvalidTransition;
pub use status::{WorkOrderStatus, WorkerStatus};

pub(crate) use order::WorkOrder;
