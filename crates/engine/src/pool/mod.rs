//! Execution pool
//!
//! This module provides:
//! - [`ExecutionPool`], a bounded dispatcher for worker tasks
//! - [`AdmissionControl`], watermark-based admission of new work orders

mod backpressure;
mod dispatch;

pub use backpressure::{AdmissionControl, AdmissionRefusal, BackpressureConfig, BackpressureError};
pub use dispatch::{ExecutionPool, PoolConfig, PoolError, PoolStatus};
