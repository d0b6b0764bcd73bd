//! Audit/telemetry sinks
//!
//! A sink receives every event the engine emits, in emission order. Sink
//! durability is the sink's own business; failures are logged by the
//! emitter and never affect execution.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{Event, EventLevel};
use crate::ids::{WorkOrderId, WorkerId};

/// Errors reported by a sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Destination for emitted events
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Name of this sink (for logging)
    fn name(&self) -> &'static str;

    /// Record one event
    async fn record(&self, event: Event) -> Result<(), SinkError>;
}

/// Sink that keeps every event in memory
///
/// # Example
///
/// ```
/// use tessera_engine::events::InMemoryAuditSink;
///
/// let sink = InMemoryAuditSink::new();
/// assert!(sink.events().is_empty());
/// ```
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<Event>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events in delivery order
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn events_for(&self, work_order: &WorkOrderId) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.work_order_uri == work_order)
            .cloned()
            .collect()
    }

    pub fn events_for_worker(&self, worker: &WorkerId) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.worker_uri == worker)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn record(&self, event: Event) -> Result<(), SinkError> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Sink that mirrors events into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn record(&self, event: Event) -> Result<(), SinkError> {
        let work_order = event.work_order_uri.as_str();
        let worker = event.worker_uri.as_str();
        let step = event.step.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Debug => debug!(work_order, worker, step, "{}", event.status_text),
            EventLevel::Info => info!(work_order, worker, step, "{}", event.status_text),
            EventLevel::Warn => warn!(work_order, worker, step, "{}", event.status_text),
            EventLevel::Error => {
                error!(work_order, worker, step, kind = ?event.error_kind, "{}", event.status_text)
            }
        }
        Ok(())
    }
}
