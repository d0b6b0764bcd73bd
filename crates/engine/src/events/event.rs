//! Status and progress events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{WorkOrderId, WorkerId};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    StatusUpdate,
    Progress,
}

/// Which side of a step visit a status update marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Entered,
    Exited,
}

/// Classification of error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The step's executable reference had no binding
    UnresolvedExecutable,

    /// The step body returned an error or panicked
    InvocationFault,

    /// The outcome matched no route, default or error route
    UnroutableOutcome,

    /// Every worker finished while a join still had partial arrivals
    JoinStalled,

    /// The execution pool refused a branch worker
    SubmissionRejected,

    /// The persistence capability failed while checkpointing
    Persistence,
}

/// An immutable telemetry record
///
/// Events are derived from execution; the work order and worker records are
/// authoritative. `sequence` is assigned by the emitter and increases in
/// emission order, so per-worker order can be recovered by sorting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub sequence: u64,
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub work_order_uri: WorkOrderId,
    pub worker_uri: WorkerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<StepPhase>,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn is_error(&self) -> bool {
        self.level == EventLevel::Error
    }

    pub fn is_step_entry(&self) -> bool {
        self.phase == Some(StepPhase::Entered)
    }

    pub fn is_step_exit(&self) -> bool {
        self.phase == Some(StepPhase::Exited)
    }
}

/// Event fields before the emitter renders text and stamps sequence/time
#[derive(Debug, Clone)]
pub(crate) struct EventDraft {
    pub level: EventLevel,
    pub event_type: EventType,
    pub work_order: WorkOrderId,
    pub worker: WorkerId,
    pub step: Option<String>,
    pub phase: Option<StepPhase>,
    pub progress: Option<(u64, u64)>,
    pub error_kind: Option<ErrorKind>,
    pub details: Option<serde_json::Value>,
}

impl EventDraft {
    pub fn status(work_order: &WorkOrderId, worker: &WorkerId, level: EventLevel) -> Self {
        Self {
            level,
            event_type: EventType::StatusUpdate,
            work_order: work_order.clone(),
            worker: worker.clone(),
            step: None,
            phase: None,
            progress: None,
            error_kind: None,
            details: None,
        }
    }

    pub fn progress(work_order: &WorkOrderId, worker: &WorkerId, current: u64, total: u64) -> Self {
        Self {
            event_type: EventType::Progress,
            progress: Some((current, total)),
            ..Self::status(work_order, worker, EventLevel::Info)
        }
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn phase(mut self, phase: StepPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn error(mut self, kind: ErrorKind) -> Self {
        self.level = EventLevel::Error;
        self.error_kind = Some(kind);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
