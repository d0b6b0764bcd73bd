//! Work order and worker status

use serde::{Deserialize, Serialize};

/// Overall status of a work order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    /// Created but no worker has been scheduled yet
    Created,
    /// At least one worker is scheduled or running
    Running,
    /// Workers park at their next step boundary until resumed
    Paused,
    /// Every worker path ended normally
    Finished,
    /// A worker hit an unroutable outcome or the order could not continue
    Failed,
    /// Cancelled by a caller; honored at step boundaries
    Cancelled,
}

impl WorkOrderStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Whether workers may keep taking steps
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }

    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (*self, next),
            (Created, Running)
                | (Created, Failed)
                | (Created, Cancelled)
                | (Running, Paused)
                | (Running, Finished)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Finished)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Positioned at `current_step`, scheduled or running
    Active,
    /// Forked children and waits for a downstream join to fire
    WaitingJoin,
    /// Path ended normally, or was subsumed by a join
    Done,
    /// Stopped on a fault the workflow could not route
    Error,
    /// Stopped at a step boundary because the order was cancelled or failed
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}
