//! Fan-in bookkeeping
//!
//! A join step waits for every declared predecessor to route a worker into
//! it. Arrivals are counted here, under the work order's join lock; the
//! arrival that completes the set is released to run the join body and every
//! other arriving worker terminates. Nothing blocks: a worker that is not the
//! last to arrive simply ends.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::WorkerId;
use crate::workflow::JoinSpec;

/// Arrival key used when a worker enters a join without a previous step
pub const NO_PREDECESSOR: &str = "<start>";

/// Pending arrivals at one join step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinState {
    /// Predecessor steps that have routed a worker into the join
    pub arrived: BTreeSet<String>,

    /// Workers that arrived and terminated without running the join
    pub arrived_workers: Vec<WorkerId>,

    /// Fan-out parents in WAITING_JOIN until this join fires
    pub waiting_parents: BTreeSet<WorkerId>,
}

/// Result of a worker arriving at a join step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinArrival {
    /// Not every predecessor has arrived; the worker terminates
    Waiting { arrived: usize, required: usize },

    /// This arrival completed the set; the worker runs the join body
    Released { waiting_parents: Vec<WorkerId> },
}

/// Join state of one work order, keyed by join step name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinBarriers {
    pending: BTreeMap<String, JoinState>,
}

impl JoinBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(pending: BTreeMap<String, JoinState>) -> Self {
        Self { pending }
    }

    pub fn snapshot(&self) -> BTreeMap<String, JoinState> {
        self.pending.clone()
    }

    /// Record an arrival at `join_step`
    pub fn arrive(
        &mut self,
        join_step: &str,
        spec: &JoinSpec,
        from: Option<&str>,
        worker: &WorkerId,
    ) -> JoinArrival {
        let required = spec.predecessors.len();
        let from = from.unwrap_or(NO_PREDECESSOR);
        if !spec.predecessors.contains(from) {
            // undeclared routes never count toward the join
            let arrived = self.pending.get(join_step).map_or(0, |s| s.arrived.len());
            return JoinArrival::Waiting { arrived, required };
        }

        let state = self.pending.entry(join_step.to_string()).or_default();
        state.arrived.insert(from.to_string());

        if spec.predecessors.is_subset(&state.arrived) {
            let released = self.pending.remove(join_step).unwrap_or_default();
            return JoinArrival::Released {
                waiting_parents: released.waiting_parents.into_iter().collect(),
            };
        }

        state.arrived_workers.push(worker.clone());
        JoinArrival::Waiting {
            arrived: state.arrived.len(),
            required,
        }
    }

    /// Park a fan-out parent until `join_step` fires
    pub fn wait_on(&mut self, join_step: &str, parent: &WorkerId) {
        self.pending
            .entry(join_step.to_string())
            .or_default()
            .waiting_parents
            .insert(parent.clone());
    }

    /// Joins that some, but not all, predecessors have reached
    pub fn stalled(&self) -> impl Iterator<Item = (&str, &JoinState)> {
        self.pending
            .iter()
            .filter(|(_, s)| !s.arrived.is_empty())
            .map(|(name, s)| (name.as_str(), s))
    }

    /// Remove every join entry, returning all parents still waiting
    pub fn drain_waiting_parents(&mut self) -> Vec<WorkerId> {
        std::mem::take(&mut self.pending)
            .into_values()
            .flat_map(|s| s.waiting_parents)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
