//! Workflow and step definitions

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::TransitionTable;
use crate::executable::ExecutableRef;

/// Errors found when validating a workflow before publishing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowValidationError {
    #[error("workflow uri cannot be empty")]
    EmptyUri,

    #[error("workflow {0} must contain at least one step")]
    NoSteps(String),

    #[error("step name cannot be empty")]
    EmptyStepName,

    #[error("step {0} is declared more than once")]
    DuplicateStep(String),

    #[error("start step {0} is not a step of the workflow")]
    UnknownStartStep(String),

    #[error("step {step} routes outcome {outcome} to unknown step {successor}")]
    UnknownSuccessor {
        step: String,
        outcome: String,
        successor: String,
    },

    #[error("join step {join} must declare at least one predecessor")]
    EmptyJoin { join: String },

    #[error("join step {join} waits for unknown step {predecessor}")]
    UnknownJoinPredecessor { join: String, predecessor: String },

    #[error("join step {join} waits for step {predecessor}, which never routes to it")]
    PredecessorDoesNotRouteToJoin { join: String, predecessor: String },

    #[error("step {step} routes to join step {join} but is not one of its predecessors")]
    UndeclaredJoinRoute { join: String, step: String },

    #[error("start step {0} cannot be a join step")]
    JoinAtStart(String),
}

/// Fan-in declaration on a step
///
/// The step body runs only once every listed predecessor step has routed a
/// worker into it. Arrivals are counted per predecessor step name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub predecessors: BTreeSet<String>,
}

impl JoinSpec {
    pub fn of<I, S>(predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            predecessors: predecessors.into_iter().map(Into::into).collect(),
        }
    }
}

/// A named node of a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub executable: ExecutableRef,

    #[serde(default)]
    pub transitions: TransitionTable,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
}

impl Step {
    pub fn new(name: impl Into<String>, executable: impl Into<ExecutableRef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            executable: executable.into(),
            transitions: TransitionTable::new(),
            join: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn on<I, S>(mut self, outcome: impl Into<String>, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions = self.transitions.on(outcome, successors);
        self
    }

    pub fn terminal_on(mut self, outcome: impl Into<String>) -> Self {
        self.transitions = self.transitions.terminal_on(outcome);
        self
    }

    pub fn otherwise<I, S>(mut self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions = self.transitions.otherwise(successors);
        self
    }

    pub fn on_error<I, S>(mut self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions = self.transitions.on_error(successors);
        self
    }

    /// Declare this step a join point waiting for the given predecessors
    pub fn join_of<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join = Some(JoinSpec::of(predecessors));
        self
    }

    pub fn is_join(&self) -> bool {
        self.join.is_some()
    }

    fn successors(&self) -> impl Iterator<Item = &str> {
        self.transitions.edges().map(|(_, s)| s)
    }
}

/// An immutable step graph identified by URI
///
/// Workflows are published once and shared by every work order started
/// from them. Executable references are not checked at publish time; they
/// are resolved when the step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    uri: String,

    #[serde(default)]
    category: String,

    start_step: String,

    steps: Vec<Step>,
}

impl Workflow {
    /// Start building a workflow
    pub fn builder(uri: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            uri: uri.into(),
            category: String::new(),
            start_step: None,
            steps: Vec::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn start_step(&self) -> &str {
        &self.start_step
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check the structural invariants of the graph
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.uri.is_empty() {
            return Err(WorkflowValidationError::EmptyUri);
        }
        if self.steps.is_empty() {
            return Err(WorkflowValidationError::NoSteps(self.uri.clone()));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(WorkflowValidationError::EmptyStepName);
            }
            if !names.insert(step.name.as_str()) {
                return Err(WorkflowValidationError::DuplicateStep(step.name.clone()));
            }
        }

        if !names.contains(self.start_step.as_str()) {
            return Err(WorkflowValidationError::UnknownStartStep(
                self.start_step.clone(),
            ));
        }

        for step in &self.steps {
            for (outcome, successor) in step.transitions.edges() {
                if !names.contains(successor) {
                    return Err(WorkflowValidationError::UnknownSuccessor {
                        step: step.name.clone(),
                        outcome: outcome.unwrap_or("<default>").to_string(),
                        successor: successor.to_string(),
                    });
                }
            }
        }

        if self.step(&self.start_step).is_some_and(Step::is_join) {
            return Err(WorkflowValidationError::JoinAtStart(self.start_step.clone()));
        }

        for step in &self.steps {
            for successor in step.successors() {
                let declared = self
                    .step(successor)
                    .and_then(|s| s.join.as_ref())
                    .map_or(true, |join| join.predecessors.contains(&step.name));
                if !declared {
                    return Err(WorkflowValidationError::UndeclaredJoinRoute {
                        join: successor.to_string(),
                        step: step.name.clone(),
                    });
                }
            }
        }

        for step in &self.steps {
            let Some(join) = &step.join else { continue };
            if join.predecessors.is_empty() {
                return Err(WorkflowValidationError::EmptyJoin {
                    join: step.name.clone(),
                });
            }
            for predecessor in &join.predecessors {
                let pred = self.step(predecessor).ok_or_else(|| {
                    WorkflowValidationError::UnknownJoinPredecessor {
                        join: step.name.clone(),
                        predecessor: predecessor.clone(),
                    }
                })?;
                if !pred.successors().any(|s| s == step.name) {
                    return Err(WorkflowValidationError::PredecessorDoesNotRouteToJoin {
                        join: step.name.clone(),
                        predecessor: predecessor.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// First join step reachable from the given fan-out successors
    ///
    /// Breadth-first, so the nearest join wins. The successors themselves
    /// are included.
    pub fn downstream_join<S: AsRef<str>>(&self, from: &[S]) -> Option<&Step> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&Step> = from
            .iter()
            .filter_map(|name| self.step(name.as_ref()))
            .collect();

        while let Some(step) = queue.pop_front() {
            if !seen.insert(step.name.as_str()) {
                continue;
            }
            if step.is_join() {
                return Some(step);
            }
            queue.extend(step.successors().filter_map(|name| self.step(name)));
        }
        None
    }
}

/// Builder for [`Workflow`]
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    uri: String,
    category: String,
    start_step: Option<String>,
    steps: Vec<Step>,
}

impl WorkflowBuilder {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the start step (defaults to the first step added)
    pub fn start(mut self, step: impl Into<String>) -> Self {
        self.start_step = Some(step.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Build and validate the workflow
    pub fn build(self) -> Result<Workflow, WorkflowValidationError> {
        let start_step = self
            .start_step
            .or_else(|| self.steps.first().map(|s| s.name.clone()))
            .unwrap_or_default();

        let workflow = Workflow {
            uri: self.uri,
            category: self.category,
            start_step,
            steps: self.steps,
        };
        workflow.validate()?;
        Ok(workflow)
    }
}
