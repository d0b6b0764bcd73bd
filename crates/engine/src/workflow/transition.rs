//! Outcome-driven transition tables
//!
//! Each step carries a [`TransitionTable`] mapping the outcome reported by
//! its body to zero, one or many successor steps. Resolution is a pure
//! lookup: exact route first, then the default route, then the reserved
//! [`ERROR_OUTCOME`] route.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved outcome synthesized when a step body faults or cannot be resolved
pub const ERROR_OUTCOME: &str = "ERROR";

/// Opaque string reported by a step body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(String);

impl Outcome {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self(outcome.into())
    }

    /// The reserved `ERROR` outcome
    pub fn error() -> Self {
        Self(ERROR_OUTCOME.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.0 == ERROR_OUTCOME
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Outcome {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Outcome {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a worker does after a step, given the resolved successors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// No successors: the worker's path ends
    Terminate,

    /// Exactly one successor: continue linearly
    Continue(&'a str),

    /// Several successors: spawn one child worker per successor
    FanOut(&'a [String]),
}

/// Which entry of the table matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch {
    Exact,
    Default,
    ErrorRoute,
}

/// A resolved route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub matched: RouteMatch,
    pub successors: &'a [String],
}

impl<'a> Route<'a> {
    pub fn resolution(&self) -> Resolution<'a> {
        match self.successors {
            [] => Resolution::Terminate,
            [single] => Resolution::Continue(single.as_str()),
            many => Resolution::FanOut(many),
        }
    }
}

/// The outcome has no route and the table has no fallback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("outcome {outcome:?} has no transition and no default or error route")]
pub struct UnroutableOutcome {
    pub outcome: String,
}

/// Per-step mapping from outcome to successor step names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTable {
    #[serde(default)]
    routes: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Vec<String>>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `outcome` to the given successors
    ///
    /// An empty successor list marks the outcome as terminal.
    pub fn on<I, S>(mut self, outcome: impl Into<String>, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.insert(
            outcome.into(),
            successors.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Mark `outcome` as ending the worker's path
    pub fn terminal_on(self, outcome: impl Into<String>) -> Self {
        self.on(outcome, Vec::<String>::new())
    }

    /// Route any otherwise unmatched outcome
    pub fn otherwise<I, S>(mut self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default = Some(successors.into_iter().map(Into::into).collect());
        self
    }

    /// Route the reserved `ERROR` outcome
    pub fn on_error<I, S>(self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on(ERROR_OUTCOME, successors)
    }

    /// Resolve an outcome to its successors
    pub fn resolve(&self, outcome: &Outcome) -> Result<Route<'_>, UnroutableOutcome> {
        if let Some(successors) = self.routes.get(outcome.as_str()) {
            return Ok(Route {
                matched: RouteMatch::Exact,
                successors,
            });
        }
        if let Some(successors) = &self.default {
            return Ok(Route {
                matched: RouteMatch::Default,
                successors,
            });
        }
        if let Some(successors) = self.routes.get(ERROR_OUTCOME) {
            return Ok(Route {
                matched: RouteMatch::ErrorRoute,
                successors,
            });
        }
        Err(UnroutableOutcome {
            outcome: outcome.as_str().to_string(),
        })
    }

    /// Outcomes with an explicit route
    pub fn outcomes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|s| s.as_str())
    }

    /// Every (outcome, successor) pair, the default route reported as `None`
    pub fn edges(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        let routed = self
            .routes
            .iter()
            .flat_map(|(o, s)| s.iter().map(move |succ| (Some(o.as_str()), succ.as_str())));
        let defaulted = self
            .default
            .iter()
            .flat_map(|s| s.iter().map(|succ| (None, succ.as_str())));
        routed.chain(defaulted)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.default.is_none()
    }
}
