//! Executable registry for late-bound step bodies
//!
//! Steps name their body by an [`ExecutableRef`], an opaque URI such as
//! `native:etl.load` or `script:rules/eligibility.js`. The registry maps
//! references to [`Invocable`] instances; bindings can be added, replaced or
//! removed while work orders run, and are resolved at the moment a step runs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{FnInvocable, Invocable, InvocationResult, StepContext};

/// Opaque reference to a step body: `<scheme>:<qualified name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutableRef(String);

impl ExecutableRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Scheme part, if the reference has one
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once(':').map(|(scheme, _)| scheme)
    }

    /// Qualified name part (the whole reference when there is no scheme)
    pub fn name(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, name)| name)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutableRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutableRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No binding exists for the reference
    #[error("no executable bound to {0}")]
    UnresolvedExecutable(ExecutableRef),
}

/// Registry of step bodies keyed by executable reference
///
/// Resolution only reads the registry, so resolving the same reference
/// repeatedly returns the same instance and has no side effects.
#[derive(Default)]
pub struct ExecutableRegistry {
    bindings: RwLock<HashMap<ExecutableRef, Arc<dyn Invocable>>>,
}

impl ExecutableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a reference to a step body, returning any binding it replaced
    pub fn register(
        &self,
        reference: impl Into<ExecutableRef>,
        invocable: impl Invocable,
    ) -> Option<Arc<dyn Invocable>> {
        self.register_arc(reference, Arc::new(invocable))
    }

    /// Bind a reference to a shared step body
    pub fn register_arc(
        &self,
        reference: impl Into<ExecutableRef>,
        invocable: Arc<dyn Invocable>,
    ) -> Option<Arc<dyn Invocable>> {
        self.bindings.write().insert(reference.into(), invocable)
    }

    /// Bind a reference to an async closure
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_engine::executable::ExecutableRegistry;
    ///
    /// let registry = ExecutableRegistry::new();
    /// registry.register_fn("native:always.ok", |_ctx| async { Ok("ok".into()) });
    /// assert!(registry.contains(&"native:always.ok".into()));
    /// ```
    pub fn register_fn<F, Fut>(
        &self,
        reference: impl Into<ExecutableRef>,
        f: F,
    ) -> Option<Arc<dyn Invocable>>
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InvocationResult> + Send + 'static,
    {
        self.register(reference, FnInvocable::new(f))
    }

    /// Remove a binding
    pub fn unregister(&self, reference: &ExecutableRef) -> Option<Arc<dyn Invocable>> {
        self.bindings.write().remove(reference)
    }

    pub fn contains(&self, reference: &ExecutableRef) -> bool {
        self.bindings.read().contains_key(reference)
    }

    /// Resolve a reference to its step body
    pub fn resolve(&self, reference: &ExecutableRef) -> Result<Arc<dyn Invocable>, RegistryError> {
        self.bindings
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| RegistryError::UnresolvedExecutable(reference.clone()))
    }

    /// All bound references, sorted
    pub fn references(&self) -> Vec<ExecutableRef> {
        let mut refs: Vec<_> = self.bindings.read().keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

impl fmt::Debug for ExecutableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableRegistry")
            .field("references", &self.references())
            .finish()
    }
}
