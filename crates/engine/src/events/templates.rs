//! Named templates for event status text

use std::collections::BTreeSet;

use minijinja::Environment;
use tracing::warn;

/// Names of the built-in templates
pub mod template_names {
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_FINISHED: &str = "step_finished";
    pub const STEP_FAULTED: &str = "step_faulted";
    pub const UNRESOLVED_EXECUTABLE: &str = "unresolved_executable";
    pub const UNROUTABLE_OUTCOME: &str = "unroutable_outcome";
    pub const PROGRESS: &str = "progress";
    pub const JOIN_STALLED: &str = "join_stalled";
    pub const SUBMISSION_REJECTED: &str = "submission_rejected";
    pub const CHECKPOINT_FAILED: &str = "checkpoint_failed";
}

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (template_names::STEP_STARTED, "Step '{{ step }}' started"),
    (
        template_names::STEP_FINISHED,
        "Step '{{ step }}' finished with outcome '{{ outcome }}' in {{ elapsed_ms }}ms",
    ),
    (
        template_names::STEP_FAULTED,
        "Step '{{ step }}' faulted after {{ elapsed_ms }}ms: {{ error }}",
    ),
    (
        template_names::UNRESOLVED_EXECUTABLE,
        "Step '{{ step }}' has no binding for executable {{ executable }}",
    ),
    (
        template_names::UNROUTABLE_OUTCOME,
        "Step '{{ step }}' reported outcome '{{ outcome }}' with no matching transition",
    ),
    (
        template_names::PROGRESS,
        "{{ message }} ({{ current }}/{{ total }})",
    ),
    (
        template_names::JOIN_STALLED,
        "Join step '{{ step }}' stalled with {{ arrived }} of {{ required }} predecessors arrived",
    ),
    (
        template_names::SUBMISSION_REJECTED,
        "Branch '{{ step }}' could not be scheduled: {{ error }}",
    ),
    (
        template_names::CHECKPOINT_FAILED,
        "Checkpoint of work order {{ work_order }} failed: {{ error }}",
    ),
];

/// Errors from template registration and rendering
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown event template: {0}")]
    UnknownTemplate(String),

    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Registry of event text templates
///
/// Built-in templates cover every event the engine emits; hosts may override
/// any of them (for localisation, or to add fields) before the engine starts.
/// Templates are parsed once, when registered.
pub struct EventTemplates {
    env: Environment<'static>,
    names: BTreeSet<String>,
}

impl Default for EventTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTemplates {
    /// Templates with the built-in set registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        let mut names = BTreeSet::new();
        for &(name, source) in BUILTIN_TEMPLATES {
            match env.add_template(name, source) {
                Ok(()) => {
                    names.insert(name.to_string());
                }
                Err(err) => warn!(template = name, error = %err, "Built-in template failed to parse"),
            }
        }
        Self { env, names }
    }

    /// Register or replace a template, rejecting sources that do not parse
    pub fn set_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        self.env.add_template_owned(name.clone(), source.into())?;
        self.names.insert(name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Render a registered template with the given substitution values
    pub fn render(&self, name: &str, values: minijinja::Value) -> Result<String, TemplateError> {
        let template = self.env.get_template(name).map_err(|err| match err.kind() {
            minijinja::ErrorKind::TemplateNotFound => {
                TemplateError::UnknownTemplate(name.to_string())
            }
            _ => TemplateError::Render(err),
        })?;
        Ok(template.render(values)?)
    }
}

impl std::fmt::Debug for EventTemplates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTemplates")
            .field("templates", &self.names)
            .finish()
    }
}
