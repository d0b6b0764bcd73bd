//! Status and progress event pipeline
//!
//! - [`Event`] is the immutable telemetry record
//! - [`EventTemplates`] renders status text from named templates
//! - [`EventEmitter`] stamps, orders and forwards events
//! - [`AuditSink`] is the collaborator receiving them

mod emitter;
mod event;
mod sink;
mod templates;

pub use emitter::EventEmitter;
pub use event::{ErrorKind, Event, EventLevel, EventType, StepPhase};
pub use sink::{AuditSink, InMemoryAuditSink, SinkError, TracingAuditSink};
pub use templates::{template_names, EventTemplates, TemplateError};

pub(crate) use event::EventDraft;
