//! # Tessera Orchestration Engine
//!
//! Executes outcome-routed step graphs as resumable work orders.
//!
//! ## Features
//!
//! - **Late-bound steps**: step bodies are resolved from an executable registry when they run
//! - **Outcome routing**: each step's outcome selects zero, one or many successor steps
//! - **Fan-out and fan-in**: parallel workers meet again at join steps that run exactly once
//! - **Templated events**: status and progress events rendered from templates and sent to an audit sink
//! - **Checkpointing**: work order and worker state persisted at step boundaries for recovery
//! - **Bounded pool**: workers run on a fixed number of slots with admission backpressure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (workflow catalog, live work orders, cancel/pause/resume)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionPool                           │
//! │  (bounded slots running workers, one path per worker)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────┐ ┌───────────────────┐ ┌─────────────┐
//! │  ExecutableRegistry  │ │   EventEmitter    │ │WorkOrderStore│
//! │  (step bodies)       │ │ (audit sink, subs)│ │(checkpoints) │
//! └──────────────────────┘ └───────────────────┘ └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use tessera_engine::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().build()?;
//! engine.registry().register_fn("native:greet", |ctx| async move {
//!     let name = ctx.get_context_value("name");
//!     ctx.set_context_value("greeting", format!("hello {}", name.unwrap_or_default()));
//!     Ok(Outcome::new("ok"))
//! });
//!
//! engine.publish_workflow(
//!     Workflow::builder("wf://greet")
//!         .step(Step::new("greet", "native:greet").terminal_on("ok"))
//!         .build()?,
//! )?;
//!
//! let context = HashMap::from([("name".to_string(), serde_json::json!("tessera"))]);
//! let id = engine.start_work_order("wf://greet", context).await?;
//! assert_eq!(engine.wait_for_completion(&id, None).await?, WorkOrderStatus::Finished);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod events;
pub mod executable;
pub mod ids;
pub mod persistence;
pub mod pool;
pub mod work_order;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineBuilder, EngineError, WorkOrderReport};
    pub use crate::events::{
        AuditSink, ErrorKind, Event, EventLevel, EventTemplates, EventType, InMemoryAuditSink,
        TracingAuditSink,
    };
    pub use crate::executable::{
        ConstantOutcome, ExecutableRegistry, Invocable, InvocationError, InvocationResult,
        StepContext,
    };
    pub use crate::ids::{IdMinter, SequentialIdMinter, UuidIdMinter, WorkOrderId, WorkerId};
    pub use crate::persistence::{
        InMemoryWorkOrderStore, StoreError, WorkOrderFilter, WorkOrderStore,
    };
    pub use crate::pool::{PoolConfig, PoolError};
    pub use crate::work_order::{WorkOrderStatus, WorkerStatus};
    pub use crate::workflow::{Outcome, Step, Workflow};
}

// Re-export key types at crate root
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineError, WorkOrderReport};
pub use events::{AuditSink, Event, EventLevel, InMemoryAuditSink};
pub use executable::{Invocable, InvocationError, StepContext};
pub use ids::{WorkOrderId, WorkerId};
pub use persistence::{InMemoryWorkOrderStore, WorkOrderStore};
pub use work_order::{WorkOrderStatus, WorkerStatus};
pub use workflow::{Outcome, Step, Workflow};
