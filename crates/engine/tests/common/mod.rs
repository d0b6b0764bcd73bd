//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tessera_engine::events::InMemoryAuditSink;
use tessera_engine::ids::SequentialIdMinter;
use tessera_engine::persistence::InMemoryWorkOrderStore;
use tessera_engine::workflow::Outcome;
use tessera_engine::{Engine, EngineConfig, WorkOrderId, WorkOrderStatus};
use tokio::sync::{Notify, Semaphore};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub engine: Engine,
    pub sink: Arc<InMemoryAuditSink>,
    pub store: Arc<InMemoryWorkOrderStore>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), Arc::new(InMemoryWorkOrderStore::new()))
}

pub fn harness_with(config: EngineConfig, store: Arc<InMemoryWorkOrderStore>) -> Harness {
    let sink = Arc::new(InMemoryAuditSink::new());
    let engine = Engine::builder()
        .with_config(config)
        .with_store(store.clone())
        .with_sink(sink.clone())
        .with_minter(Arc::new(SequentialIdMinter::new("wo")))
        .build()
        .expect("engine builds");
    Harness {
        engine,
        sink,
        store,
    }
}

/// Register a body that counts its runs and always reports `outcome`
pub fn counting(engine: &Engine, reference: &str, outcome: &'static str) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    engine.registry().register_fn(reference, move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::new(outcome))
        }
    });
    runs
}

/// A body that signals when it starts and blocks until the gate opens
pub struct Gate {
    pub started: Arc<Notify>,
    pub open: Arc<Semaphore>,
    pub finished: Arc<AtomicUsize>,
}

impl Gate {
    pub fn register(engine: &Engine, reference: &str, outcome: &'static str) -> Self {
        let gate = Self {
            started: Arc::new(Notify::new()),
            open: Arc::new(Semaphore::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        };
        let (started, open, finished) = (
            gate.started.clone(),
            gate.open.clone(),
            gate.finished.clone(),
        );
        engine.registry().register_fn(reference, move |_ctx| {
            let (started, open, finished) = (started.clone(), open.clone(), finished.clone());
            async move {
                started.notify_one();
                let _permit = open.acquire().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::new(outcome))
            }
        });
        gate
    }

    pub fn release(&self) {
        self.open.add_permits(1024);
    }
}

/// Poll until the work order reaches `status`
pub async fn wait_for_status(engine: &Engine, id: &WorkOrderId, status: WorkOrderStatus) {
    tokio::time::timeout(WAIT, async {
        while engine.get_status(id).await.ok() != Some(status) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("work order reached status in time");
}
