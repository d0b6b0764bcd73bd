//! Rebuilding work orders from checkpoints

mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{counting, harness, harness_with, Gate, WAIT};
use tessera_engine::persistence::{InMemoryWorkOrderStore, WorkOrderRecord, WorkerRecord};
use tessera_engine::work_order::JoinState;
use tessera_engine::workflow::{Step, Workflow};
use tessera_engine::{
    EngineConfig, EngineError, WorkOrderId, WorkOrderStatus, WorkOrderStore, WorkerId,
    WorkerStatus,
};

fn linear() -> Workflow {
    Workflow::builder("wf://linear")
        .step(Step::new("A", "native:a").on("ok", ["B"]))
        .step(Step::new("B", "native:b").terminal_on("ok"))
        .build()
        .unwrap()
}

fn diamond() -> Workflow {
    Workflow::builder("wf://diamond")
        .step(Step::new("A", "native:a").on("ok", ["B", "C"]))
        .step(Step::new("B", "native:b").on("ok", ["D"]))
        .step(Step::new("C", "native:c").on("ok", ["D"]))
        .step(Step::new("D", "native:d").join_of(["B", "C"]).terminal_on("ok"))
        .build()
        .unwrap()
}

fn order_record(id: &WorkOrderId, workflow_uri: &str, status: WorkOrderStatus) -> WorkOrderRecord {
    WorkOrderRecord {
        id: id.clone(),
        workflow_uri: workflow_uri.into(),
        status,
        context: HashMap::new(),
        workers: vec![],
        joins: BTreeMap::new(),
        next_branch: 1,
        last_error: None,
        revision: 3,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn worker_record(
    id: &WorkOrderId,
    branch: u64,
    step: &str,
    previous: Option<&str>,
    status: WorkerStatus,
) -> WorkerRecord {
    WorkerRecord {
        id: WorkerId::new(id, branch),
        work_order_id: id.clone(),
        current_step: step.into(),
        previous_step: previous.map(str::to_string),
        joined: false,
        parent: (branch > 0).then(|| WorkerId::root(id)),
        status,
        updated_at: Utc::now(),
    }
}

#[test_log::test(tokio::test)]
async fn test_recover_resumes_worker_at_checkpointed_step() {
    let h = harness();
    let a = counting(&h.engine, "native:a", "ok");
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = WorkOrderId::new("crashed-1");
    h.store
        .create_work_order(order_record(&id, "wf://linear", WorkOrderStatus::Running))
        .await
        .unwrap();
    h.store
        .save_worker(worker_record(&id, 0, "B", Some("A"), WorkerStatus::Active))
        .await
        .unwrap();

    h.engine.recover_work_order(&id).await.unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);

    let steps: Vec<_> = h
        .sink
        .events_for(&id)
        .into_iter()
        .filter_map(|e| e.step)
        .collect();
    assert_eq!(steps, vec!["B", "B"]);

    let stored = h.store.get_work_order(&id).await.unwrap();
    assert_eq!(stored.status, WorkOrderStatus::Finished);
    assert!(stored.revision > 3);
}

#[tokio::test]
async fn test_recover_completes_pending_join() {
    let h = harness();
    let b = counting(&h.engine, "native:b", "ok");
    let c = counting(&h.engine, "native:c", "ok");
    let d = counting(&h.engine, "native:d", "ok");
    h.engine.publish_workflow(diamond()).unwrap();

    let id = WorkOrderId::new("crashed-2");
    let mut record = order_record(&id, "wf://diamond", WorkOrderStatus::Running);
    record.next_branch = 3;
    record.joins.insert(
        "D".into(),
        JoinState {
            arrived: BTreeSet::from(["B".to_string()]),
            arrived_workers: vec![WorkerId::new(&id, 1)],
            waiting_parents: BTreeSet::from([WorkerId::root(&id)]),
        },
    );
    h.store.create_work_order(record).await.unwrap();
    for worker in [
        worker_record(&id, 0, "A", None, WorkerStatus::WaitingJoin),
        worker_record(&id, 1, "D", Some("B"), WorkerStatus::Done),
        worker_record(&id, 2, "C", Some("A"), WorkerStatus::Active),
    ] {
        h.store.save_worker(worker).await.unwrap();
    }

    h.engine.recover_work_order(&id).await.unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();

    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    assert_eq!(c.load(Ordering::SeqCst), 1);
    assert_eq!(d.load(Ordering::SeqCst), 1);

    let report = h.engine.status_report(&id).await.unwrap();
    assert!(report
        .workers
        .iter()
        .all(|w| w.status == WorkerStatus::Done));
    let runner = report
        .workers
        .iter()
        .find(|w| w.id == WorkerId::new(&id, 2))
        .unwrap();
    assert_eq!(runner.current_step, "D");
}

#[tokio::test]
async fn test_recover_terminal_order_runs_nothing() {
    let h = harness();
    let a = counting(&h.engine, "native:a", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = WorkOrderId::new("done-1");
    h.store
        .create_work_order(order_record(&id, "wf://linear", WorkOrderStatus::Cancelled))
        .await
        .unwrap();

    let status = h.engine.recover_work_order(&id).await.unwrap();
    assert_eq!(status, WorkOrderStatus::Cancelled);
    assert_eq!(
        h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap(),
        WorkOrderStatus::Cancelled
    );
    assert_eq!(a.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_recover_requires_published_workflow() {
    let h = harness();
    let id = WorkOrderId::new("orphan-1");
    h.store
        .create_work_order(order_record(&id, "wf://gone", WorkOrderStatus::Running))
        .await
        .unwrap();

    let result = h.engine.recover_work_order(&id).await;
    assert!(matches!(result, Err(EngineError::WorkflowNotFound(uri)) if uri == "wf://gone"));

    let missing = h.engine.recover_work_order(&"nope".into()).await;
    assert!(matches!(missing, Err(EngineError::WorkOrderNotFound(_))));
}

#[tokio::test]
async fn test_recover_live_order_is_rejected() {
    let h = harness();
    let gate = Gate::register(&h.engine, "native:a", "ok");
    counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    gate.started.notified().await;

    let result = h.engine.recover_work_order(&id).await;
    assert!(matches!(result, Err(EngineError::AlreadyLive(_))));

    gate.release();
    h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
}

#[tokio::test]
async fn test_paused_order_moves_to_another_engine() {
    let store = Arc::new(InMemoryWorkOrderStore::new());
    let first = harness_with(EngineConfig::default(), store.clone());
    let gate = Gate::register(&first.engine, "native:a", "ok");
    first.engine.publish_workflow(linear()).unwrap();

    let id = first
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    gate.started.notified().await;
    first.engine.pause(&id).await.unwrap();
    gate.release();

    // wait for the worker to checkpoint its move to B
    tokio::time::timeout(WAIT, async {
        loop {
            let workers = store.load_workers(&id).await.unwrap();
            if workers.iter().any(|w| w.current_step == "B") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let second = harness_with(EngineConfig::default(), store.clone());
    let a = counting(&second.engine, "native:a", "ok");
    let b = counting(&second.engine, "native:b", "ok");
    second.engine.publish_workflow(linear()).unwrap();

    let status = second.engine.recover_work_order(&id).await.unwrap();
    assert_eq!(status, WorkOrderStatus::Paused);

    second.engine.resume(&id).await.unwrap();
    let status = second
        .engine
        .wait_for_completion(&id, Some(WAIT))
        .await
        .unwrap();

    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.get_status(&id).await.unwrap(),
        WorkOrderStatus::Finished
    );
}
