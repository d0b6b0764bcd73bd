//! End-to-end work order scenarios

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{counting, harness, Gate, WAIT};
use tessera_engine::events::{ErrorKind, EventType, StepPhase};
use tessera_engine::executable::InvocationError;
use tessera_engine::workflow::{Outcome, Step, Workflow};
use tessera_engine::{WorkOrderStatus, WorkerStatus};

fn linear() -> Workflow {
    Workflow::builder("wf://linear")
        .category("test")
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

// ============================================
// Linear path
// ============================================

#[test_log::test(tokio::test)]
async fn test_linear_workflow_finishes_with_four_events() {
    let h = harness();
    let a = counting(&h.engine, "native:a", "ok");
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);

    let events = h.sink.events_for(&id);
    assert_eq!(events.len(), 4);
    let path: Vec<_> = events
        .iter()
        .map(|e| (e.step.as_deref().unwrap(), e.phase.unwrap()))
        .collect();
    assert_eq!(
        path,
        vec![
            ("A", StepPhase::Entered),
            ("A", StepPhase::Exited),
            ("B", StepPhase::Entered),
            ("B", StepPhase::Exited),
        ]
    );
    assert!(events.iter().all(|e| e.event_type == EventType::StatusUpdate));
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.workers[0].status, WorkerStatus::Done);
    assert!(report.workers[0].id.is_root());
    assert!(report.last_error.is_none());
}

// ============================================
// Unroutable outcome
// ============================================

#[test_log::test(tokio::test)]
async fn test_unknown_outcome_fails_work_order() {
    let h = harness();
    counting(&h.engine, "native:a", "weird");
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Failed);
    assert_eq!(b.load(Ordering::SeqCst), 0);

    let errors: Vec<_> = h
        .sink
        .events_for(&id)
        .into_iter()
        .filter(|e| e.is_error())
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_kind, Some(ErrorKind::UnroutableOutcome));
    assert!(errors[0].status_text.contains("'weird'"));

    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(report.status, WorkOrderStatus::Failed);
    assert_eq!(report.workers[0].status, WorkerStatus::Error);
    assert_eq!(
        report.last_error.map(|e| e.sequence),
        Some(errors[0].sequence)
    );
}

#[tokio::test]
async fn test_faulting_body_follows_error_route() {
    let h = harness();
    h.engine.registry().register_fn("native:a", |_ctx| async {
        Err(InvocationError::from(anyhow::anyhow!("connection reset")))
    });
    let recover = counting(&h.engine, "native:recover", "ok");
    h.engine
        .publish_workflow(
            Workflow::builder("wf://faulty")
                .step(Step::new("A", "native:a").on("ok", ["B"]).on_error(["R"]))
                .step(Step::new("B", "native:b").terminal_on("ok"))
                .step(Step::new("R", "native:recover").terminal_on("ok"))
                .build()
                .unwrap(),
        )
        .unwrap();

    let id = h
        .engine
        .start_work_order("wf://faulty", HashMap::new())
        .await
        .unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(recover.load(Ordering::SeqCst), 1);

    let events = h.sink.events_for(&id);
    assert_eq!(events.len(), 4);
    assert_eq!(events[1].error_kind, Some(ErrorKind::InvocationFault));
    assert!(events[1].status_text.contains("connection reset"));

    // the fault was routed, yet it is still the last error seen
    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(
        report.last_error.and_then(|e| e.error_kind),
        Some(ErrorKind::InvocationFault)
    );
}

#[tokio::test]
async fn test_missing_binding_without_error_route_fails() {
    let h = harness();
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Failed);
    let kinds: Vec<_> = h
        .sink
        .events_for(&id)
        .into_iter()
        .filter_map(|e| e.error_kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::UnresolvedExecutable, ErrorKind::UnroutableOutcome]
    );
}

// ============================================
// Fan-out and join
// ============================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_runs_exactly_once() {
    for round in 0..10u64 {
        let h = harness();
        let delay_b = Duration::from_millis((round * 7) % 20);
        let delay_c = Duration::from_millis((round * 13) % 20);

        counting(&h.engine, "native:a", "ok");
        h.engine.registry().register_fn("native:b", move |_ctx| async move {
            tokio::time::sleep(delay_b).await;
            Ok(Outcome::new("ok"))
        });
        h.engine.registry().register_fn("native:c", move |_ctx| async move {
            tokio::time::sleep(delay_c).await;
            Ok(Outcome::new("ok"))
        });
        let d = counting(&h.engine, "native:d", "ok");
        h.engine.publish_workflow(diamond()).unwrap();

        let id = h
            .engine
            .start_work_order("wf://diamond", HashMap::new())
            .await
            .unwrap();
        let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();

        assert_eq!(status, WorkOrderStatus::Finished, "round {}", round);
        assert_eq!(d.load(Ordering::SeqCst), 1, "round {}", round);

        let report = h.engine.status_report(&id).await.unwrap();
        assert_eq!(report.workers.len(), 3);
        assert!(report
            .workers
            .iter()
            .all(|w| w.status == WorkerStatus::Done));

        h.engine.flush_events().await;
        let d_entries = h
            .sink
            .events_for(&id)
            .into_iter()
            .filter(|e| e.step.as_deref() == Some("D") && e.is_step_entry())
            .count();
        assert_eq!(d_entries, 1);
    }
}

// ============================================
// Cancellation
// ============================================

#[test_log::test(tokio::test)]
async fn test_cancel_waits_for_step_boundary() {
    let h = harness();
    let started = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let saw_cancel = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let (started, gate, saw_cancel, finished) = (
            started.clone(),
            gate.clone(),
            saw_cancel.clone(),
            finished.clone(),
        );
        h.engine.registry().register_fn("native:a", move |ctx| {
            let (started, gate, saw_cancel, finished) = (
                started.clone(),
                gate.clone(),
                saw_cancel.clone(),
                finished.clone(),
            );
            async move {
                started.notify_one();
                let _permit = gate.acquire().await;
                saw_cancel.store(ctx.is_cancel_requested(), Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::new("ok"))
            }
        });
    }
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    started.notified().await;

    h.engine.cancel(&id).await.unwrap();
    assert_eq!(
        h.engine.get_status(&id).await.unwrap(),
        WorkOrderStatus::Cancelled
    );
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    gate.add_permits(1);
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    h.engine.flush_events().await;

    assert_eq!(status, WorkOrderStatus::Cancelled);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(saw_cancel.load(Ordering::SeqCst));
    assert_eq!(b.load(Ordering::SeqCst), 0);

    // the visit still closes with its exit event
    let events = h.sink.events_for(&id);
    assert_eq!(events.len(), 2);
    assert!(events[1].is_step_exit());

    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(report.workers[0].current_step, "A");
    assert_eq!(report.workers[0].status, WorkerStatus::Cancelled);
}

#[tokio::test]
async fn test_pause_parks_workers_until_resume() {
    let h = harness();
    let gate = Gate::register(&h.engine, "native:a", "ok");
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    gate.started.notified().await;

    h.engine.pause(&id).await.unwrap();
    gate.release();

    let waited = h
        .engine
        .wait_for_completion(&id, Some(Duration::from_millis(100)))
        .await;
    assert!(waited.is_err());
    assert_eq!(h.engine.get_status(&id).await.unwrap(), WorkOrderStatus::Paused);
    assert_eq!(b.load(Ordering::SeqCst), 0);

    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(report.workers[0].current_step, "B");
    assert_eq!(report.running_workers, 1);

    h.engine.resume(&id).await.unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();
    assert_eq!(status, WorkOrderStatus::Finished);
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_paused_work_order() {
    let h = harness();
    let gate = Gate::register(&h.engine, "native:a", "ok");
    let b = counting(&h.engine, "native:b", "ok");
    h.engine.publish_workflow(linear()).unwrap();

    let id = h
        .engine
        .start_work_order("wf://linear", HashMap::new())
        .await
        .unwrap();
    gate.started.notified().await;
    h.engine.pause(&id).await.unwrap();
    gate.release();
    let _ = h
        .engine
        .wait_for_completion(&id, Some(Duration::from_millis(50)))
        .await;

    h.engine.cancel(&id).await.unwrap();
    let status = h.engine.wait_for_completion(&id, Some(WAIT)).await.unwrap();

    assert_eq!(status, WorkOrderStatus::Cancelled);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    let report = h.engine.status_report(&id).await.unwrap();
    assert_eq!(report.workers[0].status, WorkerStatus::Cancelled);
    assert_eq!(report.running_workers, 0);
}
