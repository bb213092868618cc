//! Reconciler integration tests.
//!
//! Runs full passes against in-memory state, with widgets placed both in the
//! control plane and on host workers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Widget, desired, harness};
use pgfleet_log::{MemoryTaskSink, Task, TaskLogger, TaskType};
use pgfleet_resource::{
    Error, EventReason, EventType, Identifier, ReconcileOptions, ResourceData, State,
};
use tokio::sync::watch;
use tokio_test::assert_ok;

fn chain() -> Vec<Widget> {
    // a depends on b, b depends on c.
    vec![
        Widget::new("a", &["b"]),
        Widget::new("b", &["c"]),
        Widget::new("c", &[]),
    ]
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_chain_creates_then_deletes_in_reverse() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    assert_ok!(
        h.reconciler
            .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
            .await
    );
    assert_eq!(h.journal.names("create").await, vec!["c", "b", "a"]);

    h.journal.clear().await;
    assert_ok!(
        h.reconciler
            .teardown("db-1", ReconcileOptions::default(), &log)
            .await
    );
    assert_eq!(h.journal.names("delete").await, vec!["a", "b", "c"]);
    assert!(h.store.load("db-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_host_placed_widgets_run_on_their_host() {
    let h = harness(&["host-a", "host-b"]).await;
    let widgets = vec![
        Widget::new("net", &[]),
        Widget::new("dir-1", &["net"]).on_host("host-a"),
        Widget::new("dir-2", &["net"]).on_host("host-b"),
    ];

    let result = h
        .reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap();

    assert_eq!(*h.local.calls.lock().await, vec!["create net"]);
    assert_eq!(*h.hosts[0].calls.lock().await, vec!["create dir-1"]);
    assert_eq!(*h.hosts[1].calls.lock().await, vec!["create dir-2"]);

    let net = result.summary.phase_of(&Widget::id("net")).unwrap();
    let dir = result.summary.phase_of(&Widget::id("dir-1")).unwrap();
    assert!(net < dir);
    assert_eq!(result.summary.phase_of(&Widget::id("dir-2")), Some(dir));
}

// ============================================================================
// Create / update decisions
// ============================================================================

#[tokio::test]
async fn test_second_pass_without_changes_is_noop() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;

    let result = h
        .reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    assert!(result.summary.phases.is_empty());
    assert!(h.journal.entries().await.is_empty());

    // Hydrated output survives in the persisted record.
    let stored: Widget = pgfleet_resource::from_state(&result.state, &Widget::id("a")).unwrap();
    assert_eq!(stored.generated.as_deref(), Some("gen-a"));
}

#[tokio::test]
async fn test_new_resource_is_created_not_updated() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    h.reconciler
        .reconcile("db-1", desired(&[Widget::new("c", &[])]), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;

    let options = ReconcileOptions {
        force_update: false,
        ..Default::default()
    };
    let result = h
        .reconciler
        .reconcile("db-1", desired(&chain()), options, &log)
        .await
        .unwrap();

    assert_eq!(h.journal.names("create").await, vec!["b", "a"]);
    assert!(h.journal.names("update").await.is_empty());
    let reasons: Vec<_> = result
        .summary
        .phases
        .iter()
        .flatten()
        .map(|e| (e.event_type, e.reason))
        .collect();
    assert!(reasons
        .iter()
        .all(|r| *r == (EventType::Create, Some(EventReason::DoesNotExist))));
}

#[tokio::test]
async fn test_changed_field_updates_resource_and_dependents() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;

    let mut widgets = chain();
    widgets[1] = Widget::new("b", &["c"]).with_value("v2");
    h.reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &log)
        .await
        .unwrap();

    assert_eq!(h.journal.names("update").await, vec!["b", "a"]);
    assert!(h.journal.names("create").await.is_empty());
}

#[tokio::test]
async fn test_refresh_not_found_recreates() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;
    h.local.gone.lock().await.insert("c".to_string());

    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();

    assert_eq!(h.journal.names("create").await, vec!["c"]);
    assert_eq!(h.journal.names("update").await, vec!["b", "a"]);
}

#[tokio::test]
async fn test_removed_resource_is_deleted() {
    let h = harness(&[]).await;
    let log = TaskLogger::new_noop();

    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;

    let remaining = vec![Widget::new("b", &["c"]), Widget::new("c", &[])];
    let result = h
        .reconciler
        .reconcile("db-1", desired(&remaining), ReconcileOptions::default(), &log)
        .await
        .unwrap();

    assert_eq!(h.journal.entries().await, vec!["delete a"]);
    assert!(!result.state.contains(&Widget::id("a")));
    assert_eq!(h.store.load("db-1").await.unwrap().len(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failure_halts_only_dependents() {
    let h = harness(&[]).await;
    h.local.failing.lock().await.insert("left".to_string());

    let widgets = vec![
        Widget::new("base", &[]),
        Widget::new("left", &["base"]),
        Widget::new("left-app", &["left"]),
        Widget::new("right", &["base"]),
        Widget::new("right-app", &["right"]),
    ];
    let err = h
        .reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap_err();

    match &err {
        Error::Multiple(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().any(|e| matches!(e, Error::Lifecycle { identifier, .. } if identifier.id == "left")));
            assert!(errors.iter().any(|e| matches!(e, Error::Blocked { identifier, .. } if identifier.id == "left-app")));
        }
        other => panic!("expected joined errors, got {:?}", other),
    }
    assert!(err.is_retryable());

    let mut created = h.journal.names("create").await;
    created.sort();
    assert_eq!(created, vec!["base", "right", "right-app"]);

    // Successes were persisted, so a retry resumes.
    let stored = h.store.load("db-1").await.unwrap();
    assert_eq!(stored.len(), 3);

    h.local.failing.lock().await.clear();
    h.journal.clear().await;
    h.reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap();
    assert_eq!(h.journal.names("create").await, vec!["left", "left-app"]);
}

#[tokio::test]
async fn test_cycle_fails_without_side_effects() {
    let h = harness(&[]).await;
    let widgets = vec![
        Widget::new("a", &["b"]),
        Widget::new("b", &["a"]),
        Widget::new("c", &[]),
    ];
    let err = h
        .reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CycleDetected { .. }));
    assert!(!err.is_retryable());
    assert!(h.journal.entries().await.is_empty());
    assert!(h.kv.is_empty().await);
}

#[tokio::test]
async fn test_unreachable_host_is_reported() {
    let h = harness(&["host-a"]).await;
    let widgets = vec![Widget::new("dir", &[]).on_host("host-z")];
    let err = h
        .reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.store.load("db-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_canceled_before_start() {
    let h = harness(&[]).await;
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let options = ReconcileOptions {
        cancel: Some(rx),
        ..Default::default()
    };
    let err = h
        .reconciler
        .reconcile("db-1", desired(&chain()), options, &TaskLogger::new_noop())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(h.journal.entries().await.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_phase_keeps_finished_work() {
    let h = harness(&[]).await;
    h.local.stalled.lock().await.insert("slow".to_string());
    let widgets = vec![
        Widget::new("fast", &[]),
        Widget::new("slow", &[]),
        Widget::new("fast-app", &["fast"]),
    ];

    let (tx, rx) = watch::channel(false);
    let options = ReconcileOptions {
        cancel: Some(rx),
        ..Default::default()
    };
    let log = TaskLogger::new_noop();
    let (result, ()) = tokio::join!(
        h.reconciler.reconcile("db-1", desired(&widgets), options, &log),
        async {
            // "fast" lands in the store while "slow" is still running.
            while !h.store.load("db-1").await.unwrap().contains(&Widget::id("fast")) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        }
    );

    assert!(result.unwrap_err().is_canceled());
    assert_eq!(h.journal.names("create").await, vec!["fast"]);
    let stored = h.store.load("db-1").await.unwrap();
    assert_eq!(stored.len(), 1);

    h.local.stalled.lock().await.clear();
    h.journal.clear().await;
    h.reconciler
        .reconcile("db-1", desired(&widgets), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    let mut created = h.journal.names("create").await;
    created.sort();
    assert_eq!(created, vec!["fast-app", "slow"]);
}

// ============================================================================
// One-off operations
// ============================================================================

#[tokio::test]
async fn test_execute_runs_without_recording() {
    let h = harness(&["host-a"]).await;
    let log = TaskLogger::new_noop();
    h.reconciler
        .reconcile("db-1", desired(&chain()), ReconcileOptions::default(), &log)
        .await
        .unwrap();
    h.journal.clear().await;

    let operation = ResourceData::from_resource(&Widget::new("op", &["c"]).on_host("host-a")).unwrap();
    h.reconciler.execute("db-1", operation, &log).await.unwrap();
    assert_eq!(h.hosts[0].calls.lock().await.clone(), vec!["create op"]);
    assert_eq!(h.store.load("db-1").await.unwrap().len(), 3);

    let orphan = ResourceData::from_resource(&Widget::new("op", &["z"])).unwrap();
    let err = h.reconciler.execute("db-1", orphan, &log).await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { .. }));
}

// ============================================================================
// Task log and plan summaries
// ============================================================================

#[tokio::test]
async fn test_task_log_and_plan_summary() {
    let h = harness(&["host-a"]).await;
    let sink = Arc::new(MemoryTaskSink::new());
    let task = Task::new("db-1", TaskType::Create);
    let log = TaskLogger::new(sink.clone(), task.task_id, "test");
    log.record(&task).await;

    let widgets = vec![Widget::new("dir", &[]).on_host("host-a")];
    let options = ReconcileOptions {
        task_id: Some(task.task_id),
        ..Default::default()
    };
    h.reconciler
        .reconcile("db-1", desired(&widgets), options, &log)
        .await
        .unwrap();

    let lines: Vec<String> = sink
        .logs(task.task_id)
        .await
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(lines[0], "creating test.widget::dir on host host-a");
    assert!(lines[1].starts_with("finished creating test.widget::dir (took "));

    let summary = h.plans.get("db-1", task.task_id).await.unwrap().unwrap();
    assert_eq!(summary.phases.len(), 1);
    assert_eq!(summary.phases[0][0].resource_id, Identifier::new("dir", common::WIDGET));
}

#[tokio::test]
async fn test_dry_run_plan_does_not_apply() {
    let h = harness(&[]).await;
    let plan = h
        .reconciler
        .plan("db-1", &desired(&chain()), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(plan.events().count(), 3);
    assert!(h.journal.entries().await.is_empty());
    assert_eq!(h.store.load("db-1").await.unwrap(), State::new());
}
