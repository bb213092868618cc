//! End-to-end reconciliation of a database across a two-host cohort.

mod common;

use std::path::Path;

use common::{cohort, options, orders};
use pgfleet_log::TaskLogger;
use pgfleet_resource::{EventType, Identifier, PlanSummary, ReconcileOptions, State, from_state};
use pgfleet_swarm::{DatabaseSpec, DesiredStateOptions, desired_state};
use pgfleet_swarm::resources::{
    Network, Node, ScaleDirection, dir_identifier, etcd_creds_identifier, instance_identifier,
    network_identifier, node_identifier, patroni_config_identifier, pgbackrest_stanza_identifier,
    postgres_certs_identifier, postgres_service_identifier, service_spec_identifier,
    switchover_identifier,
};
use pgfleet_swarm::spec::BackupConfig;
use tokio_test::assert_ok;

fn with_backup() -> DatabaseSpec {
    let mut spec = orders();
    spec.backup = Some(BackupConfig {
        repo_path: "/srv/backups".into(),
        retention_full: 2,
    });
    spec
}

/// Every dependency that is in the plan runs in an earlier phase.
fn assert_dependencies_first(summary: &PlanSummary, state: &State) {
    for (phase, events) in summary.phases.iter().enumerate() {
        for event in events {
            let data = state.get(&event.resource_id).unwrap();
            for dependency in &data.dependencies {
                if let Some(earlier) = summary.phase_of(dependency) {
                    assert!(
                        earlier < phase,
                        "{} (phase {}) runs before its dependency {} (phase {})",
                        event.resource_id,
                        phase,
                        dependency,
                        earlier
                    );
                }
            }
        }
    }
}

fn phase_sets(summary: &PlanSummary) -> Vec<Vec<Identifier>> {
    summary
        .phases
        .iter()
        .map(|events| {
            let mut ids: Vec<Identifier> = events.iter().map(|e| e.resource_id.clone()).collect();
            ids.sort();
            ids
        })
        .collect()
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_database() {
    let c = cohort(&["host-a", "host-b"]).await;
    let desired = desired_state(&orders(), &options()).unwrap();

    let result = c
        .reconciler
        .reconcile("orders", desired, ReconcileOptions::default(), &TaskLogger::new_noop())
        .await
        .unwrap();

    let services = c.containers.services().await;
    assert_eq!(services.len(), 3);
    assert!(services.iter().all(|s| s.running_tasks == 1));

    let network: Network = from_state(&result.state, &network_identifier("orders")).unwrap();
    assert_eq!(network.subnet, Some("10.128.0.0/24".parse().unwrap()));
    assert_eq!(network.gateway, Some("10.128.0.1".parse().unwrap()));

    // Host-placed files land on their own host only.
    let fs_a = c.filesystem("host-a");
    let fs_b = c.filesystem("host-b");
    assert!(fs_a.entry(Path::new("/var/lib/pgfleet/a/configs/patroni.yaml")).await.is_some());
    assert!(fs_a.entry(Path::new("/var/lib/pgfleet/c/configs/patroni.yaml")).await.is_some());
    assert!(fs_a.entry(Path::new("/var/lib/pgfleet/b")).await.is_none());
    assert!(fs_b.entry(Path::new("/var/lib/pgfleet/b/certificates/etcd/client.key")).await.is_some());

    assert_eq!(c.consensus.users().await.len(), 3);

    let n1: Node = from_state(&result.state, &node_identifier("n1")).unwrap();
    assert_eq!(n1.primary_instance_id.as_deref(), Some("a"));
    let n2: Node = from_state(&result.state, &node_identifier("n2")).unwrap();
    assert_eq!(n2.primary_instance_id.as_deref(), Some("c"));

    // The service is deployed before the instance waits on it.
    let summary = &result.summary;
    let service = summary.phase_of(&postgres_service_identifier("a")).unwrap();
    let instance = summary.phase_of(&instance_identifier("a")).unwrap();
    let node = summary.phase_of(&node_identifier("n1")).unwrap();
    assert!(service < instance);
    assert!(instance < node);
}

#[tokio::test]
async fn test_second_pass_is_noop() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();

    assert_ok!(
        c.reconciler
            .reconcile(
                "orders",
                desired_state(&orders(), &options()).unwrap(),
                ReconcileOptions::default(),
                &log
            )
            .await
    );

    let result = c
        .reconciler
        .reconcile(
            "orders",
            desired_state(&orders(), &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();
    assert!(result.summary.phases.is_empty(), "{:?}", result.summary);
    assert!(c.patroni.calls().await.is_empty());
}

#[tokio::test]
async fn test_create_with_backup_orders_every_layer() {
    let c = cohort(&["host-a", "host-b"]).await;
    let result = c
        .reconciler
        .reconcile(
            "orders",
            desired_state(&with_backup(), &options()).unwrap(),
            ReconcileOptions::default(),
            &TaskLogger::new_noop(),
        )
        .await
        .unwrap();

    let summary = &result.summary;
    assert_dependencies_first(summary, &result.state);

    let phase = |id: Identifier| summary.phase_of(&id).unwrap();
    let network = phase(network_identifier("orders"));
    let service = phase(postgres_service_identifier("a"));
    assert!(network < phase(patroni_config_identifier("a")));
    for before_spec in [
        dir_identifier("a-data"),
        etcd_creds_identifier("a"),
        postgres_certs_identifier("a"),
        patroni_config_identifier("a"),
    ] {
        assert!(phase(before_spec) < phase(service_spec_identifier("a")));
    }
    assert!(phase(service_spec_identifier("a")) < service);
    assert!(service < phase(instance_identifier("a")));
    assert!(phase(node_identifier("n1")) < phase(pgbackrest_stanza_identifier("n1")));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_image_change_moves_primary_before_restart() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();

    c.reconciler
        .reconcile(
            "orders",
            desired_state(&orders(), &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();
    assert_eq!(c.patroni.leader("orders", "n1").await.as_deref(), Some("a"));

    let mut spec = orders();
    spec.nodes[0].instances[0].postgres_image = "postgres:18".into();
    let result = c
        .reconciler
        .reconcile(
            "orders",
            desired_state(&spec, &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();

    let calls = c.patroni.calls().await;
    assert_eq!(calls.first().map(String::as_str), Some("switchover a -> b"));
    assert!(calls.contains(&"reload a".to_string()));
    assert_eq!(c.patroni.leader("orders", "n1").await.as_deref(), Some("b"));

    let service = c
        .containers
        .services()
        .await
        .into_iter()
        .find(|s| s.spec.name == "postgres-a")
        .unwrap();
    assert_eq!(service.spec.task_template.container.image, "postgres:18");

    let summary = &result.summary;
    let switchover = summary.phase_of(&switchover_identifier("a")).unwrap();
    let service = summary.phase_of(&postgres_service_identifier("a")).unwrap();
    assert!(switchover < service);

    let n1: Node = from_state(&result.state, &node_identifier("n1")).unwrap();
    assert_eq!(n1.primary_instance_id.as_deref(), Some("b"));

    // Untouched instances stay out of the plan.
    assert!(summary.phase_of(&postgres_service_identifier("c")).is_none());
}

#[tokio::test]
async fn test_unchanged_pass_after_image_change_is_noop() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();
    let reconcile = |spec: DatabaseSpec| {
        let desired = desired_state(&spec, &options()).unwrap();
        c.reconciler
            .reconcile("orders", desired, ReconcileOptions::default(), &log)
    };

    let mut spec = orders();
    reconcile(spec.clone()).await.unwrap();
    spec.nodes[0].instances[0].postgres_image = "postgres:18".into();
    reconcile(spec.clone()).await.unwrap();
    let calls = c.patroni.calls().await.len();

    let result = reconcile(spec).await.unwrap();
    assert!(result.summary.phases.is_empty(), "{:?}", result.summary);
    assert_eq!(c.patroni.calls().await.len(), calls);
}

#[tokio::test]
async fn test_scale_down_then_restore() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();
    let reconcile = |options: DesiredStateOptions| {
        let desired = desired_state(&orders(), &options).unwrap();
        c.reconciler
            .reconcile("orders", desired, ReconcileOptions::default(), &log)
    };

    reconcile(options()).await.unwrap();
    reconcile(options().with_scale(ScaleDirection::Down)).await.unwrap();
    assert!(c.containers.services().await.iter().all(|s| s.running_tasks == 0));

    // Without the scale resource the stopped services drift and are redeployed.
    reconcile(options()).await.unwrap();
    assert!(c.containers.services().await.iter().all(|s| s.running_tasks == 1));
}

#[tokio::test]
async fn test_backup_stanza_created_on_each_primary() {
    let c = cohort(&["host-a", "host-b"]).await;

    c.reconciler
        .reconcile(
            "orders",
            desired_state(&with_backup(), &options()).unwrap(),
            ReconcileOptions::default(),
            &TaskLogger::new_noop(),
        )
        .await
        .unwrap();

    let creates: Vec<(String, String)> = c
        .containers
        .exec_log()
        .await
        .into_iter()
        .filter(|(_, argv)| argv.iter().any(|arg| arg == "stanza-create"))
        .map(|(service, argv)| (service, argv[4].clone()))
        .collect();
    assert_eq!(creates.len(), 2);
    assert!(creates.contains(&("postgres-a".into(), "orders-n1".into())));
    assert!(creates.contains(&("postgres-c".into(), "orders-n2".into())));

    assert!(
        c.filesystem("host-b")
            .entry(Path::new("/var/lib/pgfleet/b/configs/pgbackrest.conf"))
            .await
            .is_some()
    );
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_teardown_releases_everything() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();

    c.reconciler
        .reconcile(
            "orders",
            desired_state(&orders(), &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();

    let result = c
        .reconciler
        .teardown("orders", ReconcileOptions::default(), &log)
        .await
        .unwrap();
    assert!(
        result
            .summary
            .phases
            .iter()
            .flatten()
            .all(|e| e.event_type == EventType::Delete)
    );

    assert!(c.containers.services().await.is_empty());
    let networks: Vec<String> = c.containers.networks().await.into_iter().map(|n| n.name).collect();
    assert_eq!(networks, vec!["bridge"]);
    assert!(c.consensus.users().await.is_empty());
    assert!(c.filesystem("host-a").entry(Path::new("/var/lib/pgfleet/a")).await.is_none());
    assert!(c.filesystem("host-b").entry(Path::new("/var/lib/pgfleet/b")).await.is_none());
    assert!(c.store.load("orders").await.unwrap().is_empty());

    // The released subnet is handed out again.
    let result = c
        .reconciler
        .reconcile(
            "orders",
            desired_state(&orders(), &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();
    let network: Network = from_state(&result.state, &network_identifier("orders")).unwrap();
    assert_eq!(network.subnet, Some("10.128.0.0/24".parse().unwrap()));
}

#[tokio::test]
async fn test_teardown_reverses_creation_order() {
    let c = cohort(&["host-a", "host-b"]).await;
    let log = TaskLogger::new_noop();

    let created = c
        .reconciler
        .reconcile(
            "orders",
            desired_state(&with_backup(), &options()).unwrap(),
            ReconcileOptions::default(),
            &log,
        )
        .await
        .unwrap();
    let deleted = c
        .reconciler
        .teardown("orders", ReconcileOptions::default(), &log)
        .await
        .unwrap();

    let mut reversed = phase_sets(&created.summary);
    reversed.reverse();
    assert_eq!(phase_sets(&deleted.summary), reversed);
    assert!(
        deleted
            .summary
            .phases
            .iter()
            .flatten()
            .all(|e| e.event_type == EventType::Delete)
    );
}
