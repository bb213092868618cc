//! Control plane: hosts, tasks and reconciliation of database specs.

use std::collections::BTreeSet;
use std::sync::Arc;

use pgfleet_log::{LogLine, MemoryTaskSink, Task, TaskLogger, TaskSink, TaskType};
use pgfleet_resource::{
    Error, KvStore, MemoryKv, PlanStore, PlanSummary, ReconcileOptions, Reconciler, Registry,
    ResourceData, Result, Router, Runner, State, StateStore, StoreError, Worker,
};
use pgfleet_swarm::clients::{
    FileSystem, LocalFileSystem, MemoryCertificates, MemoryConsensus, MemoryContainers,
    MemoryFileSystem, MemoryPatroni,
};
use pgfleet_swarm::resources::{BackupType, PgBackRestBackup};
use pgfleet_swarm::{
    Collaborators, DatabaseSpec, DesiredStateOptions, IpamService, SwarmNodeResolver,
    desired_state, register_all,
};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::file_kv::FileKv;

const QUEUE_CAPACITY: usize = 64;
const COMPONENT: &str = "pgfleet-cp";

/// Outcome of a task. A failed reconciliation is a failed task, not an error.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    pub summary: Option<PlanSummary>,
}

pub struct ControlPlane {
    config: Config,
    store: StateStore,
    plans: PlanStore,
    registry: Arc<Registry<Collaborators>>,
    shared: Collaborators,
    router: Arc<Router<Collaborators>>,
    reconciler: Reconciler<Collaborators>,
    hosts: Mutex<BTreeSet<String>>,
    containers: Arc<MemoryContainers>,
    sink: Arc<MemoryTaskSink>,
    cancel: watch::Sender<bool>,
}

impl ControlPlane {
    /// Open the store and start the local host's worker.
    pub async fn open(config: Config) -> Result<Self> {
        let kv: Arc<dyn KvStore> = if config.dev {
            Arc::new(MemoryKv::new())
        } else {
            tokio::fs::create_dir_all(&config.data_dir)
                .await
                .map_err(|e| StoreError::Internal(format!("{}: {}", config.data_dir.display(), e)))?;
            Arc::new(FileKv::open(config.store_path()).await?)
        };

        let mut registry = Registry::new();
        register_all(&mut registry);
        let registry = Arc::new(registry);

        let containers = Arc::new(MemoryContainers::new());
        let shared = Collaborators::new(&config.data_dir)
            .with_containers(containers.clone())
            .with_consensus(Arc::new(MemoryConsensus::new(Arc::new(MemoryKv::new()))))
            .with_certificates(Arc::new(MemoryCertificates::new()))
            .with_patroni(Arc::new(MemoryPatroni::new(containers.clone())))
            .with_ipam(Arc::new(IpamService::new(kv.clone(), &config.root)));

        let router = Arc::new(
            Router::new(Runner::new(registry.clone(), Arc::new(shared.clone())))
                .with_timeout(config.dispatch_timeout)
                .with_node_resolver(Arc::new(SwarmNodeResolver)),
        );
        let store = StateStore::new(kv.clone(), &config.root);
        let reconciler = Reconciler::new(store.clone(), router.clone())
            .with_plan_store(PlanStore::new(kv.clone(), &config.root));
        let (cancel, _) = watch::channel(false);

        let control_plane = Self {
            store,
            plans: PlanStore::new(kv, &config.root),
            registry,
            shared,
            router,
            reconciler,
            hosts: Mutex::new(BTreeSet::new()),
            containers,
            sink: Arc::new(MemoryTaskSink::new()),
            cancel,
            config,
        };

        let local: Arc<dyn FileSystem> = if control_plane.config.dev {
            Arc::new(MemoryFileSystem::new())
        } else {
            Arc::new(LocalFileSystem::new())
        };
        let host_id = control_plane.config.host_id.clone();
        control_plane.start_worker(&host_id, local).await;
        info!(host = %host_id, root = %control_plane.config.root, dev = control_plane.config.dev, "Control plane ready");
        Ok(control_plane)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn containers(&self) -> &MemoryContainers {
        &self.containers
    }

    pub async fn hosts(&self) -> Vec<String> {
        self.hosts.lock().await.iter().cloned().collect()
    }

    /// Cancel running tasks and every task started afterwards. Applied
    /// resources stay persisted.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn tasks(&self, scope: &str) -> Vec<Task> {
        self.sink.tasks_for_scope(scope).await
    }

    pub async fn logs(&self, task_id: Uuid) -> Vec<LogLine> {
        self.sink.logs(task_id).await
    }

    /// Refresh and plan without applying anything.
    pub async fn plan(&self, spec: &DatabaseSpec) -> Result<PlanSummary> {
        let desired = self.prepare(spec).await?;
        let plan = self
            .reconciler
            .plan(&spec.database_id, &desired, &ReconcileOptions::default())
            .await?;
        Ok(plan.summary())
    }

    pub async fn apply(&self, spec: &DatabaseSpec, force_update: bool) -> Result<TaskReport> {
        let desired = self.prepare(spec).await?;
        let scope = spec.database_id.as_str();
        let task_type = if self.store.load(scope).await?.is_empty() {
            TaskType::Create
        } else {
            TaskType::Update
        };

        let (task, log) = self.start_task(scope, task_type).await;
        let options = ReconcileOptions {
            force_update,
            task_id: Some(task.task_id),
            cancel: Some(self.cancel.subscribe()),
        };
        let result = self.reconciler.reconcile(scope, desired, options, &log).await;
        Ok(self.finish_task(task, &log, result.map(|r| Some(r.summary))).await)
    }

    /// Tear down every resource recorded for the spec's database.
    pub async fn delete(&self, spec: &DatabaseSpec) -> Result<TaskReport> {
        spec.validate()?;
        self.ensure_hosts(spec).await;
        let scope = spec.database_id.as_str();

        let (task, log) = self.start_task(scope, TaskType::Delete).await;
        let options = ReconcileOptions {
            force_update: false,
            task_id: Some(task.task_id),
            cancel: Some(self.cancel.subscribe()),
        };
        let result = self.reconciler.teardown(scope, options, &log).await;
        Ok(self.finish_task(task, &log, result.map(|r| Some(r.summary))).await)
    }

    /// Back up one node of a database from its current primary.
    pub async fn backup(
        &self,
        spec: &DatabaseSpec,
        node_name: &str,
        backup_type: BackupType,
    ) -> Result<TaskReport> {
        spec.validate()?;
        if !spec.nodes.iter().any(|node| node.name == node_name) {
            return Err(Error::Validation(vec![format!(
                "database {} has no node {}",
                spec.database_id, node_name
            )]));
        }
        if spec.backup.is_none() {
            return Err(Error::Validation(vec![format!(
                "database {} has no backup configuration",
                spec.database_id
            )]));
        }
        self.ensure_hosts(spec).await;
        let scope = spec.database_id.as_str();

        let operation = PgBackRestBackup::new(scope, node_name, backup_type);
        let operation = ResourceData::from_resource(&operation)?;
        let (task, log) = self.start_task(scope, TaskType::NodeBackup).await;
        log.log(format!("creating {} backup of node {}", backup_type, node_name))
            .await;
        let result = self.reconciler.execute(scope, operation, &log).await;
        Ok(self.finish_task(task, &log, result.map(|()| None)).await)
    }

    /// Recorded state of a database.
    pub async fn state(&self, database_id: &str) -> Result<State> {
        self.store.load(database_id).await
    }

    async fn prepare(&self, spec: &DatabaseSpec) -> Result<State> {
        let desired = desired_state(spec, &DesiredStateOptions::new(self.config.subnet))?;
        self.ensure_hosts(spec).await;
        Ok(desired)
    }

    /// Start a simulated agent for every host of the spec that has none yet.
    async fn ensure_hosts(&self, spec: &DatabaseSpec) {
        for config in spec.instances() {
            if self.hosts.lock().await.contains(&config.host_id) {
                continue;
            }
            info!(host = %config.host_id, "Simulating host agent");
            self.start_worker(&config.host_id, Arc::new(MemoryFileSystem::new()))
                .await;
        }
        self.router
            .set_cohort_manager(&spec.cohort_id, &self.config.host_id)
            .await;
    }

    async fn start_worker(&self, host_id: &str, filesystem: Arc<dyn FileSystem>) {
        let collaborators = self.shared.clone().with_filesystem(filesystem);
        let runner = Runner::new(self.registry.clone(), Arc::new(collaborators));
        let (worker, queue) = Worker::new(host_id, runner, QUEUE_CAPACITY);
        tokio::spawn(worker.run());
        self.router.register_host(host_id, queue).await;
        self.hosts.lock().await.insert(host_id.to_string());
    }

    async fn start_task(&self, scope: &str, task_type: TaskType) -> (Task, TaskLogger) {
        let mut task = Task::new(scope, task_type);
        let sink: Arc<dyn TaskSink> = self.sink.clone();
        let log = TaskLogger::new(sink, task.task_id, COMPONENT);
        if let Err(e) = task.start() {
            warn!(error = %e, "Failed to start task");
        }
        log.record(&task).await;
        (task, log)
    }

    async fn finish_task(
        &self,
        mut task: Task,
        log: &TaskLogger,
        result: Result<Option<PlanSummary>>,
    ) -> TaskReport {
        let (transition, summary) = match result {
            Ok(summary) => (task.complete(), summary),
            Err(err) => {
                let transition = if err.is_canceled() {
                    log.log("task canceled").await;
                    task.cancel()
                } else {
                    log.log(format!("task failed: {}", err)).await;
                    task.fail(&err)
                };
                (transition, self.recorded_summary(&task).await)
            }
        };
        if let Err(e) = transition {
            warn!(error = %e, "Failed to finish task");
        }
        log.record(&task).await;
        TaskReport { task, summary }
    }

    async fn recorded_summary(&self, task: &Task) -> Option<PlanSummary> {
        match self.plans.get(&task.scope, task.task_id).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, task_id = %task.task_id, "Failed to load plan summary");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pgfleet_log::TaskStatus;
    use pgfleet_swarm::SubnetRangeSpec;
    use pgfleet_swarm::spec::BackupConfig;
    use serde_json::json;

    use super::*;

    fn config(data_dir: &std::path::Path, dev: bool) -> Config {
        Config {
            root: "pgfleet".into(),
            data_dir: data_dir.to_path_buf(),
            host_id: "host-a".into(),
            dispatch_timeout: Duration::from_secs(30),
            subnet: SubnetRangeSpec::new("10.128.0.0/16".parse().unwrap(), 26),
            dev,
        }
    }

    fn spec() -> DatabaseSpec {
        serde_json::from_value(json!({
            "database_id": "orders",
            "cohort_id": "swarm-1",
            "cluster_id": "cluster-1",
            "nodes": [
                {"name": "n1", "instances": [
                    {"instance_id": "a", "host_id": "host-a", "postgres_image": "postgres:17"},
                    {"instance_id": "b", "host_id": "host-b", "postgres_image": "postgres:17"}
                ]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_starts_local_worker() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();
        assert_eq!(cp.hosts().await, vec!["host-a"]);
    }

    #[tokio::test]
    async fn test_plan_starts_spec_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();

        let summary = cp.plan(&spec()).await.unwrap();
        assert!(!summary.phases.is_empty());
        assert_eq!(cp.hosts().await, vec!["host-a", "host-b"]);
        // Planning applies nothing.
        assert!(cp.state("orders").await.unwrap().is_empty());
        assert!(cp.containers().services().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_records_task() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();

        let report = cp.apply(&spec(), false).await.unwrap();
        assert_eq!(report.task.status, TaskStatus::Completed);
        assert_eq!(report.task.task_type, TaskType::Create);
        assert!(report.summary.is_some());

        let tasks = cp.tasks("orders").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert!(!cp.logs(report.task.task_id).await.is_empty());

        let report = cp.apply(&spec(), false).await.unwrap();
        assert_eq!(report.task.task_type, TaskType::Update);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_before_task() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();
        let mut spec = spec();
        spec.nodes.clear();

        assert!(matches!(cp.apply(&spec, false).await, Err(Error::Validation(_))));
        assert!(cp.tasks("orders").await.is_empty());
    }

    #[tokio::test]
    async fn test_canceled_task() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();
        cp.cancel();

        let report = cp.apply(&spec(), false).await.unwrap();
        assert_eq!(report.task.status, TaskStatus::Canceled);
        assert!(cp.state("orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_backup_task() {
        let dir = tempfile::tempdir().unwrap();
        let cp = ControlPlane::open(config(dir.path(), true)).await.unwrap();
        let mut spec = spec();

        // Backups need a backup configuration.
        assert!(matches!(
            cp.backup(&spec, "n1", BackupType::Full).await,
            Err(Error::Validation(_))
        ));

        spec.backup = Some(BackupConfig {
            repo_path: "/srv/backups".into(),
            retention_full: 2,
        });
        assert!(matches!(
            cp.backup(&spec, "n9", BackupType::Full).await,
            Err(Error::Validation(_))
        ));

        // Nothing reconciled yet: the node is missing.
        let report = cp.backup(&spec, "n1", BackupType::Full).await.unwrap();
        assert_eq!(report.task.task_type, TaskType::NodeBackup);
        assert_eq!(report.task.status, TaskStatus::Failed);

        cp.apply(&spec, false).await.unwrap();
        let report = cp.backup(&spec, "n1", BackupType::Diff).await.unwrap();
        assert_eq!(report.task.status, TaskStatus::Completed);
        assert!(report.summary.is_none());
        assert!(
            cp.containers()
                .exec_log()
                .await
                .iter()
                .any(|(_, argv)| argv.iter().any(|arg| arg == "--type=diff"))
        );
    }
}
