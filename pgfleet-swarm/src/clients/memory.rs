//! In-memory collaborators for development mode and tests.
//!
//! ```text
//! MemoryContainers ◄── MemoryPatroni (cluster view derived from running services)
//! MemoryConsensus  ──► MemoryKv (shared with the state store in dev mode)
//! MemoryFileSystem     one per host
//! MemoryCertificates   deterministic PEM placeholders
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pgfleet_resource::{KvStore, MemoryKv, Precondition};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::certificates::{CertificateService, KeyPair};
use super::consensus::{ConsensusClient, ConsensusUser};
use super::container::{
    ContainerClient, DeployResult, ExecOutput, NetworkCreate, NetworkInfo, Service, ServiceSpec,
};
use super::filesystem::FileSystem;
use super::patroni::{
    ClusterMember, ClusterRole, ClusterState, InstanceRole, InstanceStatus, PatroniClient,
    PatroniConnector, PatroniState, Restart, Switchover,
};
use crate::error::{ClientError, ClientResult};
use crate::resources::{LABEL_DATABASE_ID, LABEL_INSTANCE_ID, LABEL_NODE};

// ============================================================================
// Containers
// ============================================================================

#[derive(Default)]
struct ContainerInner {
    services: BTreeMap<String, Service>,
    networks: BTreeMap<String, NetworkInfo>,
    next_id: u64,
    exec_log: Vec<(String, Vec<String>)>,
    exec_failures: HashSet<String>,
}

impl ContainerInner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn service_name(&self, name_or_id: &str) -> Option<String> {
        if self.services.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.services
            .values()
            .find(|s| s.id == name_or_id)
            .map(|s| s.spec.name.clone())
    }

    fn network(&self, name_or_id: &str) -> Option<&NetworkInfo> {
        self.networks
            .get(name_or_id)
            .or_else(|| self.networks.values().find(|n| n.id == name_or_id))
    }
}

/// A single-cluster container orchestrator. Services start instantly.
///
/// Like Swarm, a deployed spec has its network targets rewritten to network IDs.
pub struct MemoryContainers {
    inner: RwLock<ContainerInner>,
}

impl Default for MemoryContainers {
    fn default() -> Self {
        let mut inner = ContainerInner::default();
        inner.networks.insert(
            "bridge".to_string(),
            NetworkInfo {
                id: "net-bridge".to_string(),
                name: "bridge".to_string(),
                subnet: None,
                gateway: None,
            },
        );
        Self {
            inner: RwLock::new(inner),
        }
    }
}

impl MemoryContainers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn services(&self) -> Vec<Service> {
        self.inner.read().await.services.values().cloned().collect()
    }

    pub async fn networks(&self) -> Vec<NetworkInfo> {
        self.inner.read().await.networks.values().cloned().collect()
    }

    /// Commands run through `container_exec`, as `(service, argv)`.
    pub async fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.inner.read().await.exec_log.clone()
    }

    /// Make every exec in `service` exit non-zero.
    pub async fn fail_exec(&self, service: &str) {
        self.inner
            .write()
            .await
            .exec_failures
            .insert(service.to_string());
    }

    /// Simulate the service's container dying.
    pub async fn stop_tasks(&self, name_or_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(name) = inner.service_name(name_or_id) {
            if let Some(service) = inner.services.get_mut(&name) {
                service.running_tasks = 0;
            }
        }
    }
}

#[async_trait]
impl ContainerClient for MemoryContainers {
    async fn service_deploy(&self, spec: &ServiceSpec) -> ClientResult<DeployResult> {
        let mut inner = self.inner.write().await;
        let mut spec = spec.clone();
        for attachment in &mut spec.task_template.networks {
            let network = inner.network(&attachment.target).ok_or_else(|| {
                ClientError::api(format!("network {} not found", attachment.target))
            })?;
            attachment.target = network.id.clone();
        }

        let previous = inner.services.get(&spec.name).cloned();
        let id = match &previous {
            Some(service) => service.id.clone(),
            None => inner.next_id("svc"),
        };
        debug!(service = %spec.name, %id, "Deploying service");
        inner.services.insert(
            spec.name.clone(),
            Service {
                id: id.clone(),
                running_tasks: spec.replicas,
                spec,
            },
        );
        Ok(DeployResult {
            service_id: id,
            previous: previous.map(|s| s.spec),
        })
    }

    async fn service_inspect(&self, name_or_id: &str) -> ClientResult<Service> {
        let inner = self.inner.read().await;
        inner
            .service_name(name_or_id)
            .and_then(|name| inner.services.get(&name).cloned())
            .ok_or_else(|| ClientError::not_found(format!("service {}", name_or_id)))
    }

    async fn service_inspect_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> ClientResult<Service> {
        let inner = self.inner.read().await;
        let matches: Vec<&Service> = inner
            .services
            .values()
            .filter(|s| labels.iter().all(|(k, v)| s.spec.labels.get(k) == Some(v)))
            .collect();
        match matches.as_slice() {
            [] => Err(ClientError::not_found(format!("service with labels {:?}", labels))),
            [service] => Ok((*service).clone()),
            _ => Err(ClientError::api(format!(
                "{} services match labels {:?}",
                matches.len(),
                labels
            ))),
        }
    }

    async fn service_scale(
        &self,
        name_or_id: &str,
        replicas: u64,
        _wait: Option<Duration>,
    ) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let name = inner
            .service_name(name_or_id)
            .ok_or_else(|| ClientError::not_found(format!("service {}", name_or_id)))?;
        if let Some(service) = inner.services.get_mut(&name) {
            service.spec.replicas = replicas;
            service.running_tasks = replicas;
        }
        Ok(())
    }

    async fn service_remove(&self, name_or_id: &str) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let name = inner
            .service_name(name_or_id)
            .ok_or_else(|| ClientError::not_found(format!("service {}", name_or_id)))?;
        inner.services.remove(&name);
        Ok(())
    }

    async fn wait_for_service(&self, service_id: &str, timeout: Duration) -> ClientResult<()> {
        let service = self.service_inspect(service_id).await?;
        if service.running_tasks >= service.spec.replicas {
            Ok(())
        } else {
            Err(ClientError::Timeout {
                operation: format!("wait for service {}", service.spec.name),
                after: timeout,
            })
        }
    }

    async fn network_create(&self, options: &NetworkCreate) -> ClientResult<String> {
        let mut inner = self.inner.write().await;
        if inner.networks.contains_key(&options.name) {
            return Err(ClientError::api(format!(
                "network with name {} already exists",
                options.name
            )));
        }
        let id = inner.next_id("net");
        inner.networks.insert(
            options.name.clone(),
            NetworkInfo {
                id: id.clone(),
                name: options.name.clone(),
                subnet: Some(options.subnet),
                gateway: Some(options.gateway),
            },
        );
        Ok(id)
    }

    async fn network_inspect(&self, name_or_id: &str) -> ClientResult<NetworkInfo> {
        self.inner
            .read()
            .await
            .network(name_or_id)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("network {}", name_or_id)))
    }

    async fn network_remove(&self, name_or_id: &str) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let (name, id) = inner
            .network(name_or_id)
            .map(|n| (n.name.clone(), n.id.clone()))
            .ok_or_else(|| ClientError::not_found(format!("network {}", name_or_id)))?;
        let in_use = inner
            .services
            .values()
            .any(|s| s.spec.task_template.networks.iter().any(|n| n.target == id));
        if in_use {
            return Err(ClientError::api(format!("network {} is in use", name)));
        }
        inner.networks.remove(&name);
        Ok(())
    }

    async fn container_exec(&self, service: &str, command: &[String]) -> ClientResult<ExecOutput> {
        let mut inner = self.inner.write().await;
        let name = inner
            .service_name(service)
            .ok_or_else(|| ClientError::not_found(format!("service {}", service)))?;
        if inner.services.get(&name).is_some_and(|s| s.running_tasks == 0) {
            return Err(ClientError::api(format!("service {} has no running container", name)));
        }
        inner.exec_log.push((name.clone(), command.to_vec()));
        let exit_code = if inner.exec_failures.contains(&name) { 1 } else { 0 };
        Ok(ExecOutput {
            exit_code,
            output: String::new(),
        })
    }
}

// ============================================================================
// Consensus store
// ============================================================================

/// Consensus client over a [`MemoryKv`].
pub struct MemoryConsensus {
    kv: Arc<MemoryKv>,
    endpoints: Vec<String>,
    users: RwLock<BTreeMap<String, ConsensusUser>>,
}

impl MemoryConsensus {
    pub fn new(kv: Arc<MemoryKv>) -> Self {
        Self {
            kv,
            endpoints: vec!["https://127.0.0.1:2379".to_string()],
            users: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kv(&self) -> &Arc<MemoryKv> {
        &self.kv
    }

    pub async fn users(&self) -> Vec<ConsensusUser> {
        self.users.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ConsensusClient for MemoryConsensus {
    async fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>> {
        Ok(self.kv.get(key).await?.map(|kv| kv.value))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ClientResult<()> {
        self.kv.put(key, value, Precondition::None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ClientResult<bool> {
        Ok(self.kv.delete(key).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> ClientResult<u64> {
        Ok(self.kv.delete_prefix(prefix).await?)
    }

    async fn member_endpoints(&self) -> ClientResult<Vec<String>> {
        Ok(self.endpoints.clone())
    }

    async fn create_user(&self, user: &ConsensusUser) -> ClientResult<()> {
        self.users
            .write()
            .await
            .insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn remove_user(&self, username: &str) -> ClientResult<()> {
        self.users.write().await.remove(username);
        Ok(())
    }
}

// ============================================================================
// Certificates
// ============================================================================

#[derive(Default)]
pub struct MemoryCertificates {
    issued: Mutex<Vec<String>>,
}

impl MemoryCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Common names of every issued certificate.
    pub async fn issued(&self) -> Vec<String> {
        self.issued.lock().await.clone()
    }

    async fn issue(&self, common_name: &str) -> KeyPair {
        self.issued.lock().await.push(common_name.to_string());
        KeyPair {
            cert: pem("CERTIFICATE", common_name),
            key: pem("PRIVATE KEY", common_name),
        }
    }
}

fn pem(label: &str, subject: &str) -> Vec<u8> {
    format!(
        "-----BEGIN {label}-----\n{subject}\n-----END {label}-----\n",
        label = label,
        subject = subject
    )
    .into_bytes()
}

#[async_trait]
impl CertificateService for MemoryCertificates {
    async fn issue_server_cert(&self, common_name: &str, _hostnames: &[String]) -> ClientResult<KeyPair> {
        Ok(self.issue(common_name).await)
    }

    async fn issue_user_cert(&self, username: &str) -> ClientResult<KeyPair> {
        Ok(self.issue(username).await)
    }

    async fn ca_bundle(&self) -> ClientResult<Vec<u8>> {
        Ok(pem("CERTIFICATE", "pgfleet-ca"))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Dir { mode: u32 },
    File { contents: Vec<u8>, mode: u32 },
}

#[derive(Default)]
struct FsInner {
    entries: BTreeMap<PathBuf, Entry>,
    owners: HashMap<PathBuf, (u32, u32)>,
}

/// A host filesystem held in memory. Parents must exist before files are written.
#[derive(Default)]
pub struct MemoryFileSystem {
    inner: RwLock<FsInner>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry(&self, path: &Path) -> Option<Entry> {
        self.inner.read().await.entries.get(path).cloned()
    }

    pub async fn owner(&self, path: &Path) -> Option<(u32, u32)> {
        self.inner.read().await.owners.get(path).copied()
    }

    pub async fn paths(&self) -> Vec<PathBuf> {
        self.inner.read().await.entries.keys().cloned().collect()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn create_dir_all(&self, path: &Path, mode: u32) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            inner
                .entries
                .entry(ancestor.to_path_buf())
                .or_insert(Entry::Dir { mode: 0o755 });
        }
        match inner.entries.get(path) {
            Some(Entry::File { .. }) => Err(ClientError::api(format!(
                "{} exists and is not a directory",
                path.display()
            ))),
            _ => {
                inner.entries.insert(path.to_path_buf(), Entry::Dir { mode });
                Ok(())
            }
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let parent_is_dir = path
            .parent()
            .is_some_and(|p| matches!(inner.entries.get(p), Some(Entry::Dir { .. })));
        if !parent_is_dir {
            return Err(ClientError::not_found(format!(
                "parent directory of {}",
                path.display()
            )));
        }
        inner.entries.insert(
            path.to_path_buf(),
            Entry::File {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> ClientResult<Vec<u8>> {
        match self.inner.read().await.entries.get(path) {
            Some(Entry::File { contents, .. }) => Ok(contents.clone()),
            Some(Entry::Dir { .. }) => Err(ClientError::api(format!("{} is a directory", path.display()))),
            None => Err(ClientError::not_found(path.display().to_string())),
        }
    }

    async fn exists(&self, path: &Path) -> ClientResult<bool> {
        Ok(self.inner.read().await.entries.contains_key(path))
    }

    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.entries.contains_key(path) {
            return Err(ClientError::not_found(path.display().to_string()));
        }
        let targets: Vec<PathBuf> = inner
            .entries
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for target in targets {
            inner.owners.insert(target, (uid, gid));
        }
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        inner.entries.retain(|p, _| !p.starts_with(path));
        inner.owners.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        match inner.entries.get(path) {
            Some(Entry::File { .. }) => {
                inner.entries.remove(path);
                inner.owners.remove(path);
                Ok(())
            }
            Some(Entry::Dir { .. }) => Err(ClientError::api(format!("{} is a directory", path.display()))),
            None => Err(ClientError::not_found(path.display().to_string())),
        }
    }
}

// ============================================================================
// Patroni
// ============================================================================

struct PatroniShared {
    containers: Arc<MemoryContainers>,
    /// Elected leader per `(database, node)`.
    leaders: Mutex<HashMap<(String, String), String>>,
    calls: Mutex<Vec<String>>,
    dynamic_config: Mutex<HashMap<(String, String), Value>>,
}

/// HA coordinator simulation.
///
/// An instance's agent answers while its service has a running task. The first
/// running member of a node (by instance ID) becomes leader; the leader changes
/// only through switchover or failover, or when it stops running.
#[derive(Clone)]
pub struct MemoryPatroni {
    shared: Arc<PatroniShared>,
}

impl MemoryPatroni {
    pub fn new(containers: Arc<MemoryContainers>) -> Self {
        Self {
            shared: Arc::new(PatroniShared {
                containers,
                leaders: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                dynamic_config: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Calls that change cluster state, e.g. `switchover inst-1 -> inst-2`.
    pub async fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().await.clone()
    }

    pub async fn leader(&self, database_id: &str, node: &str) -> Option<String> {
        let mut cluster = self
            .shared
            .cluster(database_id, node)
            .await
            .ok()?;
        cluster.members.retain(|m| m.is_leader());
        cluster.members.pop().map(|m| m.name)
    }
}

impl PatroniConnector for MemoryPatroni {
    fn connect(&self, api_url: &str) -> ClientResult<Arc<dyn PatroniClient>> {
        let instance_id = api_url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split(['.', ':', '/']).next())
            .and_then(|host| host.strip_prefix("postgres-"))
            .ok_or_else(|| ClientError::api(format!("unrecognised patroni url {}", api_url)))?;
        Ok(Arc::new(MemoryPatroniClient {
            instance_id: instance_id.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

impl PatroniShared {
    /// `(database, node)` of a running instance.
    async fn locate(&self, instance_id: &str) -> ClientResult<(String, String)> {
        let labels = BTreeMap::from([(LABEL_INSTANCE_ID.to_string(), instance_id.to_string())]);
        let service = self
            .containers
            .service_inspect_by_labels(&labels)
            .await
            .map_err(|_| ClientError::api(format!("connection refused: {}", instance_id)))?;
        if service.running_tasks == 0 {
            return Err(ClientError::api(format!("connection refused: {}", instance_id)));
        }
        let label = |key: &str| service.spec.labels.get(key).cloned().unwrap_or_default();
        Ok((label(LABEL_DATABASE_ID), label(LABEL_NODE)))
    }

    async fn cluster(&self, database_id: &str, node: &str) -> ClientResult<ClusterState> {
        let mut running: Vec<String> = self
            .containers
            .services()
            .await
            .into_iter()
            .filter(|s| {
                s.running_tasks > 0
                    && s.spec.labels.get(LABEL_DATABASE_ID).map(String::as_str) == Some(database_id)
                    && s.spec.labels.get(LABEL_NODE).map(String::as_str) == Some(node)
            })
            .filter_map(|s| s.spec.labels.get(LABEL_INSTANCE_ID).cloned())
            .collect();
        running.sort();

        let key = (database_id.to_string(), node.to_string());
        let mut leaders = self.leaders.lock().await;
        let leader = match leaders.get(&key) {
            Some(leader) if running.contains(leader) => Some(leader.clone()),
            _ => running.first().cloned(),
        };
        match &leader {
            Some(leader) => leaders.insert(key, leader.clone()),
            None => leaders.remove(&key),
        };

        Ok(ClusterState {
            members: running
                .into_iter()
                .map(|name| ClusterMember {
                    role: if Some(&name) == leader.as_ref() {
                        ClusterRole::Leader
                    } else {
                        ClusterRole::Replica
                    },
                    state: Some(PatroniState::Running),
                    api_url: None,
                    lag: Some(0),
                    name,
                })
                .collect(),
            pause: false,
        })
    }

    async fn record(&self, call: String) {
        debug!(%call, "Patroni call");
        self.calls.lock().await.push(call);
    }
}

struct MemoryPatroniClient {
    instance_id: String,
    shared: Arc<PatroniShared>,
}

impl MemoryPatroniClient {
    async fn cluster(&self) -> ClientResult<((String, String), ClusterState)> {
        let (database_id, node) = self.shared.locate(&self.instance_id).await?;
        let cluster = self.shared.cluster(&database_id, &node).await?;
        Ok(((database_id, node), cluster))
    }
}

#[async_trait]
impl PatroniClient for MemoryPatroniClient {
    async fn instance_status(&self) -> ClientResult<InstanceStatus> {
        let (_, cluster) = self.cluster().await?;
        let is_leader = cluster
            .leader()
            .is_some_and(|leader| leader.name == self.instance_id);
        Ok(InstanceStatus {
            state: Some(PatroniState::Running),
            role: Some(if is_leader {
                InstanceRole::Primary
            } else {
                InstanceRole::Replica
            }),
            timeline: Some(1),
            pending_restart: false,
        })
    }

    async fn cluster_status(&self) -> ClientResult<ClusterState> {
        Ok(self.cluster().await?.1)
    }

    async fn dynamic_config(&self) -> ClientResult<Value> {
        let (key, _) = self.cluster().await?;
        Ok(self
            .shared
            .dynamic_config
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    async fn patch_dynamic_config(&self, patch: &Value) -> ClientResult<Value> {
        let (key, _) = self.cluster().await?;
        let mut configs = self.shared.dynamic_config.lock().await;
        let config = configs
            .entry(key)
            .or_insert_with(|| Value::Object(Default::default()));
        merge_patch(config, patch);
        Ok(config.clone())
    }

    async fn schedule_switchover(&self, switchover: &Switchover, _wait: bool) -> ClientResult<()> {
        let (key, cluster) = self.cluster().await?;
        let leader = cluster
            .leader()
            .map(|m| m.name.clone())
            .ok_or_else(|| ClientError::api("cluster has no leader"))?;
        if switchover.leader.as_ref().is_some_and(|l| *l != leader) {
            return Err(ClientError::api(format!("{} is not the leader", leader)));
        }
        let candidate = match &switchover.candidate {
            Some(candidate) => candidate.clone(),
            None => cluster
                .most_aligned_replica()
                .map(|m| m.name.clone())
                .ok_or_else(|| ClientError::api("no switchover candidate"))?,
        };
        if !cluster.members.iter().any(|m| m.name == candidate) {
            return Err(ClientError::api(format!("candidate {} is not a member", candidate)));
        }
        self.shared.leaders.lock().await.insert(key, candidate.clone());
        self.shared
            .record(format!("switchover {} -> {}", leader, candidate))
            .await;
        Ok(())
    }

    async fn cancel_switchover(&self) -> ClientResult<()> {
        self.shared
            .record(format!("cancel switchover {}", self.instance_id))
            .await;
        Ok(())
    }

    async fn failover(&self, candidate: &str) -> ClientResult<()> {
        let (key, cluster) = self.cluster().await?;
        if !cluster.members.iter().any(|m| m.name == candidate) {
            return Err(ClientError::api(format!("candidate {} is not a member", candidate)));
        }
        self.shared
            .leaders
            .lock()
            .await
            .insert(key, candidate.to_string());
        self.shared.record(format!("failover -> {}", candidate)).await;
        Ok(())
    }

    async fn schedule_restart(&self, _restart: &Restart) -> ClientResult<()> {
        self.shared
            .record(format!("restart {}", self.instance_id))
            .await;
        Ok(())
    }

    async fn cancel_restart(&self) -> ClientResult<()> {
        self.shared
            .record(format!("cancel restart {}", self.instance_id))
            .await;
        Ok(())
    }

    async fn reload(&self) -> ClientResult<()> {
        self.cluster().await?;
        self.shared
            .record(format!("reload {}", self.instance_id))
            .await;
        Ok(())
    }

    async fn reinitialize(&self) -> ClientResult<()> {
        self.shared
            .record(format!("reinitialize {}", self.instance_id))
            .await;
        Ok(())
    }

    async fn liveness(&self) -> ClientResult<()> {
        self.shared.locate(&self.instance_id).await.map(|_| ())
    }

    async fn readiness(&self) -> ClientResult<()> {
        self.shared.locate(&self.instance_id).await.map(|_| ())
    }
}

/// RFC 7396 merge patch.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
