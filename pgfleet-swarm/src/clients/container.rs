//! Container orchestrator contract (Swarm services, overlay networks, exec).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

pub const RUNTIME_CONTAINER: &str = "container";
pub const ISOLATION_DEFAULT: &str = "default";
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Desired definition of a replicated service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub task_template: TaskSpec,
    pub replicas: u64,
    #[serde(default)]
    pub endpoint: EndpointSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub container: ContainerSpec,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    /// Placement constraints, e.g. `node.id==abc`.
    #[serde(default)]
    pub placement: Vec<String>,
    #[serde(default)]
    pub runtime: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default, with = "duration_secs")]
    pub stop_grace_period: Option<Duration>,
    #[serde(default)]
    pub isolation: String,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub target: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub search: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub target_port: u16,
    pub published_port: Option<u16>,
}

/// A deployed service as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub spec: ServiceSpec,
    pub running_tasks: u64,
}

/// Result of a deploy: the service ID and the spec it replaced, if any.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub service_id: String,
    pub previous: Option<ServiceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCreate {
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub attachable: bool,
    pub subnet: Ipv4Net,
    pub gateway: Ipv4Addr,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub subnet: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Create the service, or update it in place when one with the same name exists.
    async fn service_deploy(&self, spec: &ServiceSpec) -> ClientResult<DeployResult>;

    async fn service_inspect(&self, name_or_id: &str) -> ClientResult<Service>;

    /// The single service carrying every one of `labels`.
    async fn service_inspect_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> ClientResult<Service>;

    /// Set the replica count, optionally waiting for the running task count to match.
    async fn service_scale(
        &self,
        name_or_id: &str,
        replicas: u64,
        wait: Option<Duration>,
    ) -> ClientResult<()>;

    async fn service_remove(&self, name_or_id: &str) -> ClientResult<()>;

    /// Wait until the service runs as many tasks as it has replicas.
    async fn wait_for_service(&self, service_id: &str, timeout: Duration) -> ClientResult<()>;

    async fn network_create(&self, options: &NetworkCreate) -> ClientResult<String>;

    async fn network_inspect(&self, name_or_id: &str) -> ClientResult<NetworkInfo>;

    async fn network_remove(&self, name_or_id: &str) -> ClientResult<()>;

    /// Run a command in the running container of a service.
    async fn container_exec(&self, service: &str, command: &[String]) -> ClientResult<ExecOutput>;
}

/// Fill in the values the orchestrator applies when a field is unset, so a
/// submitted spec compares equal to its inspected form.
pub fn normalize_task_defaults(mut task: TaskSpec) -> TaskSpec {
    if task.container.stop_grace_period.is_none() {
        task.container.stop_grace_period = Some(DEFAULT_STOP_GRACE_PERIOD);
    }
    if task.container.isolation.is_empty() {
        task.container.isolation = ISOLATION_DEFAULT.to_string();
    }
    if task.container.dns.is_none() {
        task.container.dns = Some(DnsConfig::default());
    }
    if task.runtime.is_empty() {
        task.runtime = RUNTIME_CONTAINER.to_string();
    }
    task
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
