//! HA coordinator (Patroni) REST contract.
//!
//! Every instance runs its own Patroni agent; a [`PatroniConnector`] turns an
//! agent URL into a [`PatroniClient`] bound to that instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, sleep};

use crate::error::{ClientError, ClientResult};

/// REST API port of the Patroni agent.
pub const PATRONI_PORT: u16 = 8888;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatroniState {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "stopping")]
    Stopping,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "stop failed")]
    StopFailed,
    #[serde(rename = "crashed")]
    Crashed,
    #[serde(rename = "start failed")]
    StartFailed,
    #[serde(rename = "restarting")]
    Restarting,
    #[serde(rename = "restart failed")]
    RestartFailed,
    #[serde(rename = "initializing new cluster")]
    InitializingNewCluster,
    #[serde(rename = "initdb failed")]
    InitDbFailed,
    #[serde(rename = "creating replica")]
    CreatingReplica,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PatroniState {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            PatroniState::StopFailed
                | PatroniState::Crashed
                | PatroniState::StartFailed
                | PatroniState::RestartFailed
                | PatroniState::InitDbFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Primary,
    Replica,
    Uninitialized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub state: Option<PatroniState>,
    pub role: Option<InstanceRole>,
    pub timeline: Option<i64>,
    #[serde(default)]
    pub pending_restart: bool,
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        self.state == Some(PatroniState::Running)
    }

    pub fn is_primary(&self) -> bool {
        self.role == Some(InstanceRole::Primary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Leader,
    StandbyLeader,
    SyncStandby,
    QuorumStandby,
    Replica,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Member name, which is the instance ID.
    pub name: String,
    pub role: ClusterRole,
    pub state: Option<PatroniState>,
    pub api_url: Option<String>,
    /// Replication lag in bytes; `None` when unknown.
    pub lag: Option<i64>,
}

impl ClusterMember {
    pub fn is_leader(&self) -> bool {
        self.role == ClusterRole::Leader
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub members: Vec<ClusterMember>,
    #[serde(default)]
    pub pause: bool,
}

impl ClusterState {
    pub fn leader(&self) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.is_leader())
    }

    /// The running replica with the smallest known lag.
    pub fn most_aligned_replica(&self) -> Option<&ClusterMember> {
        self.members
            .iter()
            .filter(|m| !m.is_leader() && m.state == Some(PatroniState::Running))
            .filter_map(|m| m.lag.filter(|lag| *lag >= 0).map(|lag| (lag, m)))
            .min_by(|(a, ma), (b, mb)| a.cmp(b).then_with(|| ma.name.cmp(&mb.name)))
            .map(|(_, m)| m)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Switchover {
    pub leader: Option<String>,
    pub candidate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Restart {
    #[serde(default)]
    pub restart_pending: bool,
    pub role: Option<InstanceRole>,
}

#[async_trait]
pub trait PatroniClient: Send + Sync {
    async fn instance_status(&self) -> ClientResult<InstanceStatus>;

    async fn cluster_status(&self) -> ClientResult<ClusterState>;

    async fn dynamic_config(&self) -> ClientResult<Value>;

    /// Merge-patch the DCS configuration, returning the result.
    async fn patch_dynamic_config(&self, patch: &Value) -> ClientResult<Value>;

    /// Switch leadership. With `wait`, returns once the new leader is elected.
    async fn schedule_switchover(&self, switchover: &Switchover, wait: bool) -> ClientResult<()>;

    async fn cancel_switchover(&self) -> ClientResult<()>;

    async fn failover(&self, candidate: &str) -> ClientResult<()>;

    async fn schedule_restart(&self, restart: &Restart) -> ClientResult<()>;

    async fn cancel_restart(&self) -> ClientResult<()>;

    async fn reload(&self) -> ClientResult<()>;

    async fn reinitialize(&self) -> ClientResult<()>;

    async fn liveness(&self) -> ClientResult<()>;

    async fn readiness(&self) -> ClientResult<()>;
}

/// Opens clients for Patroni agents by REST URL.
pub trait PatroniConnector: Send + Sync {
    fn connect(&self, api_url: &str) -> ClientResult<Arc<dyn PatroniClient>>;
}

/// Agent URL of an instance on its database network.
pub fn patroni_url(hostname: &str, database_id: &str) -> String {
    format!("http://{}.{}-database:{}", hostname, database_id, PATRONI_PORT)
}

/// Poll until the agent reports `running`. Fails fast on an error state.
pub async fn wait_for_running(client: &dyn PatroniClient, timeout: Duration) -> ClientResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = client.instance_status().await?;
        if status.is_running() {
            return Ok(());
        }
        if let Some(state) = status.state.filter(|s| s.is_error()) {
            return Err(ClientError::api(format!("instance is in error state: {:?}", state)));
        }
        if Instant::now() >= deadline {
            return Err(ClientError::Timeout {
                operation: "wait for patroni running".into(),
                after: timeout,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Poll the cluster until it reports a leader, returning its member name.
pub async fn primary_instance_id(client: &dyn PatroniClient, timeout: Duration) -> ClientResult<String> {
    let deadline = Instant::now() + timeout;
    loop {
        let cluster = client.cluster_status().await?;
        if let Some(leader) = cluster.leader() {
            return Ok(leader.name.clone());
        }
        if Instant::now() >= deadline {
            return Err(ClientError::Timeout {
                operation: "wait for patroni leader".into(),
                after: timeout,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}
