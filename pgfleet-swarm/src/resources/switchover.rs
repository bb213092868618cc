use std::time::Duration;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    CheckWillRestart, Instance, Node, check_will_restart_identifier,
    database_switchover_identifier, instance_identifier, node_identifier, switchover_identifier,
};
use crate::clients::PatroniClient;
use crate::clients::patroni::{self as patroni_api, Switchover as SwitchoverRequest};
use crate::collaborators::{Collaborators, SwarmContext};

const SWITCHOVER_SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Role an instance should hold once a [`DatabaseSwitchover`] completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    #[default]
    Primary,
    Replica,
}

/// Demotes an instance ahead of a predicted restart.
///
/// Does nothing for new instances, for nodes without replicas, or when the
/// restart check predicted no restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Switchover {
    pub host_id: String,
    pub instance_id: String,
}

impl Switchover {
    pub fn new(host_id: &str, instance_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

#[async_trait]
impl Resource<Collaborators> for Switchover {
    fn identifier(&self) -> Identifier {
        switchover_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![check_will_restart_identifier(&self.instance_id)]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        if !rc.state().has_resources(&self.dependencies()) {
            return Err(Error::not_found(self.identifier()));
        }
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let check: CheckWillRestart = rc.get(&check_will_restart_identifier(&self.instance_id))?;
        if !check.will_restart {
            return Ok(());
        }

        let instance: Instance = match rc.get(&instance_identifier(&self.instance_id)) {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        let node: Node = match rc.get(&node_identifier(&instance.config.node_name)) {
            Ok(node) => node,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        if node.instance_ids.len() < 2 {
            return Ok(());
        }

        DatabaseSwitchover {
            host_id: self.host_id.clone(),
            instance_id: self.instance_id.clone(),
            target_role: TargetRole::Replica,
        }
        .create(rc)
        .await
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}

/// Moves the primary role onto or away from an instance through its
/// Patroni agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSwitchover {
    pub host_id: String,
    pub instance_id: String,
    #[serde(default)]
    pub target_role: TargetRole,
}

impl DatabaseSwitchover {
    async fn switchover(&self, client: &dyn PatroniClient, target: Option<&str>) -> Result<()> {
        let cluster = client.cluster_status().await?;

        let candidate = match target {
            Some(target) => target.to_string(),
            None => match cluster.most_aligned_replica() {
                Some(replica) => replica.name.clone(),
                None => {
                    warn!(
                        instance = %self.instance_id,
                        "Skipping switchover, no viable candidates found"
                    );
                    return Ok(());
                }
            },
        };
        let leader = cluster
            .leader()
            .map(|member| member.name.clone())
            .ok_or_else(|| Error::remote("patroni cluster has no leader"))?;

        info!(%leader, %candidate, "Performing switchover from leader to candidate");
        client
            .schedule_switchover(
                &SwitchoverRequest {
                    leader: Some(leader),
                    candidate: Some(candidate),
                },
                true,
            )
            .await?;

        patroni_api::wait_for_running(client, SWITCHOVER_SETTLE_TIMEOUT).await?;
        Ok(())
    }
}

#[async_trait]
impl Resource<Collaborators> for DatabaseSwitchover {
    fn identifier(&self) -> Identifier {
        database_switchover_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![instance_identifier(&self.instance_id)]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        if !rc.state().has_resources(&self.dependencies()) {
            return Err(Error::not_found(self.identifier()));
        }
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let instance: Instance = rc.get(&instance_identifier(&self.instance_id))?;
        let client = rc.collaborators().patroni()?.connect(&instance.patroni_url())?;

        let is_primary = client.instance_status().await?.is_primary();
        match self.target_role {
            TargetRole::Primary if is_primary => Ok(()),
            TargetRole::Primary => self.switchover(client.as_ref(), Some(&self.instance_id)).await,
            TargetRole::Replica if !is_primary => Ok(()),
            TargetRole::Replica => self.switchover(client.as_ref(), None).await,
        }
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}
