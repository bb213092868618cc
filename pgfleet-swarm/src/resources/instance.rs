use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{instance_hostname, instance_identifier, network_name, node_identifier, postgres_service_identifier};
use crate::clients::PatroniClient;
use crate::clients::patroni::{self as patroni_api, patroni_url};
use crate::collaborators::{Collaborators, SwarmContext};
use crate::spec::InstanceConfig;

const RUNNING_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PRIMARY_TIMEOUT: Duration = Duration::from_secs(60);
const REFRESH_PRIMARY_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach an instance on its database network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub hostname: String,
    pub port: u16,
    pub patroni_url: String,
}

impl ConnectionInfo {
    pub fn for_instance(config: &InstanceConfig) -> Self {
        let hostname = instance_hostname(&config.instance_id);
        Self {
            patroni_url: patroni_url(&hostname, &config.database_id),
            hostname: format!("{}.{}", hostname, network_name(&config.database_id)),
            port: config.port,
        }
    }
}

/// A running Postgres instance, ready once its agent reports `running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub config: InstanceConfig,
    #[serde(default)]
    pub primary_instance_id: Option<String>,
    #[serde(default)]
    pub connection_info: Option<ConnectionInfo>,
}

impl Instance {
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            primary_instance_id: None,
            connection_info: None,
        }
    }

    pub fn patroni_url(&self) -> String {
        match &self.connection_info {
            Some(info) => info.patroni_url.clone(),
            None => ConnectionInfo::for_instance(&self.config).patroni_url,
        }
    }

    fn client(&mut self, rc: &SwarmContext) -> Result<Arc<dyn PatroniClient>> {
        let info = ConnectionInfo::for_instance(&self.config);
        let client = rc.collaborators().patroni()?.connect(&info.patroni_url)?;
        self.connection_info = Some(info);
        Ok(client)
    }

    async fn initialize(&mut self, client: &dyn PatroniClient) -> Result<()> {
        patroni_api::wait_for_running(client, RUNNING_TIMEOUT).await?;
        let primary = patroni_api::primary_instance_id(client, PRIMARY_TIMEOUT).await?;
        info!(
            instance = %self.config.instance_id,
            primary = %primary,
            "Instance is running"
        );
        self.primary_instance_id = Some(primary);
        Ok(())
    }
}

#[async_trait]
impl Resource<Collaborators> for Instance {
    fn identifier(&self) -> Identifier {
        instance_identifier(&self.config.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.config.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![postgres_service_identifier(&self.config.instance_id)]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/primary_instance_id", "/connection_info"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let identifier = self.identifier();
        let client = self.client(rc).map_err(|_| Error::not_found(&identifier))?;
        match patroni_api::primary_instance_id(client.as_ref(), REFRESH_PRIMARY_TIMEOUT).await {
            Ok(primary) => {
                self.primary_instance_id = Some(primary);
                Ok(())
            }
            Err(err) => {
                debug!(instance = %self.config.instance_id, error = %err, "Instance unreachable");
                Err(Error::not_found(identifier))
            }
        }
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let client = self.client(rc)?;
        self.initialize(client.as_ref()).await
    }

    async fn update(&mut self, rc: &SwarmContext) -> Result<()> {
        let client = self.client(rc)?;
        client.reload().await?;
        self.initialize(client.as_ref()).await
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}

/// A Patroni cluster of instances, tracking which one is primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub cluster_id: String,
    pub database_id: String,
    pub name: String,
    pub instance_ids: Vec<String>,
    #[serde(default)]
    pub primary_instance_id: Option<String>,
}

impl Node {
    /// Ask each reachable instance for the leader, falling back to the
    /// primary recorded on the instances.
    async fn resolve_primary(&self, rc: &SwarmContext) -> Result<Option<String>> {
        let patroni = rc.collaborators().patroni()?;
        let mut recorded = None;
        for instance_id in &self.instance_ids {
            let Ok(instance) = rc.get::<Instance>(&instance_identifier(instance_id)) else {
                continue;
            };
            if recorded.is_none() {
                recorded = instance.primary_instance_id.clone();
            }
            let Ok(client) = patroni.connect(&instance.patroni_url()) else {
                continue;
            };
            match client.cluster_status().await {
                Ok(cluster) => {
                    if let Some(leader) = cluster.leader() {
                        return Ok(Some(leader.name.clone()));
                    }
                }
                Err(err) => {
                    debug!(node = %self.name, instance = %instance_id, error = %err, "Cluster status unavailable");
                }
            }
        }
        Ok(recorded)
    }
}

#[async_trait]
impl Resource<Collaborators> for Node {
    fn identifier(&self) -> Identifier {
        node_identifier(&self.name)
    }

    fn executor(&self) -> Executor {
        Executor::Cluster(self.cluster_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        self.instance_ids
            .iter()
            .map(|id| instance_identifier(id))
            .collect()
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/primary_instance_id"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let any_instance = self
            .dependencies()
            .iter()
            .any(|id| rc.state().contains(id));
        if !self.instance_ids.is_empty() && !any_instance {
            return Err(Error::not_found(self.identifier()));
        }
        self.create(rc).await
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        if self.instance_ids.is_empty() {
            return Err(Error::Validation(vec![format!(
                "node {} does not have any instances",
                self.name
            )]));
        }
        self.primary_instance_id = self.resolve_primary(rc).await?;
        Ok(())
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pgfleet_resource::State;

    use super::*;
    use crate::clients::ContainerClient;
    use crate::clients::container::{ServiceSpec, TaskSpec};
    use crate::resources::service_labels;
    use crate::resources::testing::{Harness, add, instance_config};

    async fn run_instance(harness: &Harness, instance_id: &str) {
        harness
            .containers
            .service_deploy(&ServiceSpec {
                name: format!("postgres-{}", instance_id),
                labels: service_labels("orders", "n1", instance_id),
                task_template: TaskSpec::default(),
                replicas: 1,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    fn node(instance_ids: &[&str]) -> Node {
        Node {
            cluster_id: "cluster-1".into(),
            database_id: "orders".into(),
            name: "n1".into(),
            instance_ids: instance_ids.iter().map(|id| id.to_string()).collect(),
            primary_instance_id: None,
        }
    }

    #[test]
    fn test_connection_info() {
        let info = ConnectionInfo::for_instance(&instance_config("inst-1", "host-a"));
        assert_eq!(info.hostname, "postgres-inst-1.orders-database");
        assert_eq!(info.port, 5432);
        assert_eq!(info.patroni_url, "http://postgres-inst-1.orders-database:8888");
    }

    #[tokio::test]
    async fn test_create_hydrates_primary() {
        let harness = Harness::new();
        run_instance(&harness, "inst-1").await;
        run_instance(&harness, "inst-2").await;
        let rc = harness.context(State::new());

        let mut instance = Instance::new(instance_config("inst-2", "host-b"));
        instance.create(&rc).await.unwrap();
        assert_eq!(instance.primary_instance_id.as_deref(), Some("inst-1"));
        assert!(instance.connection_info.is_some());

        instance.update(&rc).await.unwrap();
        assert_eq!(instance.primary_instance_id.as_deref(), Some("inst-1"));
    }

    #[tokio::test]
    async fn test_refresh_unreachable_is_not_found() {
        let harness = Harness::new();
        let rc = harness.context(State::new());
        let mut instance = Instance::new(instance_config("inst-1", "host-a"));
        assert!(instance.refresh(&rc).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_node_primary_from_cluster() {
        let harness = Harness::new();
        run_instance(&harness, "inst-1").await;
        run_instance(&harness, "inst-2").await;

        let mut state = State::new();
        add(&mut state, &Instance::new(instance_config("inst-1", "host-a")));
        add(&mut state, &Instance::new(instance_config("inst-2", "host-b")));
        let rc = harness.context(state);

        let mut node = node(&["inst-1", "inst-2"]);
        node.create(&rc).await.unwrap();
        assert_eq!(node.primary_instance_id.as_deref(), Some("inst-1"));

        // The first instance is down, the second still answers.
        harness.containers.stop_tasks("postgres-inst-1").await;
        node.refresh(&rc).await.unwrap();
        assert_eq!(node.primary_instance_id.as_deref(), Some("inst-2"));
    }

    #[tokio::test]
    async fn test_node_falls_back_to_recorded_primary() {
        let harness = Harness::new();
        let mut recorded = Instance::new(instance_config("inst-1", "host-a"));
        recorded.primary_instance_id = Some("inst-1".into());
        let mut state = State::new();
        add(&mut state, &recorded);

        let mut node = node(&["inst-1"]);
        node.create(&harness.context(state)).await.unwrap();
        assert_eq!(node.primary_instance_id.as_deref(), Some("inst-1"));
    }

    #[tokio::test]
    async fn test_node_without_instances() {
        let harness = Harness::new();
        let rc = harness.context(State::new());
        assert!(node(&[]).create(&rc).await.is_err());
        assert!(node(&["inst-1"]).refresh(&rc).await.unwrap_err().is_not_found());
    }
}
