use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use pgfleet_resource::{Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{LABEL_DATABASE_ID, network_identifier, network_name};
use crate::clients::{NetworkCreate, NetworkInfo};
use crate::collaborators::{Collaborators, SwarmContext};
use crate::ipam::{SubnetRangeSpec, gateway_of};

const OVERLAY_DRIVER: &str = "overlay";
const SWARM_SCOPE: &str = "swarm";

/// Per-database overlay network with a subnet from the shared allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub cohort_id: String,
    pub database_id: String,
    pub name: String,
    pub allocator: SubnetRangeSpec,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub subnet: Option<Ipv4Net>,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
}

impl Network {
    pub fn new(cohort_id: &str, database_id: &str, allocator: SubnetRangeSpec) -> Self {
        Self {
            cohort_id: cohort_id.to_string(),
            database_id: database_id.to_string(),
            name: network_name(database_id),
            allocator,
            network_id: None,
            subnet: None,
            gateway: None,
        }
    }

    fn hydrate(&mut self, info: NetworkInfo) {
        self.network_id = Some(info.id);
        self.subnet = info.subnet;
        self.gateway = info.gateway;
    }
}

#[async_trait]
impl Resource<Collaborators> for Network {
    fn identifier(&self) -> Identifier {
        network_identifier(&self.database_id)
    }

    fn executor(&self) -> Executor {
        Executor::Cohort(self.cohort_id.clone())
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/network_id", "/subnet", "/gateway"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let info = rc
            .collaborators()
            .containers()?
            .network_inspect(&self.name)
            .await?;
        self.hydrate(info);
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        match self.refresh(rc).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let collaborators = rc.collaborators();
        let containers = collaborators.containers()?;
        let ipam = collaborators.ipam()?;

        let subnet = ipam
            .allocate_subnet(self.allocator.cidr, self.allocator.subnet_bits)
            .await?;
        let gateway = gateway_of(subnet);

        let options = NetworkCreate {
            name: self.name.clone(),
            driver: OVERLAY_DRIVER.to_string(),
            scope: SWARM_SCOPE.to_string(),
            attachable: true,
            subnet,
            gateway,
            labels: BTreeMap::from([(LABEL_DATABASE_ID.to_string(), self.database_id.clone())]),
        };
        let network_id = match containers.network_create(&options).await {
            Ok(id) => id,
            Err(err) => {
                // Return the subnet to the pool.
                if let Err(release) = ipam
                    .release_subnet(self.allocator.cidr, self.allocator.subnet_bits, subnet)
                    .await
                {
                    warn!(network = %self.name, %subnet, error = %release, "Failed to release subnet");
                }
                return Err(err.into());
            }
        };

        info!(network = %self.name, %subnet, %gateway, "Created network");
        self.network_id = Some(network_id);
        self.subnet = Some(subnet);
        self.gateway = Some(gateway);
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let collaborators = rc.collaborators();
        match collaborators.containers()?.network_remove(&self.name).await {
            Ok(()) => info!(network = %self.name, "Removed network"),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(subnet) = self.subnet {
            collaborators
                .ipam()?
                .release_subnet(self.allocator.cidr, self.allocator.subnet_bits, subnet)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pgfleet_resource::State;

    use super::*;
    use crate::clients::ContainerClient;
    use crate::resources::testing::{Harness, subnet_cidr};

    fn network(database_id: &str) -> Network {
        Network::new("swarm-1", database_id, SubnetRangeSpec::new(subnet_cidr(), 26))
    }

    #[tokio::test]
    async fn test_create_allocates_subnet() {
        let harness = Harness::new();
        let rc = harness.context(State::new());

        let mut orders = network("orders");
        orders.create(&rc).await.unwrap();
        let mut billing = network("billing");
        billing.create(&rc).await.unwrap();

        assert_eq!(orders.subnet, Some("10.128.0.0/26".parse().unwrap()));
        assert_eq!(orders.gateway, Some(Ipv4Addr::new(10, 128, 0, 1)));
        assert_eq!(billing.subnet, Some("10.128.0.64/26".parse().unwrap()));

        let info = harness.containers.network_inspect("orders-database").await.unwrap();
        assert_eq!(info.subnet, orders.subnet);
        assert_eq!(Some(info.id), orders.network_id);
    }

    #[tokio::test]
    async fn test_create_adopts_existing_network() {
        let harness = Harness::new();
        let rc = harness.context(State::new());
        let mut first = network("orders");
        first.create(&rc).await.unwrap();

        // A second create (e.g. after losing the state record) must not allocate again.
        let mut second = network("orders");
        second.create(&rc).await.unwrap();
        assert_eq!(second.subnet, first.subnet);
        assert_eq!(second.network_id, first.network_id);

        let range = harness
            .collaborators
            .ipam()
            .unwrap()
            .range(subnet_cidr(), 26)
            .await
            .unwrap();
        assert_eq!(range.used(), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_subnet() {
        let harness = Harness::new();
        let rc = harness.context(State::new());
        let mut orders = network("orders");
        orders.create(&rc).await.unwrap();
        orders.delete(&rc).await.unwrap();

        assert!(orders.refresh(&rc).await.unwrap_err().is_not_found());
        let mut billing = network("billing");
        billing.create(&rc).await.unwrap();
        assert_eq!(billing.subnet, Some("10.128.0.0/26".parse().unwrap()));

        // Already gone.
        orders.subnet = None;
        orders.delete(&rc).await.unwrap();
    }

    #[test]
    fn test_ignores_hydrated_fields() {
        let net = network("orders");
        assert_eq!(net.identifier().id, "orders-database");
        assert_eq!(net.executor(), Executor::Cohort("swarm-1".into()));
        assert!(net.diff_ignore().contains(&"/subnet"));
    }
}
