use std::time::Duration;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_hostname, postgres_service_identifier, scale_service_identifier};
use crate::collaborators::{Collaborators, SwarmContext};

const SCALE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
}

impl ScaleDirection {
    fn replicas(self) -> u64 {
        match self {
            ScaleDirection::Up => 1,
            ScaleDirection::Down => 0,
        }
    }
}

/// One-shot scale of an instance's service, applied on every pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleService {
    pub instance_id: String,
    pub cohort_id: String,
    pub direction: ScaleDirection,
}

#[async_trait]
impl Resource<Collaborators> for ScaleService {
    fn identifier(&self) -> Identifier {
        scale_service_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Cohort(self.cohort_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![postgres_service_identifier(&self.instance_id)]
    }

    async fn refresh(&mut self, _rc: &SwarmContext) -> Result<()> {
        Err(Error::not_found(self.identifier()))
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let service = instance_hostname(&self.instance_id);
        rc.collaborators()
            .containers()?
            .service_scale(&service, self.direction.replicas(), Some(SCALE_TIMEOUT))
            .await?;
        info!(%service, direction = ?self.direction, "Scaled service");
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
    use crate::clients::container::ServiceSpec;
    use crate::resources::testing::Harness;

    #[tokio::test]
    async fn test_scale_down_and_up() {
        let harness = Harness::new();
        harness
            .containers
            .service_deploy(&ServiceSpec {
                name: "postgres-inst-1".into(),
                replicas: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let rc = harness.context(State::new());

        let mut scale = ScaleService {
            instance_id: "inst-1".into(),
            cohort_id: "swarm-1".into(),
            direction: ScaleDirection::Down,
        };
        assert!(scale.refresh(&rc).await.unwrap_err().is_not_found());

        scale.create(&rc).await.unwrap();
        assert_eq!(harness.containers.services().await[0].spec.replicas, 0);

        scale.direction = ScaleDirection::Up;
        scale.create(&rc).await.unwrap();
        assert_eq!(harness.containers.services().await[0].running_tasks, 1);
    }

    #[tokio::test]
    async fn test_missing_service() {
        let harness = Harness::new();
        let rc = harness.context(State::new());
        let mut scale = ScaleService {
            instance_id: "inst-1".into(),
            cohort_id: "swarm-1".into(),
            direction: ScaleDirection::Down,
        };
        assert!(scale.create(&rc).await.unwrap_err().is_not_found());
    }
}
