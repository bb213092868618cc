use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::service_spec::normalize_networks;
use super::{
    PostgresServiceSpec, check_will_restart_identifier, instance_selector,
    service_spec_identifier,
};
use crate::clients::container::normalize_task_defaults;
use crate::collaborators::{Collaborators, SwarmContext};

/// Records whether deploying the rendered spec would restart the instance's
/// running container. Evaluated whenever the spec changes and again on every
/// refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckWillRestart {
    pub instance_id: String,
    pub cohort_id: String,
    #[serde(default)]
    pub will_restart: bool,
}

impl CheckWillRestart {
    pub fn new(instance_id: &str, cohort_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            cohort_id: cohort_id.to_string(),
            will_restart: false,
        }
    }
}

#[async_trait]
impl Resource<Collaborators> for CheckWillRestart {
    fn identifier(&self) -> Identifier {
        check_will_restart_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Cohort(self.cohort_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![service_spec_identifier(&self.instance_id)]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/will_restart"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        // Once the spec is deployed the prediction no longer holds.
        self.evaluate(rc).await
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        self.evaluate(rc).await
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}

impl CheckWillRestart {
    /// Compare the rendered spec against the running service. Read-only.
    async fn evaluate(&mut self, rc: &SwarmContext) -> Result<()> {
        let containers = rc.collaborators().containers()?;
        let desired: PostgresServiceSpec = rc.get(&service_spec_identifier(&self.instance_id))?;
        let desired = desired.spec.ok_or_else(|| {
            Error::remote(format!("service spec of {} has not been rendered", self.instance_id))
        })?;

        let current = match containers
            .service_inspect_by_labels(&instance_selector(&self.instance_id))
            .await
        {
            Ok(service) => service,
            Err(err) if err.is_not_found() => {
                self.will_restart = false;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let current = normalize_networks(containers, normalize_task_defaults(current.spec.task_template)).await?;
        let desired = normalize_networks(containers, normalize_task_defaults(desired.task_template)).await?;

        self.will_restart = current != desired;
        debug!(
            instance = %self.instance_id,
            will_restart = self.will_restart,
            "Compared task templates"
        );
        Ok(())
    }
}
