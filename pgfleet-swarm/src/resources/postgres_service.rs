use std::time::Duration;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    CheckWillRestart, PostgresServiceSpec, check_will_restart_identifier, instance_hostname,
    instance_selector, postgres_service_identifier, service_spec_identifier,
    switchover_identifier,
};
use crate::clients::ServiceSpec;
use crate::collaborators::{Collaborators, SwarmContext};

const SERVICE_START_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// The deployed container service of one instance.
///
/// `needs_update` is set on refresh when the live service has drifted from
/// the rendered spec, so the next plan updates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresService {
    pub instance_id: String,
    pub cohort_id: String,
    pub service_name: String,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub needs_update: bool,
}

impl PostgresService {
    pub fn new(instance_id: &str, cohort_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            cohort_id: cohort_id.to_string(),
            service_name: instance_hostname(instance_id),
            service_id: None,
            needs_update: false,
        }
    }

    fn desired_spec(&self, rc: &SwarmContext) -> Result<ServiceSpec> {
        let spec: PostgresServiceSpec = rc.get(&service_spec_identifier(&self.instance_id))?;
        spec.spec.ok_or_else(|| {
            Error::remote(format!("service spec of {} has not been rendered", self.instance_id))
        })
    }
}

fn needs_update(current: &ServiceSpec, desired: &ServiceSpec, will_restart: bool) -> bool {
    // Scaled down.
    if current.replicas != 1 {
        return true;
    }
    if will_restart {
        return true;
    }
    current.endpoint != desired.endpoint
        || current.name != desired.name
        || current.labels != desired.labels
}

#[async_trait]
impl Resource<Collaborators> for PostgresService {
    fn identifier(&self) -> Identifier {
        postgres_service_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Cohort(self.cohort_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![
            service_spec_identifier(&self.instance_id),
            switchover_identifier(&self.instance_id),
            check_will_restart_identifier(&self.instance_id),
        ]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/service_id"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let containers = rc.collaborators().containers()?;
        let desired = self.desired_spec(rc)?;
        let will_restart = match rc.get::<CheckWillRestart>(&check_will_restart_identifier(&self.instance_id)) {
            Ok(check) => check.will_restart,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };

        let live = containers
            .service_inspect_by_labels(&instance_selector(&self.instance_id))
            .await?;
        self.service_id = Some(live.id);
        self.needs_update = needs_update(&live.spec, &desired, will_restart);
        self.service_name = live.spec.name;
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let containers = rc.collaborators().containers()?;
        let spec = self.desired_spec(rc)?;

        let deployed = containers.service_deploy(&spec).await?;
        containers
            .wait_for_service(&deployed.service_id, SERVICE_START_TIMEOUT)
            .await?;

        info!(
            instance = %self.instance_id,
            service_id = %deployed.service_id,
            updated = deployed.previous.is_some(),
            "Deployed postgres service"
        );
        self.service_id = Some(deployed.service_id);
        self.service_name = spec.name;
        self.needs_update = false;
        Ok(())
    }

    async fn update(&mut self, rc: &SwarmContext) -> Result<()> {
        let containers = rc.collaborators().containers()?;
        match containers
            .service_inspect_by_labels(&instance_selector(&self.instance_id))
            .await
        {
            Ok(live) if live.spec.name != self.service_name => {
                info!(
                    instance = %self.instance_id,
                    from = %live.spec.name,
                    to = %self.service_name,
                    "Removing service for rename"
                );
                containers.service_remove(&live.spec.name).await?;
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        self.create(rc).await
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let containers = rc.collaborators().containers()?;
        // Stop the containers first so dependents removed afterwards are no
        // longer in use.
        match containers
            .service_scale(&self.service_name, 0, Some(SERVICE_STOP_TIMEOUT))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        containers.service_remove(&self.service_name).await?;
        Ok(())
    }
}
