use std::path::Path;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};

use super::{
    CONTAINER_ROOT, Network, dir_full_path, dir_identifier, etcd_creds_identifier,
    instance_hostname, instance_selector, network_identifier, patroni_config_identifier,
    postgres_certs_identifier, service_labels, service_spec_identifier,
};
use crate::clients::{
    ContainerClient, ContainerSpec, EndpointSpec, Mount, NetworkAttachment, PortConfig,
    ServiceSpec, TaskSpec,
};
use crate::collaborators::{Collaborators, SwarmContext};
use crate::spec::{BACKUP_REPO_MOUNT, InstanceConfig};

pub const BRIDGE_NETWORK: &str = "bridge";

/// The rendered service definition of one instance.
///
/// Nothing is deployed here; Create renders the spec and Refresh reads back
/// the live one. The postgres service deploys whatever this holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresServiceSpec {
    pub config: InstanceConfig,
    pub data_dir_id: String,
    pub configs_dir_id: String,
    pub certs_dir_id: String,
    #[serde(default)]
    pub spec: Option<ServiceSpec>,
}

pub struct ServicePaths<'a> {
    pub data: &'a Path,
    pub configs: &'a Path,
    pub certificates: &'a Path,
}

/// Service definition of an instance attached to `network_id`.
pub fn render_service_spec(config: &InstanceConfig, network_id: &str, paths: &ServicePaths<'_>) -> ServiceSpec {
    let hostname = instance_hostname(&config.instance_id);
    let labels = service_labels(&config.database_id, &config.node_name, &config.instance_id);
    let config_file = format!("{}/configs/patroni.yaml", CONTAINER_ROOT);

    let mount = |source: &Path, target: &str| Mount {
        source: source.display().to_string(),
        target: format!("{}/{}", CONTAINER_ROOT, target),
        read_only: false,
    };
    let mut mounts = vec![
        mount(paths.data, "data"),
        mount(paths.configs, "configs"),
        mount(paths.certificates, "certificates"),
    ];
    if let Some(backup) = &config.backup {
        mounts.push(Mount {
            source: backup.repo_path.clone(),
            target: BACKUP_REPO_MOUNT.to_string(),
            read_only: false,
        });
    }

    let user = (config.owner_uid != 0 || config.owner_gid != 0)
        .then(|| format!("{}:{}", config.owner_uid, config.owner_gid));

    ServiceSpec {
        name: hostname.clone(),
        labels: labels.clone(),
        task_template: TaskSpec {
            container: ContainerSpec {
                image: config.image.clone(),
                hostname: hostname.clone(),
                labels,
                env: vec![format!("PATRONI_CONFIG_FILE={}", config_file)],
                command: vec!["patroni".to_string(), config_file],
                user,
                mounts,
                ..Default::default()
            },
            networks: vec![
                NetworkAttachment {
                    target: BRIDGE_NETWORK.to_string(),
                    aliases: Vec::new(),
                },
                NetworkAttachment {
                    target: network_id.to_string(),
                    aliases: vec![hostname],
                },
            ],
            placement: vec![format!("node.id=={}", config.host_id)],
            runtime: String::new(),
        },
        replicas: 1,
        endpoint: EndpointSpec {
            ports: vec![PortConfig {
                target_port: config.port,
                published_port: None,
            }],
        },
    }
}

/// Rewrite the bridge network's ID to its name, the form specs are rendered in.
pub(crate) async fn normalize_networks(
    containers: &dyn ContainerClient,
    mut task: TaskSpec,
) -> Result<TaskSpec> {
    for attachment in &mut task.networks {
        let network = containers.network_inspect(&attachment.target).await?;
        if network.name == BRIDGE_NETWORK {
            attachment.target = BRIDGE_NETWORK.to_string();
        }
    }
    Ok(task)
}

#[async_trait]
impl Resource<Collaborators> for PostgresServiceSpec {
    fn identifier(&self) -> Identifier {
        service_spec_identifier(&self.config.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.config.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![
            dir_identifier(&self.data_dir_id),
            dir_identifier(&self.configs_dir_id),
            dir_identifier(&self.certs_dir_id),
            network_identifier(&self.config.database_id),
            etcd_creds_identifier(&self.config.instance_id),
            postgres_certs_identifier(&self.config.instance_id),
            patroni_config_identifier(&self.config.instance_id),
        ]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/spec"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let mut service = rc
            .collaborators()
            .containers()?
            .service_inspect_by_labels(&instance_selector(&self.config.instance_id))
            .await?;
        // Scale is owned by the service resources, not the rendered spec.
        service.spec.replicas = 1;
        self.spec = Some(service.spec);
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let network: Network = rc.get(&network_identifier(&self.config.database_id))?;
        let network_id = network
            .network_id
            .ok_or_else(|| Error::remote(format!("network {} has not been created", network.name)))?;

        let data = dir_full_path(rc, &self.data_dir_id)?;
        let configs = dir_full_path(rc, &self.configs_dir_id)?;
        let certificates = dir_full_path(rc, &self.certs_dir_id)?;
        let paths = ServicePaths {
            data: &data,
            configs: &configs,
            certificates: &certificates,
        };

        self.spec = Some(render_service_spec(&self.config, &network_id, &paths));
        Ok(())
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}
