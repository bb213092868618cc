//! Database specification, as submitted by users.

use std::collections::{BTreeMap, HashSet};

use pgfleet_resource::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Mount point of the repository inside the container.
pub const BACKUP_REPO_MOUNT: &str = "/backups";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub database_id: String,
    /// Container cohort (swarm) the instances run in.
    pub cohort_id: String,
    pub cluster_id: String,
    /// Owner of the on-disk directories; 0 leaves ownership untouched.
    #[serde(default)]
    pub owner_uid: u32,
    #[serde(default)]
    pub owner_gid: u32,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub backup: Option<BackupConfig>,
    /// Extra `postgresql.conf` parameters.
    #[serde(default)]
    pub postgresql_conf: BTreeMap<String, Value>,
}

/// One replicated Postgres cluster: a primary and its replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub instances: Vec<InstanceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_id: String,
    pub host_id: String,
    pub postgres_image: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
}

fn default_port() -> u16 {
    DEFAULT_POSTGRES_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Repository directory on the host.
    pub repo_path: String,
    #[serde(default = "default_retention")]
    pub retention_full: u32,
}

fn default_retention() -> u32 {
    2
}

/// Everything the per-instance resources need, resolved from the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub database_id: String,
    pub node_name: String,
    pub instance_id: String,
    pub host_id: String,
    pub cohort_id: String,
    pub cluster_id: String,
    pub image: String,
    pub port: u16,
    pub owner_uid: u32,
    pub owner_gid: u32,
    /// Position of the node in the database, starting at 1.
    pub node_ordinal: usize,
    /// Instances in this instance's node.
    pub cluster_size: usize,
    #[serde(default)]
    pub backup: Option<BackupConfig>,
    #[serde(default)]
    pub postgresql_conf: BTreeMap<String, Value>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
}

impl DatabaseSpec {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check the spec, collecting every problem.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.database_id.is_empty() {
            errors.push("database_id must not be empty".to_string());
        }
        if self.cohort_id.is_empty() {
            errors.push("cohort_id must not be empty".to_string());
        }
        if self.nodes.is_empty() {
            errors.push("database must have at least one node".to_string());
        }

        let mut node_names = HashSet::new();
        let mut instance_ids = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                errors.push("node name must not be empty".to_string());
            } else if !node_names.insert(node.name.as_str()) {
                errors.push(format!("duplicate node name {}", node.name));
            }
            if node.instances.is_empty() {
                errors.push(format!("node {} must have at least one instance", node.name));
            }
            for instance in &node.instances {
                if instance.instance_id.is_empty() {
                    errors.push(format!("node {}: instance_id must not be empty", node.name));
                } else if !instance_ids.insert(instance.instance_id.as_str()) {
                    errors.push(format!("duplicate instance id {}", instance.instance_id));
                }
                if instance.host_id.is_empty() {
                    errors.push(format!("instance {}: host_id must not be empty", instance.instance_id));
                }
                if instance.postgres_image.is_empty() {
                    errors.push(format!(
                        "instance {}: postgres_image must not be empty",
                        instance.instance_id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Resolved configuration of every instance, in spec order.
    pub fn instances(&self) -> Vec<InstanceConfig> {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(idx, node)| {
                node.instances.iter().map(move |instance| InstanceConfig {
                    database_id: self.database_id.clone(),
                    node_name: node.name.clone(),
                    instance_id: instance.instance_id.clone(),
                    host_id: instance.host_id.clone(),
                    cohort_id: self.cohort_id.clone(),
                    cluster_id: self.cluster_id.clone(),
                    image: instance.postgres_image.clone(),
                    port: instance.port,
                    owner_uid: self.owner_uid,
                    owner_gid: self.owner_gid,
                    node_ordinal: idx + 1,
                    cluster_size: node.instances.len(),
                    backup: self.backup.clone(),
                    postgresql_conf: self.postgresql_conf.clone(),
                    memory_bytes: instance.memory_bytes,
                    cpus: instance.cpus,
                })
            })
            .collect()
    }
}

impl InstanceConfig {
    /// Backup stanza name for this instance's node.
    pub fn stanza(&self) -> String {
        format!("{}-{}", self.database_id, self.node_name)
    }
}
