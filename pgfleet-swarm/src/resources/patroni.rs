use std::path::PathBuf;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{
    CONTAINER_ROOT, EtcdCreds, Network, PATRONI_NAMESPACE, REPLICATION_USER, SUPERUSER,
    dir_full_path, dir_identifier, etcd_creds_identifier, instance_hostname, network_identifier,
    network_name, patroni_cluster_identifier, patroni_cluster_prefix, patroni_config_identifier,
    patroni_member_identifier, patroni_member_key, patroni_scope, pgbackrest_config_identifier,
};
use crate::clients::patroni::PATRONI_PORT;
use crate::collaborators::{Collaborators, SwarmContext};
use crate::spec::InstanceConfig;

pub const PATRONI_CONFIG_FILE: &str = "patroni.yaml";

/// Parameters Patroni only accepts through the DCS.
const DCS_PARAMETERS: [&str; 10] = [
    "max_connections",
    "max_locks_per_transaction",
    "max_worker_processes",
    "max_prepared_transactions",
    "wal_level",
    "track_commit_timestamp",
    "max_wal_senders",
    "max_replication_slots",
    "wal_keep_size",
    "wal_log_hints",
];

// ============================================================================
// Cluster
// ============================================================================

/// The DCS namespace of one node's Patroni cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatroniCluster {
    pub cluster_id: String,
    pub database_id: String,
    pub node_name: String,
}

#[async_trait]
impl Resource<Collaborators> for PatroniCluster {
    fn identifier(&self) -> Identifier {
        patroni_cluster_identifier(&self.node_name)
    }

    fn executor(&self) -> Executor {
        Executor::Cluster(self.cluster_id.clone())
    }

    async fn refresh(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }

    async fn create(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let prefix = patroni_cluster_prefix(&self.database_id, &self.node_name);
        let removed = rc.collaborators().consensus()?.delete_prefix(&prefix).await?;
        info!(%prefix, removed, "Cleared patroni cluster namespace");
        Ok(())
    }
}

// ============================================================================
// Member
// ============================================================================

/// One instance's membership key in its Patroni cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatroniMember {
    pub cluster_id: String,
    pub database_id: String,
    pub node_name: String,
    pub instance_id: String,
}

#[async_trait]
impl Resource<Collaborators> for PatroniMember {
    fn identifier(&self) -> Identifier {
        patroni_member_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Cluster(self.cluster_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![patroni_cluster_identifier(&self.node_name)]
    }

    async fn refresh(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }

    async fn create(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        // The cluster's own delete clears everything beneath it.
        if !rc.state().contains(&patroni_cluster_identifier(&self.node_name)) {
            return Ok(());
        }
        let key = patroni_member_key(&self.database_id, &self.node_name, &self.instance_id);
        if let Err(err) = rc.collaborators().consensus()?.delete(&key).await {
            warn!(%key, error = %err, "Failed to remove patroni member");
        }
        Ok(())
    }
}

// ============================================================================
// Config
// ============================================================================

/// `patroni.yaml` of one instance, in its configs directory.
///
/// The file is JSON, which Patroni reads as YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatroniConfig {
    pub config: InstanceConfig,
    /// Configs directory.
    pub parent_id: String,
}

impl PatroniConfig {
    fn path(&self, rc: &SwarmContext) -> Result<PathBuf> {
        Ok(dir_full_path(rc, &self.parent_id)?.join(PATRONI_CONFIG_FILE))
    }
}

#[async_trait]
impl Resource<Collaborators> for PatroniConfig {
    fn identifier(&self) -> Identifier {
        patroni_config_identifier(&self.config.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.config.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        let mut deps = vec![
            dir_identifier(&self.parent_id),
            network_identifier(&self.config.database_id),
            etcd_creds_identifier(&self.config.instance_id),
            patroni_member_identifier(&self.config.instance_id),
            patroni_cluster_identifier(&self.config.node_name),
        ];
        if self.config.backup.is_some() {
            deps.push(pgbackrest_config_identifier(&self.config.instance_id));
        }
        deps
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let path = self.path(rc)?;
        let contents = fs.read_file(&path).await?;
        serde_yaml::from_slice::<Value>(&contents)
            .map_err(|e| Error::remote(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let collaborators = rc.collaborators();
        let fs = collaborators.filesystem()?;
        let path = self.path(rc)?;

        let network: Network = rc.get(&network_identifier(&self.config.database_id))?;
        let creds: EtcdCreds = rc.get(&etcd_creds_identifier(&self.config.instance_id))?;
        let endpoints = collaborators.consensus()?.member_endpoints().await?;

        let rendered = render_patroni_config(&self.config, &network, &creds, &endpoints)?;
        let contents = serde_yaml::to_string(&rendered)
            .map_err(|e| Error::remote(format!("rendering {}: {}", path.display(), e)))?;
        fs.write_file(&path, contents.as_bytes(), 0o600).await?;
        if self.config.owner_uid != 0 || self.config.owner_gid != 0 {
            fs.chown_recursive(&path, self.config.owner_uid, self.config.owner_gid)
                .await?;
        }

        debug!(instance = %self.config.instance_id, path = %path.display(), "Wrote patroni config");
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        match fs.remove_file(&self.path(rc)?).await {
            Err(err) if !err.is_not_found() => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// `host:port` of an endpoint URL.
fn endpoint_host(endpoint: &str) -> Result<String> {
    let rest = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::remote(format!("invalid etcd endpoint {:?}", endpoint)))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::remote(format!("invalid etcd endpoint {:?}", endpoint)));
    }
    Ok(host.to_string())
}

/// Postgres parameters before the DCS-controlled ones are split off.
fn postgres_parameters(config: &InstanceConfig) -> Map<String, Value> {
    let certs = format!("{}/certificates/postgres", CONTAINER_ROOT);
    let mut parameters = Map::new();
    let mut set = |key: &str, value: Value| {
        parameters.insert(key.to_string(), value);
    };

    set("max_connections", json!(100));
    set("max_worker_processes", json!(12));
    set("max_wal_senders", json!(16));
    set("max_replication_slots", json!(16));
    set("wal_level", json!("logical"));
    set("wal_log_hints", json!("on"));
    set("track_commit_timestamp", json!("on"));
    set("hot_standby", json!("on"));
    set("port", json!(config.port));
    set("ssl", json!("on"));
    set("ssl_ca_file", json!(format!("{}/ca.crt", certs)));
    set("ssl_cert_file", json!(format!("{}/server.crt", certs)));
    set("ssl_key_file", json!(format!("{}/server.key", certs)));

    if let Some(memory) = config.memory_bytes {
        set("shared_buffers", json!(format!("{}kB", memory / 4 / 1024)));
        set("effective_cache_size", json!(format!("{}kB", memory / 4 * 3 / 1024)));
    }
    if let Some(cpus) = config.cpus {
        let workers = (cpus.ceil() as u64).max(1);
        set("max_parallel_workers", json!(workers));
    }
    if config.backup.is_some() {
        // Only the primary archives, so this is safe on every member.
        set("archive_mode", json!("on"));
        set(
            "archive_command",
            json!(format!(
                "pgbackrest --config {}/configs/pgbackrest.conf --stanza {} archive-push \"%p\"",
                CONTAINER_ROOT,
                config.stanza()
            )),
        );
    }

    for (key, value) in &config.postgresql_conf {
        parameters.insert(key.clone(), value.clone());
    }
    parameters
}

/// Render the agent configuration of one instance.
pub fn render_patroni_config(
    config: &InstanceConfig,
    network: &Network,
    creds: &EtcdCreds,
    etcd_endpoints: &[String],
) -> Result<Value> {
    let subnet = network
        .subnet
        .ok_or_else(|| Error::remote(format!("network {} has no subnet", network.name)))?;
    let hosts = etcd_endpoints
        .iter()
        .map(|e| endpoint_host(e))
        .collect::<Result<Vec<_>>>()?;

    let mut parameters = postgres_parameters(config);
    let mut dcs_parameters = Map::new();
    for key in DCS_PARAMETERS {
        if let Some(value) = parameters.remove(key) {
            dcs_parameters.insert(key.to_string(), value);
        }
    }

    let hostname = instance_hostname(&config.instance_id);
    let certs = format!("{}/certificates", CONTAINER_ROOT);
    let user = |name: &str, file: &str| {
        json!({
            "username": name,
            "sslmode": "verify-full",
            "sslrootcert": format!("{}/postgres/ca.crt", certs),
            "sslcert": format!("{}/postgres/{}.crt", certs, file),
            "sslkey": format!("{}/postgres/{}.key", certs, file),
        })
    };

    Ok(json!({
        "name": config.instance_id,
        "namespace": PATRONI_NAMESPACE,
        "scope": patroni_scope(&config.database_id, &config.node_name),
        "log": {
            "type": "json",
            "level": "INFO",
            "static_fields": {
                "database_id": config.database_id,
                "instance_id": config.instance_id,
                "node_name": config.node_name,
            },
        },
        "bootstrap": {
            "dcs": {
                "ttl": 30,
                "loop_wait": 10,
                "retry_timeout": 10,
                "postgresql": {"parameters": dcs_parameters},
            },
        },
        "etcd3": {
            "hosts": hosts,
            "protocol": "https",
            "cacert": format!("{}/etcd/ca.crt", certs),
            "cert": format!("{}/etcd/client.crt", certs),
            "key": format!("{}/etcd/client.key", certs),
            "username": creds.username,
            "password": creds.password,
        },
        "restapi": {
            "listen": format!("0.0.0.0:{}", PATRONI_PORT),
            "connect_address": format!("{}.{}:{}", hostname, network_name(&config.database_id), PATRONI_PORT),
            "allowlist": [subnet.to_string(), "127.0.0.1", "localhost"],
        },
        "watchdog": {"mode": "off"},
        "postgresql": {
            "connect_address": format!("{}:{}", hostname, config.port),
            "listen": format!("*:{}", config.port),
            "data_dir": format!("{}/data/pgdata", CONTAINER_ROOT),
            "parameters": parameters,
            "authentication": {
                "superuser": user(SUPERUSER, "superuser"),
                "replication": user(REPLICATION_USER, "replication"),
            },
            "pg_hba": [
                "local all all trust",
                format!("hostssl all {} all cert", SUPERUSER),
                format!("hostssl replication {} {} cert", REPLICATION_USER, subnet),
                "hostssl all all all scram-sha-256",
            ],
        },
    }))
}
