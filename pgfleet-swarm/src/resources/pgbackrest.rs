use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    CONTAINER_ROOT, Node, SUPERUSER, dir_full_path, dir_identifier, instance_hostname,
    node_identifier, pgbackrest_backup_identifier, pgbackrest_config_identifier,
    pgbackrest_stanza_identifier, read_text,
};
use crate::collaborators::{Collaborators, SwarmContext};
use crate::spec::{BACKUP_REPO_MOUNT, InstanceConfig};

pub const PGBACKREST_CONFIG_FILE: &str = "pgbackrest.conf";

/// `pgbackrest` invocation against the rendered config, as an argv.
pub fn pgbackrest_command(stanza: &str, args: &[&str]) -> Vec<String> {
    let mut command = vec![
        "pgbackrest".to_string(),
        "--config".to_string(),
        format!("{}/configs/{}", CONTAINER_ROOT, PGBACKREST_CONFIG_FILE),
        "--stanza".to_string(),
        stanza.to_string(),
    ];
    command.extend(args.iter().map(|arg| arg.to_string()));
    command
}

/// Render the pgBackRest config of an instance. Empty when backups are off.
pub fn render_pgbackrest_config(config: &InstanceConfig) -> String {
    let Some(backup) = &config.backup else {
        return String::new();
    };
    let stanza = config.stanza();
    let mut out = String::new();
    let _ = writeln!(out, "[global]");
    let _ = writeln!(out, "repo1-path={}/{}", BACKUP_REPO_MOUNT, stanza);
    let _ = writeln!(out, "repo1-retention-full={}", backup.retention_full);
    let _ = writeln!(out, "log-level-console=info");
    let _ = writeln!(out, "start-fast=y");
    let _ = writeln!(out);
    let _ = writeln!(out, "[{}]", stanza);
    let _ = writeln!(out, "pg1-path={}/data/pgdata", CONTAINER_ROOT);
    let _ = writeln!(out, "pg1-port={}", config.port);
    let _ = writeln!(out, "pg1-user={}", SUPERUSER);
    out
}

/// The pgBackRest config file of an instance, written into its configs dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgBackRestConfig {
    pub config: InstanceConfig,
    pub parent_id: String,
}

impl PgBackRestConfig {
    fn path(&self, rc: &SwarmContext) -> Result<PathBuf> {
        Ok(dir_full_path(rc, &self.parent_id)?.join(PGBACKREST_CONFIG_FILE))
    }
}

#[async_trait]
impl Resource<Collaborators> for PgBackRestConfig {
    fn identifier(&self) -> Identifier {
        pgbackrest_config_identifier(&self.config.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.config.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![dir_identifier(&self.parent_id)]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        read_text(fs, &self.path(rc)?).await?;
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let path = self.path(rc)?;
        fs.write_file(&path, render_pgbackrest_config(&self.config).as_bytes(), 0o600)
            .await?;
        if self.config.owner_uid != 0 || self.config.owner_gid != 0 {
            fs.chown_recursive(&path, self.config.owner_uid, self.config.owner_gid)
                .await?;
        }
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

/// The backup stanza of a node, created from its primary.
///
/// Deleting is a no-op: dropping the stanza would delete every backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgBackRestStanza {
    pub database_id: String,
    pub node_name: String,
}

impl PgBackRestStanza {
    pub fn stanza(&self) -> String {
        format!("{}-{}", self.database_id, self.node_name)
    }
}

/// Service name of the node's current primary.
fn primary_service(rc: &SwarmContext, node_name: &str) -> Result<String> {
    let node: Node = rc.get(&node_identifier(node_name))?;
    let primary = node
        .primary_instance_id
        .ok_or_else(|| Error::remote(format!("node {} has no primary instance", node_name)))?;
    Ok(instance_hostname(&primary))
}

async fn exec(rc: &SwarmContext, service: &str, stanza: &str, args: &[&str]) -> Result<()> {
    let command = pgbackrest_command(stanza, args);
    let output = rc
        .collaborators()
        .containers()?
        .container_exec(service, &command)
        .await?;
    if output.exit_code != 0 {
        return Err(Error::remote(format!(
            "{} exited with code {}: {}",
            command.join(" "),
            output.exit_code,
            output.output
        )));
    }
    Ok(())
}

#[async_trait]
impl Resource<Collaborators> for PgBackRestStanza {
    fn identifier(&self) -> Identifier {
        pgbackrest_stanza_identifier(&self.node_name)
    }

    fn executor(&self) -> Executor {
        Executor::Node(self.node_name.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![node_identifier(&self.node_name)]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let service = match primary_service(rc, &self.node_name) {
            Ok(service) => service,
            Err(_) => return Err(Error::not_found(self.identifier())),
        };
        match exec(rc, &service, &self.stanza(), &["info"]).await {
            Err(Error::Remote(message)) if message.contains("exited with code") => {
                Err(Error::not_found(self.identifier()))
            }
            other => other,
        }
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let service = primary_service(rc, &self.node_name)?;
        let stanza = self.stanza();
        exec(rc, &service, &stanza, &["stanza-create", "--io-timeout=10s"]).await?;
        exec(rc, &service, &stanza, &["check"]).await?;
        info!(%stanza, %service, "Created pgbackrest stanza");
        Ok(())
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    Diff,
    Incr,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Diff => "diff",
            BackupType::Incr => "incr",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "diff" => Ok(BackupType::Diff),
            "incr" => Ok(BackupType::Incr),
            other => Err(format!("unknown backup type {:?} (expected full, diff or incr)", other)),
        }
    }
}

/// One backup of a node, taken in its primary's container.
///
/// An operation rather than a managed object: it is dispatched once and
/// never recorded, so refresh always reports it gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgBackRestBackup {
    pub database_id: String,
    pub node_name: String,
    #[serde(default)]
    pub backup_type: BackupType,
}

impl PgBackRestBackup {
    pub fn new(database_id: &str, node_name: &str, backup_type: BackupType) -> Self {
        Self {
            database_id: database_id.to_string(),
            node_name: node_name.to_string(),
            backup_type,
        }
    }

    fn stanza(&self) -> String {
        format!("{}-{}", self.database_id, self.node_name)
    }
}

#[async_trait]
impl Resource<Collaborators> for PgBackRestBackup {
    fn identifier(&self) -> Identifier {
        pgbackrest_backup_identifier(&self.node_name)
    }

    fn executor(&self) -> Executor {
        Executor::Node(self.node_name.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![
            node_identifier(&self.node_name),
            pgbackrest_stanza_identifier(&self.node_name),
        ]
    }

    async fn refresh(&mut self, _rc: &SwarmContext) -> Result<()> {
        Err(Error::not_found(self.identifier()))
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let service = primary_service(rc, &self.node_name)?;
        let backup_type = format!("--type={}", self.backup_type);
        exec(rc, &service, &self.stanza(), &["backup", &backup_type]).await?;
        info!(stanza = %self.stanza(), %service, backup_type = %self.backup_type, "Created pgbackrest backup");
        Ok(())
    }

    async fn delete(&mut self, _rc: &SwarmContext) -> Result<()> {
        Ok(())
    }
}
