use std::path::PathBuf;

use async_trait::async_trait;
use pgfleet_resource::{Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dir_full_path, dir_identifier, etcd_creds_identifier, patroni_cluster_prefix, read_text,
    write_private_files,
};
use crate::clients::ConsensusUser;
use crate::collaborators::{Collaborators, SwarmContext};

/// Consensus-store credentials of one instance's Patroni agent, written
/// under `{parent}/etcd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdCreds {
    pub instance_id: String,
    pub database_id: String,
    pub host_id: String,
    pub node_name: String,
    pub parent_id: String,
    #[serde(default)]
    pub owner_uid: u32,
    #[serde(default)]
    pub owner_gid: u32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub client_cert: String,
    #[serde(default)]
    pub client_key: String,
}

impl EtcdCreds {
    pub fn username_for(instance_id: &str) -> String {
        format!("instance.{}", instance_id)
    }

    fn etcd_dir(&self, rc: &SwarmContext) -> Result<PathBuf> {
        Ok(dir_full_path(rc, &self.parent_id)?.join("etcd"))
    }
}

#[async_trait]
impl Resource<Collaborators> for EtcdCreds {
    fn identifier(&self) -> Identifier {
        etcd_creds_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![dir_identifier(&self.parent_id)]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/username", "/password", "/ca_cert", "/client_cert", "/client_key"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let dir = self.etcd_dir(rc)?;

        self.ca_cert = read_text(fs, &dir.join("ca.crt")).await?;
        self.client_cert = read_text(fs, &dir.join("client.crt")).await?;
        self.client_key = read_text(fs, &dir.join("client.key")).await?;
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let collaborators = rc.collaborators();
        let fs = collaborators.filesystem()?;
        let certificates = collaborators.certificates()?;
        let consensus = collaborators.consensus()?;
        let dir = self.etcd_dir(rc)?;

        let username = Self::username_for(&self.instance_id);
        let password = if self.password.is_empty() {
            Uuid::new_v4().simple().to_string()
        } else {
            self.password.clone()
        };

        let pair = certificates.issue_user_cert(&username).await?;
        let ca = certificates.ca_bundle().await?;
        consensus
            .create_user(&ConsensusUser {
                username: username.clone(),
                password: password.clone(),
                key_prefix: patroni_cluster_prefix(&self.database_id, &self.node_name),
            })
            .await?;

        write_private_files(
            fs,
            &dir,
            &[
                ("ca.crt", ca.as_slice()),
                ("client.crt", pair.cert.as_slice()),
                ("client.key", pair.key.as_slice()),
            ],
            (self.owner_uid, self.owner_gid),
        )
        .await?;

        info!(instance = %self.instance_id, %username, "Created etcd credentials");
        self.username = username;
        self.password = password;
        self.ca_cert = String::from_utf8_lossy(&ca).into_owned();
        self.client_cert = String::from_utf8_lossy(&pair.cert).into_owned();
        self.client_key = String::from_utf8_lossy(&pair.key).into_owned();
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let collaborators = rc.collaborators();
        let fs = collaborators.filesystem()?;
        let dir = self.etcd_dir(rc)?;
        fs.remove_all(&dir).await?;

        let username = Self::username_for(&self.instance_id);
        if let Err(err) = collaborators.consensus()?.remove_user(&username).await {
            warn!(instance = %self.instance_id, %username, error = %err, "Failed to remove etcd user");
        }
        Ok(())
    }
}
