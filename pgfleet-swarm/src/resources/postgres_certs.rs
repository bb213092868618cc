use std::path::PathBuf;

use async_trait::async_trait;
use pgfleet_resource::{Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    REPLICATION_USER, SUPERUSER, dir_full_path, dir_identifier, network_name,
    postgres_certs_identifier, read_text, write_private_files,
};
use crate::collaborators::{Collaborators, SwarmContext};

const FILES: [&str; 7] = [
    "ca.crt",
    "server.crt",
    "server.key",
    "superuser.crt",
    "superuser.key",
    "replication.crt",
    "replication.key",
];

/// TLS material for Postgres, written under `{parent}/postgres`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresCerts {
    pub instance_id: String,
    pub database_id: String,
    pub host_id: String,
    pub instance_hostname: String,
    pub parent_id: String,
    #[serde(default)]
    pub owner_uid: u32,
    #[serde(default)]
    pub owner_gid: u32,
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub server_cert: String,
    #[serde(default)]
    pub server_key: String,
    #[serde(default)]
    pub superuser_cert: String,
    #[serde(default)]
    pub superuser_key: String,
    #[serde(default)]
    pub replication_cert: String,
    #[serde(default)]
    pub replication_key: String,
}

impl PostgresCerts {
    fn postgres_dir(&self, rc: &SwarmContext) -> Result<PathBuf> {
        Ok(dir_full_path(rc, &self.parent_id)?.join("postgres"))
    }

    fn fields_mut(&mut self) -> [&mut String; 7] {
        [
            &mut self.ca_cert,
            &mut self.server_cert,
            &mut self.server_key,
            &mut self.superuser_cert,
            &mut self.superuser_key,
            &mut self.replication_cert,
            &mut self.replication_key,
        ]
    }
}

#[async_trait]
impl Resource<Collaborators> for PostgresCerts {
    fn identifier(&self) -> Identifier {
        postgres_certs_identifier(&self.instance_id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        vec![dir_identifier(&self.parent_id)]
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &[
            "/ca_cert",
            "/server_cert",
            "/server_key",
            "/superuser_cert",
            "/superuser_key",
            "/replication_cert",
            "/replication_key",
        ]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let dir = self.postgres_dir(rc)?;

        let mut contents = Vec::with_capacity(FILES.len());
        for name in FILES {
            contents.push(read_text(fs, &dir.join(name)).await?);
        }
        for (field, value) in self.fields_mut().into_iter().zip(contents) {
            *field = value;
        }
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let collaborators = rc.collaborators();
        let fs = collaborators.filesystem()?;
        let certificates = collaborators.certificates()?;
        let dir = self.postgres_dir(rc)?;

        let hostnames = vec![
            self.instance_hostname.clone(),
            format!("{}.{}", self.instance_hostname, network_name(&self.database_id)),
            "localhost".to_string(),
        ];
        let ca = certificates.ca_bundle().await?;
        let server = certificates
            .issue_server_cert(&self.instance_hostname, &hostnames)
            .await?;
        let superuser = certificates.issue_user_cert(SUPERUSER).await?;
        let replication = certificates.issue_user_cert(REPLICATION_USER).await?;

        let contents: [&[u8]; 7] = [
            &ca,
            &server.cert,
            &server.key,
            &superuser.cert,
            &superuser.key,
            &replication.cert,
            &replication.key,
        ];
        let files: Vec<(&str, &[u8])> = FILES.iter().copied().zip(contents).collect();
        write_private_files(fs, &dir, &files, (self.owner_uid, self.owner_gid)).await?;

        let values: Vec<String> = contents
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        for (field, value) in self.fields_mut().into_iter().zip(values) {
            *field = value;
        }

        info!(instance = %self.instance_id, "Created postgres certificates");
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        fs.remove_all(&self.postgres_dir(rc)?).await?;
        Ok(())
    }
}
