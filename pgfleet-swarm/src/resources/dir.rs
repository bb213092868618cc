use std::path::PathBuf;

use async_trait::async_trait;
use pgfleet_resource::{Error, Executor, Identifier, Resource, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{DIR, dir_identifier};
use crate::collaborators::{Collaborators, SwarmContext};

const DIR_MODE: u32 = 0o700;

/// A directory on one host, relative to its parent or the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dir {
    pub id: String,
    pub host_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub owner_uid: u32,
    #[serde(default)]
    pub owner_gid: u32,
    #[serde(default)]
    pub full_path: Option<PathBuf>,
}

impl Dir {
    pub fn new(id: &str, host_id: &str, parent_id: Option<&str>, path: &str) -> Self {
        Self {
            id: id.to_string(),
            host_id: host_id.to_string(),
            parent_id: parent_id.map(String::from),
            path: path.to_string(),
            owner_uid: 0,
            owner_gid: 0,
            full_path: None,
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner_uid = uid;
        self.owner_gid = gid;
        self
    }

    pub(crate) fn resolve_path(&self, rc: &SwarmContext) -> Result<PathBuf> {
        let base = match &self.parent_id {
            Some(parent_id) => super::dir_full_path(rc, parent_id)?,
            None => rc.collaborators().data_dir().to_path_buf(),
        };
        Ok(base.join(&self.path))
    }
}

#[async_trait]
impl Resource<Collaborators> for Dir {
    fn identifier(&self) -> Identifier {
        dir_identifier(&self.id)
    }

    fn executor(&self) -> Executor {
        Executor::Host(self.host_id.clone())
    }

    fn dependencies(&self) -> Vec<Identifier> {
        self.parent_id.iter().map(|id| dir_identifier(id)).collect()
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/full_path"]
    }

    async fn refresh(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let path = self.resolve_path(rc)?;
        if !fs.exists(&path).await? {
            return Err(Error::not_found(path.display()));
        }
        self.full_path = Some(path);
        Ok(())
    }

    async fn create(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let path = self.resolve_path(rc)?;

        fs.create_dir_all(&path, DIR_MODE).await?;
        if self.owner_uid != 0 || self.owner_gid != 0 {
            fs.chown_recursive(&path, self.owner_uid, self.owner_gid).await?;
        }

        info!(dir = %self.id, path = %path.display(), "Created directory");
        self.full_path = Some(path);
        Ok(())
    }

    async fn delete(&mut self, rc: &SwarmContext) -> Result<()> {
        let fs = rc.collaborators().filesystem()?;
        let path = self.resolve_path(rc)?;
        fs.remove_all(&path).await?;
        info!(dir = %self.id, path = %path.display(), "Removed directory");
        Ok(())
    }
}
