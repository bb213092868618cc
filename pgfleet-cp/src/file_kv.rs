//! Key/value store persisted as a single JSON file.
//!
//! Keeps the state store and the subnet allocators of a single control plane
//! across restarts. Every mutation rewrites the file through a temporary file
//! and a rename, so a crash leaves either the old or the new document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pgfleet_resource::store::Result;
use pgfleet_resource::{KeyValue, KvStore, Precondition, StoreError};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    revision: u64,
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Vec<u8>,
    revision: u64,
}

pub struct FileKv {
    path: PathBuf,
    document: Mutex<Document>,
}

impl FileKv {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Internal(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(io_error(&path, e)),
        };
        debug!(path = %path.display(), revision = document.revision, "Opened store");
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(document).map_err(|e| StoreError::Internal(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Internal(format!("{}: {}", path.display(), err))
}

fn to_key_value(key: &str, entry: &Entry) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: entry.value.clone(),
        revision: entry.revision,
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let document = self.document.lock().await;
        Ok(document.entries.get(key).map(|entry| to_key_value(key, entry)))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let document = self.document.lock().await;
        Ok(document
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, entry)| to_key_value(k, entry))
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>, precondition: Precondition) -> Result<u64> {
        let mut document = self.document.lock().await;
        let current = document.entries.get(key).map(|entry| entry.revision);
        match (precondition, current) {
            (Precondition::Absent, Some(_)) => {
                return Err(StoreError::Conflict(format!("{} already exists", key)));
            }
            (Precondition::Revision(expected), actual) if actual != Some(expected) => {
                return Err(StoreError::VersionMismatch {
                    expected,
                    actual: actual.unwrap_or(0),
                });
            }
            _ => {}
        }

        document.revision += 1;
        let revision = document.revision;
        document
            .entries
            .insert(key.to_string(), Entry { value, revision });
        self.persist(&document).await?;
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut document = self.document.lock().await;
        if document.entries.remove(key).is_none() {
            return Ok(false);
        }
        document.revision += 1;
        self.persist(&document).await?;
        Ok(true)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut document = self.document.lock().await;
        let before = document.entries.len();
        document.entries.retain(|k, _| !k.starts_with(prefix));
        let removed = (before - document.entries.len()) as u64;
        if removed > 0 {
            document.revision += 1;
            self.persist(&document).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let kv = FileKv::open(&path).await.unwrap();
        kv.put("/pgfleet/a", b"one".to_vec(), Precondition::Absent)
            .await
            .unwrap();
        let revision = kv
            .put("/pgfleet/b", b"two".to_vec(), Precondition::None)
            .await
            .unwrap();
        drop(kv);

        let kv = FileKv::open(&path).await.unwrap();
        let entry = kv.get("/pgfleet/b").await.unwrap().unwrap();
        assert_eq!(entry.value, b"two");
        assert_eq!(entry.revision, revision);
        assert_eq!(kv.get_prefix("/pgfleet/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKv::open(dir.path().join("store.json")).await.unwrap();

        let revision = kv.put("k", b"v".to_vec(), Precondition::None).await.unwrap();
        assert!(matches!(
            kv.put("k", b"v".to_vec(), Precondition::Absent).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            kv.put("k", b"v2".to_vec(), Precondition::Revision(revision + 5)).await,
            Err(StoreError::VersionMismatch { .. })
        ));
        assert!(
            kv.put("k", b"v2".to_vec(), Precondition::Revision(revision))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKv::open(dir.path().join("store.json")).await.unwrap();
        for key in ["/s/db-1/a", "/s/db-1/b", "/s/db-2/a"] {
            kv.put(key, Vec::new(), Precondition::None).await.unwrap();
        }

        assert_eq!(kv.delete_prefix("/s/db-1/").await.unwrap(), 2);
        assert_eq!(kv.delete_prefix("/s/db-1/").await.unwrap(), 0);
        assert!(kv.delete("/s/db-2/a").await.unwrap());
        assert!(!kv.delete("/s/db-2/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileKv::open(&path).await, Err(StoreError::Internal(_))));
    }
}
