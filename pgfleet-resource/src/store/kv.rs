//! Versioned key/value contract of the consensus store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::{Result, StoreError};

/// A stored value with the revision it was last written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Guard checked atomically with a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// The key must not exist yet.
    Absent,
    /// The key must still be at this revision.
    Revision(u64),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// All keys starting with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Write `value`, returning the new revision.
    async fn put(&self, key: &str, value: Vec<u8>, precondition: Precondition) -> Result<u64>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns the number of deleted keys.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, (Vec<u8>, u64)>,
    revision: u64,
}

/// In-memory store with a global revision counter, like etcd's.
#[derive(Default)]
pub struct MemoryKv {
    inner: RwLock<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.entries.keys().cloned().collect()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).map(|(value, revision)| KeyValue {
            key: key.to_string(),
            value: value.clone(),
            revision: *revision,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (value, revision))| KeyValue {
                key: k.clone(),
                value: value.clone(),
                revision: *revision,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>, precondition: Precondition) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let current = inner.entries.get(key).map(|(_, rev)| *rev);
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

        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(key.to_string(), (value, revision));
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.entries.remove(key).is_some();
        if existed {
            inner.revision += 1;
        }
        Ok(existed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let keys: Vec<String> = inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            inner.entries.remove(key);
        }
        if !keys.is_empty() {
            inner.revision += 1;
        }
        Ok(keys.len() as u64)
    }
}
