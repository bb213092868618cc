//! Consensus store contract used by the HA coordinator's DCS.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

/// Credentials of a consensus-store user scoped to one key prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusUser {
    pub username: String,
    pub password: String,
    pub key_prefix: String,
}

#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> ClientResult<()>;

    async fn delete(&self, key: &str) -> ClientResult<bool>;

    /// Returns the number of deleted keys.
    async fn delete_prefix(&self, prefix: &str) -> ClientResult<u64>;

    /// Client URLs of every cluster member.
    async fn member_endpoints(&self) -> ClientResult<Vec<String>>;

    /// Create (or reset) a user with a role limited to `key_prefix`.
    async fn create_user(&self, user: &ConsensusUser) -> ClientResult<()>;

    /// Remove the user and its role. Succeeds when already gone.
    async fn remove_user(&self, username: &str) -> ClientResult<()>;
}
