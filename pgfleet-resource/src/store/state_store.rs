//! Per-scope resource state persistence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StoreError;
use super::kv::{KvStore, Precondition};
use crate::error::Result;
use crate::identifier::Identifier;
use crate::resource::ResourceData;
use crate::state::State;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredResource {
    version: u32,
    resource: ResourceData,
}

/// One document per resource record, grouped under a scope prefix.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
    root: String,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>, root: &str) -> Self {
        Self {
            kv,
            root: super::root_prefix(root),
        }
    }

    fn scope_prefix(&self, scope: &str) -> String {
        format!("{}/resource_state/{}/", self.root, scope)
    }

    fn key(&self, scope: &str, identifier: &Identifier) -> String {
        format!(
            "{}{}/{}",
            self.scope_prefix(scope),
            identifier.resource_type,
            identifier.id
        )
    }

    pub async fn load(&self, scope: &str) -> Result<State> {
        let mut state = State::new();
        for entry in self.kv.get_prefix(&self.scope_prefix(scope)).await? {
            let stored: StoredResource = serde_json::from_slice(&entry.value)?;
            if stored.version != DOCUMENT_VERSION {
                return Err(StoreError::Internal(format!(
                    "unsupported resource document version {} at {}",
                    stored.version, entry.key
                ))
                .into());
            }
            state.add(stored.resource);
        }
        debug!(scope, resources = state.len(), "Loaded resource state");
        Ok(state)
    }

    pub async fn put(&self, scope: &str, data: &ResourceData) -> Result<()> {
        let document = StoredResource {
            version: DOCUMENT_VERSION,
            resource: data.clone(),
        };
        let value = serde_json::to_vec(&document)?;
        self.kv
            .put(&self.key(scope, &data.identifier), value, Precondition::None)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, scope: &str, identifier: &Identifier) -> Result<()> {
        self.kv.delete(&self.key(scope, identifier)).await?;
        Ok(())
    }

    /// Drop every record of a scope. Returns the number of removed records.
    pub async fn delete_scope(&self, scope: &str) -> Result<u64> {
        Ok(self.kv.delete_prefix(&self.scope_prefix(scope)).await?)
    }
}
