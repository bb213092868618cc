//! Plan summaries, one per task.

use std::sync::Arc;

use uuid::Uuid;

use super::kv::{KvStore, Precondition};
use crate::error::Result;
use crate::event::PlanSummary;

#[derive(Clone)]
pub struct PlanStore {
    kv: Arc<dyn KvStore>,
    root: String,
}

impl PlanStore {
    pub fn new(kv: Arc<dyn KvStore>, root: &str) -> Self {
        Self {
            kv,
            root: super::root_prefix(root),
        }
    }

    fn key(&self, scope: &str, task_id: Uuid) -> String {
        format!("{}/plan_summaries/{}/{}", self.root, scope, task_id)
    }

    pub async fn put(&self, scope: &str, task_id: Uuid, summary: &PlanSummary) -> Result<()> {
        let value = serde_json::to_vec(summary)?;
        self.kv
            .put(&self.key(scope, task_id), value, Precondition::None)
            .await?;
        Ok(())
    }

    pub async fn get(&self, scope: &str, task_id: Uuid) -> Result<Option<PlanSummary>> {
        match self.kv.get(&self.key(scope, task_id)).await? {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_scope(&self, scope: &str) -> Result<u64> {
        let prefix = format!("{}/plan_summaries/{}/", self.root, scope);
        Ok(self.kv.delete_prefix(&prefix).await?)
    }
}
