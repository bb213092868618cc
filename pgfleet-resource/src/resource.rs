//! The resource contract and its persisted envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::diff::{self, DiffOp};
use crate::error::Result;
use crate::identifier::{Executor, Identifier};

/// Serialized view of a resource's fields.
///
/// Implemented for every `Serialize` type, so resources only need to derive it.
pub trait Attributes {
    fn attributes(&self) -> serde_json::Result<Value>;
}

impl<T: Serialize> Attributes for T {
    fn attributes(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// A typed unit of desired and actual infrastructure state.
///
/// `C` is the collaborator bundle handed to lifecycle calls through the
/// [`Context`].
#[async_trait]
pub trait Resource<C>: Attributes + Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Pure function of the record's own domain fields.
    fn identifier(&self) -> Identifier;

    /// Where side effects run. May depend on record fields such as a host ID.
    fn executor(&self) -> Executor;

    /// Resources that must be reconciled before this one.
    fn dependencies(&self) -> Vec<Identifier> {
        Vec::new()
    }

    /// Schema tag. Bump when the record shape changes so stale records are recreated.
    fn resource_version(&self) -> &'static str {
        "1"
    }

    /// JSON-pointer paths excluded from the update decision.
    fn diff_ignore(&self) -> &'static [&'static str] {
        &[]
    }

    /// Inspect the live system and hydrate computed fields.
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when the object is
    /// absent. Must not mutate anything.
    async fn refresh(&mut self, rc: &Context<C>) -> Result<()>;

    async fn create(&mut self, rc: &Context<C>) -> Result<()>;

    /// Defaults to calling `create` again, for naturally idempotent resources.
    async fn update(&mut self, rc: &Context<C>) -> Result<()> {
        self.create(rc).await
    }

    /// Tear down. Succeeds when the object is already gone.
    async fn delete(&mut self, rc: &Context<C>) -> Result<()>;
}

/// The stored form of a resource: identity, placement and serialized fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    pub identifier: Identifier,
    pub executor: Executor,
    pub attributes: Value,
    #[serde(default)]
    pub dependencies: Vec<Identifier>,
    #[serde(default)]
    pub diff_ignore: Vec<String>,
    pub resource_version: String,
    #[serde(default)]
    pub needs_recreate: bool,
}

impl ResourceData {
    pub fn from_resource<C, R>(resource: &R) -> Result<Self>
    where
        C: Send + Sync + 'static,
        R: Resource<C> + ?Sized,
    {
        Ok(Self {
            identifier: resource.identifier(),
            executor: resource.executor(),
            attributes: resource.attributes()?,
            dependencies: resource.dependencies(),
            diff_ignore: resource
                .diff_ignore()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            resource_version: resource.resource_version().to_string(),
            needs_recreate: false,
        })
    }

    /// Attribute changes from `self` (current) to `desired`, skipping the
    /// ignore paths declared by either side.
    pub fn diff(&self, desired: &ResourceData) -> Vec<DiffOp> {
        let mut ignore = self.diff_ignore.clone();
        for path in &desired.diff_ignore {
            if !ignore.contains(path) {
                ignore.push(path.clone());
            }
        }
        diff::diff(&self.attributes, &desired.attributes, &ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(attributes: Value, ignore: &[&str]) -> ResourceData {
        ResourceData {
            identifier: Identifier::new("inst-1", "filesystem.dir"),
            executor: Executor::Host("host-a".into()),
            attributes,
            dependencies: Vec::new(),
            diff_ignore: ignore.iter().map(|p| p.to_string()).collect(),
            resource_version: "1".into(),
            needs_recreate: false,
        }
    }

    #[test]
    fn test_diff_honors_ignore_paths() {
        let current = data(json!({"path": "a", "full_path": "/data/a"}), &["/full_path"]);
        let desired = data(json!({"path": "a", "full_path": null}), &["/full_path"]);
        assert!(current.diff(&desired).is_empty());
    }

    #[test]
    fn test_diff_reports_changes() {
        let current = data(json!({"path": "a", "mode": 448}), &[]);
        let desired = data(json!({"path": "a", "mode": 493}), &[]);
        let ops = current.diff(&desired);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path(), "/mode");
    }

    #[test]
    fn test_envelope_defaults() {
        let parsed: ResourceData = serde_json::from_value(json!({
            "identifier": {"type": "swarm.network", "id": "db-database"},
            "executor": {"type": "cohort", "id": "swarm-1"},
            "attributes": {},
            "resource_version": "1"
        }))
        .unwrap();
        assert!(parsed.dependencies.is_empty());
        assert!(!parsed.needs_recreate);
    }
}
