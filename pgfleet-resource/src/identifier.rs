//! Resource identity and execution placement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names one resource record within a reconciliation scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl Identifier {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.resource_type, self.id)
    }
}

/// Where a resource's side effects must run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Executor {
    /// The named host's local worker (filesystem, local container runtime).
    Host(String),
    /// Whichever host currently manages the cohort's container orchestrator.
    Cohort(String),
    /// Cluster-wide consensus store operations; any worker will do.
    Cluster(String),
    /// The host running the live primary of the named database node.
    Node(String),
    /// In-process, no dispatch.
    Manager,
    /// Any reachable worker.
    Any,
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::Host(id) => write!(f, "host {}", id),
            Executor::Cohort(id) => write!(f, "cohort {}", id),
            Executor::Cluster(id) => write!(f, "cluster {}", id),
            Executor::Node(name) => write!(f, "node {}", name),
            Executor::Manager => f.write_str("manager"),
            Executor::Any => f.write_str("any"),
        }
    }
}
