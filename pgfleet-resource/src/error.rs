//! Engine error types.

use std::time::Duration;

use thiserror::Error;

use crate::event::EventType;
use crate::identifier::Identifier;
use crate::store::StoreError;

/// Errors raised while planning or applying resources.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying object does not exist yet. Drives create vs update, not a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// The dependency graph contains a cycle. Configuration error, never retried.
    #[error("dependency cycle detected between: {}", join_ids(.remaining))]
    CycleDetected { remaining: Vec<Identifier> },

    #[error("{resource} depends on {dependency}, which is not in state")]
    MissingDependency {
        resource: Identifier,
        dependency: Identifier,
    },

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A record rehydrated into a resource reporting a different identity.
    #[error("resource type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: Identifier,
        actual: Identifier,
    },

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("executor not found: {0}")]
    ExecutorNotFound(String),

    /// Target host has no registered worker. Retryable.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("missing capability: {0}")]
    MissingCapability(&'static str),

    /// Failure reported by a remote system (container runtime, consensus store, HA coordinator).
    #[error("{0}")]
    Remote(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("reconciliation canceled")]
    Canceled,

    #[error("failed to {action} {identifier}: {source}")]
    Lifecycle {
        action: EventType,
        identifier: Identifier,
        #[source]
        source: Box<Error>,
    },

    /// Skipped because something it depends on failed in the same pass.
    #[error("skipped {identifier}: {blocker} failed")]
    Blocked {
        identifier: Identifier,
        blocker: Identifier,
    },

    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Error::Remote(message.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Lifecycle { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether the outer workflow layer may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::HostUnreachable(_)
            | Error::Timeout { .. }
            | Error::Remote(_)
            | Error::Store(_)
            | Error::ExecutorNotFound(_) => true,
            Error::Lifecycle { source, .. } => source.is_retryable(),
            Error::Multiple(errors) => errors.iter().any(Error::is_retryable),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_canceled),
            _ => false,
        }
    }

    /// Collapse a list of sibling errors: none, one, or `Multiple`.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }
}

fn join_ids(ids: &[Identifier]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
