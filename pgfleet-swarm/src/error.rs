//! Error types for collaborator calls and subnet allocation.

use std::time::Duration;

use pgfleet_resource::{Error, StoreError};
use thiserror::Error;

/// Errors returned by collaborator clients (container runtime, consensus
/// store, certificate service, filesystem, HA coordinator).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The addressed object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API rejected or failed the call.
    #[error("api error: {0}")]
    Api(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn api(message: impl Into<String>) -> Self {
        ClientError::Api(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ClientError::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ClientError::NotFound(err.to_string()),
            _ => ClientError::Api(err.to_string()),
        }
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => ClientError::NotFound(key),
            other => ClientError::Api(other.to_string()),
        }
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(what) => Error::NotFound(what),
            ClientError::Api(message) => Error::Remote(message),
            ClientError::Timeout { operation, after } => Error::Timeout { operation, after },
        }
    }
}

/// Subnet allocator errors.
#[derive(Debug, Error)]
pub enum IpamError {
    /// No free subnet is left in the range.
    #[error("range {0} is full")]
    Full(String),

    #[error("subnet {0} is already allocated")]
    Allocated(String),

    #[error("subnet {subnet} is not in the valid range {range}")]
    NotInRange { subnet: String, range: String },

    /// A snapshot was taken from a differently shaped range.
    #[error("snapshot of {actual} does not match range {expected}")]
    MismatchedNetwork { expected: String, actual: String },

    #[error("invalid range spec: {0}")]
    InvalidSpec(String),

    /// Too much contention on the persisted allocator.
    #[error("exhausted retries allocating from {0}")]
    RetriesExhausted(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

pub type IpamResult<T> = std::result::Result<T, IpamError>;

impl From<IpamError> for Error {
    fn from(err: IpamError) -> Self {
        match err {
            IpamError::Store(err) => Error::Store(err),
            IpamError::RetriesExhausted(_) => Error::Remote(err.to_string()),
            other => Error::Validation(vec![other.to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_engine_errors() {
        let err: Error = ClientError::not_found("service postgres-inst-1").into();
        assert!(err.is_not_found());

        let err: Error = ClientError::api("connection refused").into();
        assert!(err.is_retryable());

        let err: Error = ClientError::Timeout {
            operation: "wait for service".into(),
            after: Duration::from_secs(60),
        }
        .into();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_ipam_errors_map_to_engine_errors() {
        let err: Error = IpamError::Full("10.128.0.0/16".into()).into();
        assert!(!err.is_retryable());

        let err: Error = IpamError::RetriesExhausted("10.128.0.0/16".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(ClientError::from(io).is_not_found());
    }
}
