//! Certificate authority contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

/// A PEM certificate and its private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

#[async_trait]
pub trait CertificateService: Send + Sync {
    /// Server certificate valid for every name in `hostnames`.
    async fn issue_server_cert(&self, common_name: &str, hostnames: &[String]) -> ClientResult<KeyPair>;

    /// Client certificate authenticating `username`.
    async fn issue_user_cert(&self, username: &str) -> ClientResult<KeyPair>;

    /// PEM bundle of the trusted CA.
    async fn ca_bundle(&self) -> ClientResult<Vec<u8>>;
}
