//! Per-location collaborator handles.
//!
//! Every worker owns one [`Collaborators`] value; resources reach it through
//! `Context::collaborators()`. A handle that is not configured at a location
//! yields [`Error::MissingCapability`] when a resource asks for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgfleet_resource::{Context, Error, Result};

use crate::clients::{
    CertificateService, ConsensusClient, ContainerClient, FileSystem, PatroniConnector,
};
use crate::ipam::IpamService;

pub type SwarmContext = Context<Collaborators>;

#[derive(Clone)]
pub struct Collaborators {
    containers: Option<Arc<dyn ContainerClient>>,
    consensus: Option<Arc<dyn ConsensusClient>>,
    certificates: Option<Arc<dyn CertificateService>>,
    filesystem: Option<Arc<dyn FileSystem>>,
    patroni: Option<Arc<dyn PatroniConnector>>,
    ipam: Option<Arc<IpamService>>,
    data_dir: PathBuf,
}

impl Collaborators {
    /// No collaborators; every lookup fails.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            containers: None,
            consensus: None,
            certificates: None,
            filesystem: None,
            patroni: None,
            ipam: None,
            data_dir: data_dir.into(),
        }
    }

    pub fn with_containers(mut self, containers: Arc<dyn ContainerClient>) -> Self {
        self.containers = Some(containers);
        self
    }

    pub fn with_consensus(mut self, consensus: Arc<dyn ConsensusClient>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn with_certificates(mut self, certificates: Arc<dyn CertificateService>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_patroni(mut self, patroni: Arc<dyn PatroniConnector>) -> Self {
        self.patroni = Some(patroni);
        self
    }

    pub fn with_ipam(mut self, ipam: Arc<IpamService>) -> Self {
        self.ipam = Some(ipam);
        self
    }

    /// Base directory for host-relative paths.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn containers(&self) -> Result<&dyn ContainerClient> {
        self.containers
            .as_deref()
            .ok_or(Error::MissingCapability("container runtime"))
    }

    pub fn consensus(&self) -> Result<&dyn ConsensusClient> {
        self.consensus
            .as_deref()
            .ok_or(Error::MissingCapability("consensus store"))
    }

    pub fn certificates(&self) -> Result<&dyn CertificateService> {
        self.certificates
            .as_deref()
            .ok_or(Error::MissingCapability("certificate service"))
    }

    pub fn filesystem(&self) -> Result<&dyn FileSystem> {
        self.filesystem
            .as_deref()
            .ok_or(Error::MissingCapability("filesystem"))
    }

    pub fn patroni(&self) -> Result<&dyn PatroniConnector> {
        self.patroni
            .as_deref()
            .ok_or(Error::MissingCapability("patroni connector"))
    }

    pub fn ipam(&self) -> Result<&IpamService> {
        self.ipam
            .as_deref()
            .ok_or(Error::MissingCapability("ipam"))
    }
}
