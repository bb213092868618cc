//! Collaborator contracts used by resource lifecycle methods.
//!
//! Each contract is an `async_trait` returning [`ClientError`](crate::ClientError);
//! the [`memory`] module provides in-process implementations.

pub mod certificates;
pub mod consensus;
pub mod container;
pub mod filesystem;
pub mod memory;
pub mod patroni;

pub use certificates::{CertificateService, KeyPair};
pub use consensus::{ConsensusClient, ConsensusUser};
pub use container::{
    ContainerClient, ContainerSpec, DeployResult, DnsConfig, EndpointSpec, ExecOutput, Mount,
    NetworkAttachment, NetworkCreate, NetworkInfo, PortConfig, Service, ServiceSpec, TaskSpec,
};
pub use filesystem::{FileSystem, LocalFileSystem};
pub use memory::{
    MemoryCertificates, MemoryConsensus, MemoryContainers, MemoryFileSystem, MemoryPatroni,
};
pub use patroni::{
    ClusterMember, ClusterRole, ClusterState, InstanceRole, InstanceStatus, PatroniClient,
    PatroniConnector, PatroniState, Restart, Switchover,
};
