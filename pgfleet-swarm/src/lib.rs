//! pgfleet swarm resources
//!
//! Resource types that run highly-available Postgres (Patroni-managed)
//! instances as container services on a Docker Swarm cohort, plus the
//! collaborator contracts they drive.
//!
//! # Architecture
//!
//! ```text
//! DatabaseSpec ── orchestrator::desired_state ── State (desired)
//!                                                  │
//!                                     pgfleet_resource::Reconciler
//!                                                  │
//!                     Worker (per host) ── Runner ── resources::* lifecycle
//!                                                  │
//!                 Collaborators: containers, consensus, certificates,
//!                                filesystem, patroni, ipam
//! ```
//!
//! Resources reach their collaborators through [`SwarmContext`]. The
//! [`clients::memory`] module provides in-process collaborators for
//! development mode and tests.

pub mod clients;
pub mod collaborators;
pub mod error;
pub mod ipam;
pub mod orchestrator;
pub mod resources;
pub mod spec;

pub use collaborators::{Collaborators, SwarmContext};
pub use error::{ClientError, ClientResult, IpamError, IpamResult};
pub use ipam::{IpamService, SubnetRange, SubnetRangeSpec};
pub use orchestrator::{DesiredStateOptions, SwarmNodeResolver, desired_state};
pub use resources::register_all;
pub use spec::{BackupConfig, DatabaseSpec, InstanceConfig, InstanceSpec, NodeSpec};
