//! Resources that run Postgres instances on a container cohort.
//!
//! Per instance the graph looks like this (arrows point at dependencies):
//!
//! ```text
//!                   database.node ◄── swarm.pgbackrest_stanza
//!                        │
//!                 database.instance
//!                        │
//!              swarm.postgres_service ──────────────┐
//!                 │            │                    │
//!        swarm.switchover ─► swarm.check_will_restart
//!                                   │               │
//!                       swarm.postgres_service_spec ◄┘
//!              ┌──────────┬─────────┼──────────────┬──────────────┐
//!              │          │         │              │              │
//!     filesystem.dir  swarm.network │     swarm.postgres_certs    │
//!   (data/configs/certs)            │                             │
//!                         swarm.patroni_config ──► swarm.etcd_creds
//!                            │            │
//!              swarm.patroni_member ─► swarm.patroni_cluster
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pgfleet_resource::{Identifier, Registry, Result};

use crate::clients::FileSystem;
use crate::collaborators::{Collaborators, SwarmContext};

mod check_will_restart;
mod dir;
mod etcd_creds;
mod instance;
mod network;
mod patroni;
mod pgbackrest;
mod postgres_certs;
mod postgres_service;
mod scale;
mod service_spec;
mod switchover;

pub use check_will_restart::CheckWillRestart;
pub use dir::Dir;
pub use etcd_creds::EtcdCreds;
pub use instance::{ConnectionInfo, Instance, Node};
pub use network::Network;
pub use patroni::{PatroniCluster, PatroniConfig, PatroniMember};
pub use pgbackrest::{BackupType, PgBackRestBackup, PgBackRestConfig, PgBackRestStanza};
pub use postgres_certs::PostgresCerts;
pub use postgres_service::PostgresService;
pub use scale::{ScaleDirection, ScaleService};
pub use service_spec::PostgresServiceSpec;
pub use switchover::{DatabaseSwitchover, Switchover, TargetRole};

pub const NETWORK: &str = "swarm.network";
pub const DIR: &str = "filesystem.dir";
pub const ETCD_CREDS: &str = "swarm.etcd_creds";
pub const POSTGRES_CERTS: &str = "swarm.postgres_certs";
pub const PATRONI_CLUSTER: &str = "swarm.patroni_cluster";
pub const PATRONI_MEMBER: &str = "swarm.patroni_member";
pub const PATRONI_CONFIG: &str = "swarm.patroni_config";
pub const SERVICE_SPEC: &str = "swarm.postgres_service_spec";
pub const CHECK_WILL_RESTART: &str = "swarm.check_will_restart";
pub const SWITCHOVER: &str = "swarm.switchover";
pub const POSTGRES_SERVICE: &str = "swarm.postgres_service";
pub const INSTANCE: &str = "database.instance";
pub const NODE: &str = "database.node";
pub const DATABASE_SWITCHOVER: &str = "database.switchover";
pub const PGBACKREST_CONFIG: &str = "swarm.pgbackrest_config";
pub const PGBACKREST_STANZA: &str = "swarm.pgbackrest_stanza";
pub const PGBACKREST_BACKUP: &str = "swarm.pgbackrest_backup";
pub const SCALE_SERVICE: &str = "swarm.scale_service";

pub const LABEL_COMPONENT: &str = "pgfleet.component";
pub const LABEL_INSTANCE_ID: &str = "pgfleet.instance.id";
pub const LABEL_NODE: &str = "pgfleet.node";
pub const LABEL_DATABASE_ID: &str = "pgfleet.database.id";

pub const COMPONENT_POSTGRES: &str = "postgres";

/// Root of the instance's mounts inside its container.
pub const CONTAINER_ROOT: &str = "/opt/pgfleet";

/// Namespace all Patroni clusters share in the consensus store.
pub const PATRONI_NAMESPACE: &str = "/patroni/";

pub const SUPERUSER: &str = "pgfleet";
pub const REPLICATION_USER: &str = "patroni_replicator";

/// Register every resource type of this crate.
pub fn register_all(registry: &mut Registry<Collaborators>) {
    registry.register::<Network>(NETWORK);
    registry.register::<Dir>(DIR);
    registry.register::<EtcdCreds>(ETCD_CREDS);
    registry.register::<PostgresCerts>(POSTGRES_CERTS);
    registry.register::<PatroniCluster>(PATRONI_CLUSTER);
    registry.register::<PatroniMember>(PATRONI_MEMBER);
    registry.register::<PatroniConfig>(PATRONI_CONFIG);
    registry.register::<PostgresServiceSpec>(SERVICE_SPEC);
    registry.register::<CheckWillRestart>(CHECK_WILL_RESTART);
    registry.register::<Switchover>(SWITCHOVER);
    registry.register::<PostgresService>(POSTGRES_SERVICE);
    registry.register::<Instance>(INSTANCE);
    registry.register::<Node>(NODE);
    registry.register::<DatabaseSwitchover>(DATABASE_SWITCHOVER);
    registry.register::<PgBackRestConfig>(PGBACKREST_CONFIG);
    registry.register::<PgBackRestStanza>(PGBACKREST_STANZA);
    registry.register::<PgBackRestBackup>(PGBACKREST_BACKUP);
    registry.register::<ScaleService>(SCALE_SERVICE);
}

/// Container hostname and service name of an instance.
pub fn instance_hostname(instance_id: &str) -> String {
    format!("postgres-{}", instance_id)
}

/// Name of a database's overlay network.
pub fn network_name(database_id: &str) -> String {
    format!("{}-database", database_id)
}

/// Patroni scope of a node.
pub fn patroni_scope(database_id: &str, node_name: &str) -> String {
    format!("{}:{}", database_id, node_name)
}

/// Consensus-store prefix holding one Patroni cluster's keys.
pub fn patroni_cluster_prefix(database_id: &str, node_name: &str) -> String {
    format!("{}{}/", PATRONI_NAMESPACE, patroni_scope(database_id, node_name))
}

pub fn patroni_member_key(database_id: &str, node_name: &str, instance_id: &str) -> String {
    format!(
        "{}members/{}",
        patroni_cluster_prefix(database_id, node_name),
        instance_id
    )
}

/// Labels identifying an instance's service.
pub fn service_labels(database_id: &str, node_name: &str, instance_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), COMPONENT_POSTGRES.to_string()),
        (LABEL_DATABASE_ID.to_string(), database_id.to_string()),
        (LABEL_INSTANCE_ID.to_string(), instance_id.to_string()),
        (LABEL_NODE.to_string(), node_name.to_string()),
    ])
}

/// Labels used to find an instance's service regardless of its name.
pub(crate) fn instance_selector(instance_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), COMPONENT_POSTGRES.to_string()),
        (LABEL_INSTANCE_ID.to_string(), instance_id.to_string()),
    ])
}

pub fn network_identifier(database_id: &str) -> Identifier {
    Identifier::new(network_name(database_id), NETWORK)
}

pub fn dir_identifier(id: &str) -> Identifier {
    Identifier::new(id, DIR)
}

pub fn etcd_creds_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, ETCD_CREDS)
}

pub fn postgres_certs_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, POSTGRES_CERTS)
}

pub fn patroni_cluster_identifier(node_name: &str) -> Identifier {
    Identifier::new(node_name, PATRONI_CLUSTER)
}

pub fn patroni_member_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, PATRONI_MEMBER)
}

pub fn patroni_config_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, PATRONI_CONFIG)
}

pub fn service_spec_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, SERVICE_SPEC)
}

pub fn check_will_restart_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, CHECK_WILL_RESTART)
}

pub fn switchover_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, SWITCHOVER)
}

pub fn database_switchover_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, DATABASE_SWITCHOVER)
}

pub fn postgres_service_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, POSTGRES_SERVICE)
}

pub fn instance_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, INSTANCE)
}

pub fn node_identifier(node_name: &str) -> Identifier {
    Identifier::new(node_name, NODE)
}

pub fn pgbackrest_config_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, PGBACKREST_CONFIG)
}

pub fn pgbackrest_stanza_identifier(node_name: &str) -> Identifier {
    Identifier::new(node_name, PGBACKREST_STANZA)
}

pub fn pgbackrest_backup_identifier(node_name: &str) -> Identifier {
    Identifier::new(node_name, PGBACKREST_BACKUP)
}

pub fn scale_service_identifier(instance_id: &str) -> Identifier {
    Identifier::new(instance_id, SCALE_SERVICE)
}

/// Absolute path of a directory resource, resolved through its parents.
pub fn dir_full_path(rc: &SwarmContext, dir_id: &str) -> Result<PathBuf> {
    let dir: Dir = rc.get(&dir_identifier(dir_id))?;
    dir.resolve_path(rc)
}

/// Write `files` into a fresh `dir`, readable only by the owner.
pub(crate) async fn write_private_files(
    fs: &dyn FileSystem,
    dir: &Path,
    files: &[(&str, &[u8])],
    owner: (u32, u32),
) -> Result<()> {
    fs.create_dir_all(dir, 0o700).await?;
    for (name, contents) in files {
        fs.write_file(&dir.join(name), contents, 0o600).await?;
    }
    if owner != (0, 0) {
        fs.chown_recursive(dir, owner.0, owner.1).await?;
    }
    Ok(())
}

/// Read a file written by a resource, as text.
pub(crate) async fn read_text(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let contents = fs.read_file(path).await?;
    Ok(String::from_utf8_lossy(&contents).into_owned())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the resource tests.

    use std::sync::Arc;

    use ipnet::Ipv4Net;
    use pgfleet_resource::{Context, MemoryKv, Registry, Resource, State};

    use super::*;
    use crate::clients::{
        MemoryCertificates, MemoryConsensus, MemoryContainers, MemoryFileSystem, MemoryPatroni,
    };
    use crate::ipam::IpamService;
    use crate::spec::InstanceConfig;

    pub struct Harness {
        pub containers: Arc<MemoryContainers>,
        pub consensus: Arc<MemoryConsensus>,
        pub certificates: Arc<MemoryCertificates>,
        pub filesystem: Arc<MemoryFileSystem>,
        pub patroni: MemoryPatroni,
        pub kv: Arc<MemoryKv>,
        pub collaborators: Arc<Collaborators>,
        registry: Arc<Registry<Collaborators>>,
    }

    impl Harness {
        pub fn new() -> Self {
            let kv = Arc::new(MemoryKv::new());
            let containers = Arc::new(MemoryContainers::new());
            let consensus = Arc::new(MemoryConsensus::new(kv.clone()));
            let certificates = Arc::new(MemoryCertificates::new());
            let filesystem = Arc::new(MemoryFileSystem::new());
            let patroni = MemoryPatroni::new(containers.clone());
            let collaborators = Collaborators::new("/var/lib/pgfleet")
                .with_containers(containers.clone())
                .with_consensus(consensus.clone())
                .with_certificates(certificates.clone())
                .with_filesystem(filesystem.clone())
                .with_patroni(Arc::new(patroni.clone()))
                .with_ipam(Arc::new(IpamService::new(kv.clone(), "pgfleet")));
            let mut registry = Registry::new();
            register_all(&mut registry);
            Self {
                containers,
                consensus,
                certificates,
                filesystem,
                patroni,
                kv,
                collaborators: Arc::new(collaborators),
                registry: Arc::new(registry),
            }
        }

        pub fn context(&self, state: State) -> SwarmContext {
            Context::new(state, self.registry.clone(), self.collaborators.clone())
        }
    }

    /// Adds a resource to `state`.
    pub fn add<R: Resource<Collaborators>>(state: &mut State, resource: &R) {
        state.add_resource::<Collaborators, R>(resource).unwrap();
    }

    pub fn subnet_cidr() -> Ipv4Net {
        "10.128.0.0/16".parse().unwrap()
    }

    pub fn instance_config(instance_id: &str, host_id: &str) -> InstanceConfig {
        InstanceConfig {
            database_id: "orders".into(),
            node_name: "n1".into(),
            instance_id: instance_id.into(),
            host_id: host_id.into(),
            cohort_id: "swarm-1".into(),
            cluster_id: "cluster-1".into(),
            image: "postgres:17".into(),
            port: 5432,
            owner_uid: 0,
            owner_gid: 0,
            node_ordinal: 1,
            cluster_size: 1,
            backup: None,
            postgresql_conf: Default::default(),
            memory_bytes: None,
            cpus: None,
        }
    }
}
