//! A cohort of in-memory hosts for end-to-end reconciliation tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use pgfleet_resource::{MemoryKv, Reconciler, Registry, Router, Runner, StateStore, Worker};
use pgfleet_swarm::clients::{
    MemoryCertificates, MemoryConsensus, MemoryContainers, MemoryFileSystem, MemoryPatroni,
};
use pgfleet_swarm::{
    Collaborators, DatabaseSpec, DesiredStateOptions, IpamService, SubnetRangeSpec,
    SwarmNodeResolver, register_all,
};
use serde_json::json;

pub const DATA_DIR: &str = "/var/lib/pgfleet";
pub const COHORT: &str = "swarm-1";

pub struct Cohort {
    pub kv: Arc<MemoryKv>,
    pub store: StateStore,
    pub containers: Arc<MemoryContainers>,
    pub consensus: Arc<MemoryConsensus>,
    pub certificates: Arc<MemoryCertificates>,
    pub patroni: MemoryPatroni,
    pub filesystems: BTreeMap<String, Arc<MemoryFileSystem>>,
    pub reconciler: Reconciler<Collaborators>,
}

impl Cohort {
    pub fn filesystem(&self, host: &str) -> &MemoryFileSystem {
        &self.filesystems[host]
    }
}

/// One worker per host; the first host manages the cohort.
pub async fn cohort(hosts: &[&str]) -> Cohort {
    let mut registry = Registry::new();
    register_all(&mut registry);
    let registry = Arc::new(registry);

    let kv = Arc::new(MemoryKv::new());
    let containers = Arc::new(MemoryContainers::new());
    let consensus = Arc::new(MemoryConsensus::new(kv.clone()));
    let certificates = Arc::new(MemoryCertificates::new());
    let patroni = MemoryPatroni::new(containers.clone());
    let ipam = Arc::new(IpamService::new(kv.clone(), "pgfleet"));

    let shared = Collaborators::new(DATA_DIR)
        .with_containers(containers.clone())
        .with_consensus(consensus.clone())
        .with_certificates(certificates.clone())
        .with_patroni(Arc::new(patroni.clone()))
        .with_ipam(ipam);

    let router = Router::new(Runner::new(registry.clone(), Arc::new(shared.clone())))
        .with_node_resolver(Arc::new(SwarmNodeResolver));

    let mut filesystems = BTreeMap::new();
    for host in hosts {
        let filesystem = Arc::new(MemoryFileSystem::new());
        let collaborators = shared.clone().with_filesystem(filesystem.clone());
        let runner = Runner::new(registry.clone(), Arc::new(collaborators));
        let (worker, queue) = Worker::new(host, runner, 16);
        tokio::spawn(worker.run());
        router.register_host(host, queue).await;
        filesystems.insert(host.to_string(), filesystem);
    }
    if let Some(manager) = hosts.first() {
        router.set_cohort_manager(COHORT, manager).await;
    }

    let store = StateStore::new(kv.clone(), "pgfleet");
    let reconciler = Reconciler::new(store.clone(), Arc::new(router));

    Cohort {
        kv,
        store,
        containers,
        consensus,
        certificates,
        patroni,
        filesystems,
        reconciler,
    }
}

/// `orders`: node n1 with instances a (host-a) and b (host-b), node n2 with
/// instance c (host-a).
pub fn orders() -> DatabaseSpec {
    serde_json::from_value(json!({
        "database_id": "orders",
        "cohort_id": COHORT,
        "cluster_id": "cluster-1",
        "nodes": [
            {"name": "n1", "instances": [
                {"instance_id": "a", "host_id": "host-a", "postgres_image": "postgres:17"},
                {"instance_id": "b", "host_id": "host-b", "postgres_image": "postgres:17"}
            ]},
            {"name": "n2", "instances": [
                {"instance_id": "c", "host_id": "host-a", "postgres_image": "postgres:17"}
            ]}
        ]
    }))
    .unwrap()
}

pub fn options() -> DesiredStateOptions {
    DesiredStateOptions::new(SubnetRangeSpec::new("10.128.0.0/16".parse().unwrap(), 24))
}
