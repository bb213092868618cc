//! Shared helpers for control plane integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use pgfleet_cp::Config;
use pgfleet_swarm::{DatabaseSpec, SubnetRangeSpec};
use serde_json::json;

/// Persistent control plane rooted at `data_dir`, running on host-a.
pub fn config(data_dir: &Path) -> Config {
    Config {
        root: "pgfleet".into(),
        data_dir: data_dir.to_path_buf(),
        host_id: "host-a".into(),
        dispatch_timeout: Duration::from_secs(30),
        subnet: SubnetRangeSpec::new("10.128.0.0/16".parse().unwrap(), 26),
        dev: false,
    }
}

/// `orders`: one node with instance a on the local host and b on host-b.
pub fn orders() -> DatabaseSpec {
    serde_json::from_value(json!({
        "database_id": "orders",
        "cohort_id": "swarm-1",
        "cluster_id": "cluster-1",
        "nodes": [
            {"name": "n1", "instances": [
                {"instance_id": "a", "host_id": "host-a", "postgres_image": "postgres:17"},
                {"instance_id": "b", "host_id": "host-b", "postgres_image": "postgres:17"}
            ]}
        ]
    }))
    .unwrap()
}
