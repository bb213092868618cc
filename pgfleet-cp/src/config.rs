//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

use pgfleet_swarm::SubnetRangeSpec;

#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix of every key the control plane writes.
    pub root: String,
    /// Instance directories live here; so does the store file.
    pub data_dir: PathBuf,
    /// Host this process runs on. Manages the cohort's orchestrator.
    pub host_id: String,
    pub dispatch_timeout: Duration,
    /// Pool database networks are carved from.
    pub subnet: SubnetRangeSpec,
    /// Keep everything in memory, including the local filesystem.
    pub dev: bool,
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }
}
