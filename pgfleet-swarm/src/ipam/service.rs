//! Persisted subnet allocation.
//!
//! Every allocation runs one critical section:
//! lock → restore the range from the store → allocate → snapshot → versioned put.
//! A concurrent writer on another host surfaces as a version mismatch and the
//! section is retried.

use std::sync::Arc;

use ipnet::Ipv4Net;
use pgfleet_resource::{KvStore, Precondition, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::subnet::{SubnetRange, SubnetRangeSpec};
use crate::error::{IpamError, IpamResult};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSubnetRange {
    name: String,
    spec: String,
    snapshot: Vec<u8>,
}

pub struct IpamService {
    kv: Arc<dyn KvStore>,
    root: String,
    lock: Mutex<()>,
}

impl IpamService {
    pub fn new(kv: Arc<dyn KvStore>, root: &str) -> Self {
        Self {
            kv,
            root: format!("/{}", root.trim_matches('/')),
            lock: Mutex::new(()),
        }
    }

    fn key(&self, prefix: Ipv4Net) -> String {
        format!("{}/ipam/{}", self.root, prefix.trunc())
    }

    /// Allocate the next free `/bits` subnet of `prefix`.
    pub async fn allocate_subnet(&self, prefix: Ipv4Net, bits: u8) -> IpamResult<Ipv4Net> {
        let _guard = self.lock.lock().await;
        let subnet = self
            .update(prefix, bits, |range| range.allocate_next())
            .await?;
        info!(%prefix, %subnet, "Allocated subnet");
        Ok(subnet)
    }

    /// Return `subnet` to `prefix`'s pool.
    pub async fn release_subnet(&self, prefix: Ipv4Net, bits: u8, subnet: Ipv4Net) -> IpamResult<()> {
        let _guard = self.lock.lock().await;
        self.update(prefix, bits, |range| {
            range.release(subnet);
            Ok(())
        })
        .await?;
        info!(%prefix, %subnet, "Released subnet");
        Ok(())
    }

    /// Current persisted view of a range.
    pub async fn range(&self, prefix: Ipv4Net, bits: u8) -> IpamResult<SubnetRange> {
        let mut range = SubnetRange::new(SubnetRangeSpec::new(prefix, bits))?;
        self.restore(&mut range).await?;
        Ok(range)
    }

    async fn update<T>(
        &self,
        prefix: Ipv4Net,
        bits: u8,
        mut op: impl FnMut(&mut SubnetRange) -> IpamResult<T>,
    ) -> IpamResult<T> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut range = SubnetRange::new(SubnetRangeSpec::new(prefix, bits))?;
            let revision = self.restore(&mut range).await?;

            let result = op(&mut range)?;
            let (spec, snapshot) = range.snapshot()?;
            let stored = StoredSubnetRange {
                name: prefix.trunc().to_string(),
                spec,
                snapshot,
            };
            let value = serde_json::to_vec(&stored)
                .map_err(|e| IpamError::InvalidSpec(e.to_string()))?;
            let precondition = match revision {
                Some(revision) => Precondition::Revision(revision),
                None => Precondition::Absent,
            };

            match self.kv.put(&self.key(prefix), value, precondition).await {
                Ok(_) => return Ok(result),
                Err(StoreError::VersionMismatch { .. } | StoreError::Conflict(_)) => {
                    debug!(%prefix, attempt, "Subnet range changed concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(IpamError::RetriesExhausted(prefix.to_string()))
    }

    /// Load the stored bitmap into `range`, returning the stored revision.
    ///
    /// A snapshot that no longer matches the configured range is ignored and
    /// overwritten on the next write.
    async fn restore(&self, range: &mut SubnetRange) -> IpamResult<Option<u64>> {
        let Some(entry) = self.kv.get(&self.key(range.cidr())).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<StoredSubnetRange>(&entry.value) {
            Ok(stored) => {
                if let Err(err) = range.restore(&stored.spec, &stored.snapshot) {
                    warn!(cidr = %range.cidr(), error = %err, "Failed to restore subnet allocator");
                }
            }
            Err(err) => {
                warn!(cidr = %range.cidr(), error = %err, "Failed to decode stored subnet allocator");
            }
        }
        Ok(Some(entry.revision))
    }
}
