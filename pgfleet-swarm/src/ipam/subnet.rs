//! Fixed-size subnet allocator over an IPv4 range.
//!
//! ```text
//! CIDR 172.17.96.0/20, subnet bits 28 → 256 subnets
//!
//!   offset 0            offset 255
//!   172.17.96.0/28 ...  172.17.111.240/28
//! ```
//!
//! Allocation state is a bitmap with one bit per subnet; it can be snapshotted
//! and restored so the range survives across processes.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{IpamError, IpamResult};

/// Upper bound on subnets per range, which keeps bitmaps small.
const MAX_SUBNETS: u64 = 1 << 20;

/// Identifies a range in snapshots. Changing its shape breaks restores of
/// older snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRangeSpec {
    pub cidr: Ipv4Net,
    pub subnet_bits: u8,
}

impl SubnetRangeSpec {
    pub fn new(cidr: Ipv4Net, subnet_bits: u8) -> Self {
        Self { cidr, subnet_bits }
    }

    pub fn to_json(&self) -> IpamResult<String> {
        serde_json::to_string(self).map_err(|e| IpamError::InvalidSpec(e.to_string()))
    }

    pub fn parse(s: &str) -> IpamResult<Self> {
        serde_json::from_str(s).map_err(|e| IpamError::InvalidSpec(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SubnetRange {
    net: Ipv4Net,
    base: u32,
    max: u64,
    subnet_size: u64,
    subnet_bits: u8,
    bitmap: Vec<u8>,
    used: u64,
}

impl SubnetRange {
    pub fn new(spec: SubnetRangeSpec) -> IpamResult<Self> {
        let net = spec.cidr.trunc();
        if spec.subnet_bits > 32 {
            return Err(IpamError::InvalidSpec(format!(
                "subnet bits {} exceed 32",
                spec.subnet_bits
            )));
        }
        if spec.subnet_bits < net.prefix_len() {
            return Err(IpamError::InvalidSpec(format!(
                "subnet size /{} is larger than {}",
                spec.subnet_bits, net
            )));
        }

        let range_size = 1u64 << (32 - net.prefix_len());
        let subnet_size = 1u64 << (32 - spec.subnet_bits);
        let max = range_size / subnet_size;
        if max > MAX_SUBNETS {
            return Err(IpamError::InvalidSpec(format!(
                "{} holds {} subnets of /{}, more than {}",
                net, max, spec.subnet_bits, MAX_SUBNETS
            )));
        }

        Ok(Self {
            net,
            base: u32::from(net.network()),
            max,
            subnet_size,
            subnet_bits: spec.subnet_bits,
            bitmap: vec![0; max.div_ceil(8) as usize],
            used: 0,
        })
    }

    pub fn spec(&self) -> SubnetRangeSpec {
        SubnetRangeSpec::new(self.net, self.subnet_bits)
    }

    pub fn cidr(&self) -> Ipv4Net {
        self.net
    }

    /// Subnets left in the range.
    pub fn free(&self) -> u64 {
        self.max - self.used
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Reserve a specific subnet.
    pub fn allocate(&mut self, subnet: Ipv4Net) -> IpamResult<()> {
        let offset = self.offset(subnet).ok_or_else(|| IpamError::NotInRange {
            subnet: subnet.to_string(),
            range: self.net.to_string(),
        })?;
        if self.bit(offset) {
            return Err(IpamError::Allocated(subnet.to_string()));
        }
        self.set(offset, true);
        Ok(())
    }

    /// Reserve the lowest free subnet.
    pub fn allocate_next(&mut self) -> IpamResult<Ipv4Net> {
        let offset = (0..self.max)
            .find(|o| !self.bit(*o))
            .ok_or_else(|| IpamError::Full(self.net.to_string()))?;
        self.set(offset, true);
        self.subnet_at(offset)
    }

    /// Return a subnet to the pool. Out-of-range or unallocated subnets are a no-op.
    pub fn release(&mut self, subnet: Ipv4Net) {
        if let Some(offset) = self.offset(subnet) {
            self.set(offset, false);
        }
    }

    pub fn has(&self, subnet: Ipv4Net) -> bool {
        self.offset(subnet).is_some_and(|o| self.bit(o))
    }

    pub fn for_each(&self, mut f: impl FnMut(Ipv4Net)) {
        for offset in (0..self.max).filter(|o| self.bit(*o)) {
            if let Ok(subnet) = self.subnet_at(offset) {
                f(subnet);
            }
        }
    }

    /// The range spec (as JSON) and the allocation bitmap.
    pub fn snapshot(&self) -> IpamResult<(String, Vec<u8>)> {
        Ok((self.spec().to_json()?, self.bitmap.clone()))
    }

    /// Load a snapshot taken from a range of exactly the same shape.
    pub fn restore(&mut self, spec: &str, data: &[u8]) -> IpamResult<()> {
        let spec = SubnetRangeSpec::parse(spec)?;
        if spec.cidr.trunc() != self.net || spec.subnet_bits != self.subnet_bits {
            return Err(IpamError::MismatchedNetwork {
                expected: format!("{}/{}", self.net, self.subnet_bits),
                actual: format!("{}/{}", spec.cidr, spec.subnet_bits),
            });
        }
        if data.len() != self.bitmap.len() {
            return Err(IpamError::InvalidSpec(format!(
                "snapshot holds {} bytes, expected {}",
                data.len(),
                self.bitmap.len()
            )));
        }
        self.bitmap.copy_from_slice(data);
        // Bits past `max` in the last byte are never set by this allocator.
        self.used = (0..self.max).filter(|o| self.bit(*o)).count() as u64;
        Ok(())
    }

    fn offset(&self, subnet: Ipv4Net) -> Option<u64> {
        if subnet.prefix_len() != self.subnet_bits || !self.net.contains(&subnet.addr()) {
            return None;
        }
        let delta = u64::from(u32::from(subnet.addr()).checked_sub(self.base)?);
        if delta % self.subnet_size != 0 {
            return None;
        }
        let offset = delta / self.subnet_size;
        (offset < self.max).then_some(offset)
    }

    fn subnet_at(&self, offset: u64) -> IpamResult<Ipv4Net> {
        let addr = self.base as u64 + offset * self.subnet_size;
        let addr = u32::try_from(addr)
            .map_err(|_| IpamError::InvalidSpec(format!("offset {} overflows {}", offset, self.net)))?;
        Ipv4Net::new(Ipv4Addr::from(addr), self.subnet_bits)
            .map_err(|e| IpamError::InvalidSpec(e.to_string()))
    }

    fn bit(&self, offset: u64) -> bool {
        self.bitmap[(offset / 8) as usize] & (1 << (offset % 8)) != 0
    }

    fn set(&mut self, offset: u64, value: bool) {
        let was = self.bit(offset);
        let byte = &mut self.bitmap[(offset / 8) as usize];
        if value {
            *byte |= 1 << (offset % 8);
        } else {
            *byte &= !(1 << (offset % 8));
        }
        match (was, value) {
            (false, true) => self.used += 1,
            (true, false) => self.used -= 1,
            _ => {}
        }
    }
}

/// First usable host address of a subnet, used as its gateway.
pub fn gateway_of(subnet: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet.network()).saturating_add(1))
}
