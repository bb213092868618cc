//! Subnet allocation for per-database overlay networks.
//!
//! ```text
//!   10.128.0.0/16, /26 subnets
//!   ┌────────┬────────┬────────┬─────┐
//!   │ .0/26  │ .64/26 │.128/26 │ ... │   bitmap, one bit per subnet
//!   └────────┴────────┴────────┴─────┘
//!        │ snapshot / restore
//!        ▼
//!   /{root}/ipam/10.128.0.0/16   (versioned put)
//! ```

mod service;
mod subnet;

pub use service::IpamService;
pub use subnet::{SubnetRange, SubnetRangeSpec, gateway_of};
