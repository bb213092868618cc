//! pgfleet control plane
//!
//! Wires the resource engine to the swarm resources: one worker per host, the
//! local host as cohort manager, and a persistent store for resource state,
//! plan summaries and subnet allocators.
//!
//! ```text
//! DatabaseSpec ─→ ControlPlane::{plan, apply, delete}
//!                     │
//!                     ├─ Task + TaskLogger ─→ MemoryTaskSink
//!                     └─ Reconciler ─→ Router ─→ Worker (per host)
//!                             │
//!                        StateStore / PlanStore ─→ FileKv ({data_dir}/store.json)
//! ```
//!
//! Collaborators other than the local filesystem are in-process, so hosts
//! other than the local one are simulated.

pub mod config;
pub mod control_plane;
pub mod file_kv;

pub use config::Config;
pub use control_plane::{ControlPlane, TaskReport};
pub use file_kv::FileKv;
