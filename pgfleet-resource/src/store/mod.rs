//! Persistence for resource state and plan summaries.
//!
//! Everything sits on a [`KvStore`], the consensus-store contract shared with
//! the HA coordinator's DCS.
//!
//! # Key scheme
//!
//! ```text
//! /{root}/resource_state/{scope}/{type}/{id}   → {"version": 1, "resource": ResourceData}
//! /{root}/plan_summaries/{scope}/{task_id}     → PlanSummary
//! ```

mod error;
mod kv;
mod plan_store;
mod state_store;

pub use error::{Result, StoreError};
pub use kv::{KeyValue, KvStore, MemoryKv, Precondition};
pub use plan_store::PlanStore;
pub use state_store::StateStore;

/// Normalise a root prefix so keys always look like `/{root}/...`.
pub(crate) fn root_prefix(root: &str) -> String {
    format!("/{}", root.trim_matches('/'))
}
