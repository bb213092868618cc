//! pgfleet resource engine
//!
//! Reconciles a desired set of typed resources against the persisted state of
//! one reconciliation scope (one database, one host).
//!
//! # Architecture
//!
//! ```text
//! desired State ──┐
//!                 ├─ Reconciler ── refresh pass ── State::plan ── Plan (phases)
//! StateStore ─────┘                                                  │
//!                                                                    ↓
//!                               Router::resolve(executor) → Target::Local | Target::Host
//!                                                                    │
//!                               Job ──mpsc──→ Worker (per host) → Runner → Resource::{create,..}
//!                                    ←─oneshot── ApplyOutcome
//! ```
//!
//! Each phase of a plan holds events whose resources have no dependency on
//! each other; the reconciler fans them out and joins them before the next
//! phase starts.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.register::<Network>(NETWORK_TYPE);
//! let registry = Arc::new(registry);
//!
//! let router = Arc::new(Router::new(Runner::new(registry.clone(), collaborators)));
//! let reconciler = Reconciler::new(StateStore::new(kv.clone(), "pgfleet"), router);
//!
//! let mut desired = State::new();
//! desired.add_resource(&network)?;
//! reconciler.reconcile("db-1", desired, ReconcileOptions::default(), &logger).await?;
//! ```

pub mod context;
pub mod diff;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod identifier;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod state;
pub mod store;
pub mod worker;

pub use context::Context;
pub use diff::DiffOp;
pub use error::{Error, Result};
pub use event::{ApplyOutcome, Event, EventReason, EventSummary, EventType, Plan, PlanSummary};
pub use executor::{Job, JobSender, NodeResolver, Router, Target};
pub use identifier::{Executor, Identifier};
pub use reconciler::{ReconcileOptions, Reconciler, Reconciliation};
pub use registry::{Registry, from_state};
pub use resource::{Attributes, Resource, ResourceData};
pub use state::{PlanOptions, State};
pub use store::{KeyValue, KvStore, MemoryKv, PlanStore, Precondition, StateStore, StoreError};
pub use worker::{Runner, Worker};
