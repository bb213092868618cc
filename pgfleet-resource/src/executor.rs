//! Executor routing.
//!
//! Resolves a resource's [`Executor`] to a concrete [`Target`] and dispatches
//! lifecycle calls there. Remote targets are named, host-bound job queues;
//! the caller awaits the reply on a oneshot under a deadline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{ApplyOutcome, Event};
use crate::identifier::Executor;
use crate::state::State;
use crate::worker::Runner;

/// Default deadline for a dispatched lifecycle call.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// A lifecycle call shipped to a host worker.
pub struct Job {
    pub event: Event,
    /// Snapshot of the scope's state for typed dependency lookups.
    pub state: State,
    pub reply: oneshot::Sender<Result<ApplyOutcome>>,
}

pub type JobSender = mpsc::Sender<Job>;

/// Finds the host running the live primary of a database node.
pub trait NodeResolver: Send + Sync {
    fn primary_host(&self, state: &State, node_name: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// This process.
    Local,
    Host(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => f.write_str("control plane"),
            Target::Host(id) => write!(f, "host {}", id),
        }
    }
}

pub struct Router<C> {
    local: Runner<C>,
    queues: RwLock<BTreeMap<String, JobSender>>,
    cohort_managers: RwLock<HashMap<String, String>>,
    node_resolver: Option<Arc<dyn NodeResolver>>,
    dispatch_timeout: Duration,
    next_any: AtomicUsize,
}

impl<C> Router<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(local: Runner<C>) -> Self {
        Self {
            local,
            queues: RwLock::new(BTreeMap::new()),
            cohort_managers: RwLock::new(HashMap::new()),
            node_resolver: None,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            next_any: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout(mut self, dispatch_timeout: Duration) -> Self {
        self.dispatch_timeout = dispatch_timeout;
        self
    }

    pub fn with_node_resolver(mut self, resolver: Arc<dyn NodeResolver>) -> Self {
        self.node_resolver = Some(resolver);
        self
    }

    pub async fn register_host(&self, host_id: &str, queue: JobSender) {
        debug!(host = %host_id, "Registered host queue");
        self.queues.write().await.insert(host_id.to_string(), queue);
    }

    pub async fn deregister_host(&self, host_id: &str) {
        self.queues.write().await.remove(host_id);
    }

    /// Record which host manages a cohort's container orchestrator.
    pub async fn set_cohort_manager(&self, cohort_id: &str, host_id: &str) {
        self.cohort_managers
            .write()
            .await
            .insert(cohort_id.to_string(), host_id.to_string());
    }

    pub async fn resolve(&self, executor: &Executor, state: &State) -> Result<Target> {
        match executor {
            Executor::Manager => Ok(Target::Local),
            Executor::Host(host_id) => self.reachable(host_id).await,
            Executor::Cohort(cohort_id) => {
                let manager = self
                    .cohort_managers
                    .read()
                    .await
                    .get(cohort_id)
                    .cloned()
                    .ok_or_else(|| {
                        Error::ExecutorNotFound(format!("no manager known for cohort {}", cohort_id))
                    })?;
                self.reachable(&manager).await
            }
            Executor::Node(node_name) => {
                let resolver = self.node_resolver.as_ref().ok_or_else(|| {
                    Error::ExecutorNotFound(format!("cannot resolve primary of node {}", node_name))
                })?;
                let host_id = resolver.primary_host(state, node_name)?;
                self.reachable(&host_id).await
            }
            Executor::Cluster(_) | Executor::Any => {
                let queues = self.queues.read().await;
                if queues.is_empty() {
                    return Ok(Target::Local);
                }
                let n = self.next_any.fetch_add(1, Ordering::Relaxed) % queues.len();
                let host_id = queues.keys().nth(n).cloned().unwrap_or_default();
                Ok(Target::Host(host_id))
            }
        }
    }

    async fn reachable(&self, host_id: &str) -> Result<Target> {
        if self.queues.read().await.contains_key(host_id) {
            Ok(Target::Host(host_id.to_string()))
        } else {
            Err(Error::HostUnreachable(host_id.to_string()))
        }
    }

    /// Resolve and dispatch in one step.
    pub async fn dispatch(&self, event: Event, state: &State) -> Result<ApplyOutcome> {
        let target = self.resolve(&event.resource.executor, state).await?;
        self.dispatch_to(&target, event, state.clone()).await
    }

    pub async fn dispatch_to(
        &self,
        target: &Target,
        event: Event,
        state: State,
    ) -> Result<ApplyOutcome> {
        let operation = format!("{} {}", event.event_type, event.resource.identifier);

        let result = match target {
            Target::Local => timeout(self.dispatch_timeout, self.local.run(event, state)).await,
            Target::Host(host_id) => {
                let queue = self
                    .queues
                    .read()
                    .await
                    .get(host_id)
                    .cloned()
                    .ok_or_else(|| Error::HostUnreachable(host_id.clone()))?;

                let (reply, rx) = oneshot::channel();
                queue
                    .send(Job {
                        event,
                        state,
                        reply,
                    })
                    .await
                    .map_err(|_| Error::HostUnreachable(host_id.clone()))?;

                match timeout(self.dispatch_timeout, rx).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(_)) => return Err(Error::HostUnreachable(host_id.clone())),
                    Err(elapsed) => Err(elapsed),
                }
            }
        };

        result.map_err(|_| Error::Timeout {
            operation,
            after: self.dispatch_timeout,
        })?
    }
}
