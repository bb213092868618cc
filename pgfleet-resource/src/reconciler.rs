//! Reconciler (applier).
//!
//! One pass over a scope:
//! 1. load the persisted state,
//! 2. refresh every record in dependency order (records found gone are dropped),
//! 3. plan desired against refreshed current,
//! 4. apply phase by phase, persisting each success as soon as it lands.
//!
//! A failure halts only the failed resource's dependents; siblings keep going
//! and all errors are joined. The reconciler never retries on its own.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use pgfleet_log::TaskLogger;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{ApplyOutcome, Event, EventType, Plan, PlanSummary};
use crate::executor::Router;
use crate::identifier::Identifier;
use crate::resource::ResourceData;
use crate::state::{PlanOptions, State};
use crate::store::{PlanStore, StateStore};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub force_update: bool,
    /// Persist the plan summary under this task.
    pub task_id: Option<Uuid>,
    /// Flips to `true` to cancel the pass.
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub summary: PlanSummary,
    pub state: State,
}

pub struct Reconciler<C> {
    store: StateStore,
    plans: Option<PlanStore>,
    router: Arc<Router<C>>,
}

impl<C> Reconciler<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(store: StateStore, router: Arc<Router<C>>) -> Self {
        Self {
            store,
            plans: None,
            router,
        }
    }

    pub fn with_plan_store(mut self, plans: PlanStore) -> Self {
        self.plans = Some(plans);
        self
    }

    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    /// Refresh and plan without applying anything.
    pub async fn plan(&self, scope: &str, desired: &State, options: &ReconcileOptions) -> Result<Plan> {
        let mut current = self.store.load(scope).await?;
        desired_graph_check(&current, desired)?;
        self.refresh(scope, &mut current, false).await?;
        current.plan(desired, &plan_options(options))
    }

    /// Bring `scope` in line with `desired`.
    pub async fn reconcile(
        &self,
        scope: &str,
        desired: State,
        options: ReconcileOptions,
        log: &TaskLogger,
    ) -> Result<Reconciliation> {
        let mut current = self.store.load(scope).await?;
        // Reject cycles and dangling dependencies before touching anything.
        desired_graph_check(&current, &desired)?;

        self.refresh(scope, &mut current, true).await?;

        let plan = current.plan(&desired, &plan_options(&options))?;
        let summary = plan.summary();
        if let (Some(plans), Some(task_id)) = (&self.plans, options.task_id) {
            plans.put(scope, task_id, &summary).await?;
        }

        info!(scope, phases = plan.phases.len(), events = plan.events().count(), "Applying plan");
        self.apply(scope, &mut current, plan, options.cancel, log).await?;

        Ok(Reconciliation {
            summary,
            state: current,
        })
    }

    /// Tear down every resource of `scope`.
    pub async fn teardown(
        &self,
        scope: &str,
        options: ReconcileOptions,
        log: &TaskLogger,
    ) -> Result<Reconciliation> {
        let result = self.reconcile(scope, State::new(), options, log).await?;
        if let Some(plans) = &self.plans {
            plans.delete_scope(scope).await?;
        }
        Ok(result)
    }

    /// Run a one-off operation against the recorded state of `scope`.
    ///
    /// The operation is routed like any create but its outcome is not
    /// recorded. Its dependencies must already be reconciled.
    pub async fn execute(&self, scope: &str, operation: ResourceData, log: &TaskLogger) -> Result<()> {
        let current = self.store.load(scope).await?;
        if let Some(dependency) = operation.dependencies.iter().find(|d| !current.contains(d)) {
            return Err(Error::MissingDependency {
                resource: operation.identifier.clone(),
                dependency: dependency.clone(),
            });
        }

        info!(scope, operation = %operation.identifier, "Executing operation");
        let event = Event::new(EventType::Create, None, operation);
        let (_, result) = self.run_event(event, &current, log).await;
        result.map(|_| ())
    }

    async fn refresh(&self, scope: &str, current: &mut State, persist: bool) -> Result<()> {
        let plan = current.plan_refresh()?;
        let mut errors = Vec::new();

        for phase in plan.phases {
            let snapshot = current.clone();
            let results = join_all(phase.into_iter().map(|event| {
                let snapshot = &snapshot;
                async move {
                    let identifier = event.resource.identifier.clone();
                    (identifier, self.router.dispatch(event, snapshot).await)
                }
            }))
            .await;

            for (identifier, result) in results {
                match result {
                    Ok(ApplyOutcome::Remove(id)) => {
                        info!(scope, resource = %id, "Resource no longer exists, will recreate");
                        current.remove(&id);
                        if persist {
                            self.store.delete(scope, &id).await?;
                        }
                    }
                    Ok(outcome) => current.apply(outcome),
                    Err(Error::ExecutorNotFound(reason)) => {
                        warn!(scope, resource = %identifier, %reason, "Executor not found, will recreate");
                        current.remove(&identifier);
                        if persist {
                            self.store.delete(scope, &identifier).await?;
                        }
                    }
                    Err(source) => errors.push(Error::Lifecycle {
                        action: EventType::Refresh,
                        identifier,
                        source: Box::new(source),
                    }),
                }
            }
        }

        match Error::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn apply(
        &self,
        scope: &str,
        current: &mut State,
        plan: Plan,
        mut cancel: Option<watch::Receiver<bool>>,
        log: &TaskLogger,
    ) -> Result<()> {
        let mut failed: HashSet<Identifier> = HashSet::new();
        let mut errors = Vec::new();
        // Dependencies as they were before the pass, for blocking deletes.
        let before = current.clone();

        for phase in plan.phases {
            if is_canceled(&cancel) {
                errors.push(Error::Canceled);
                break;
            }

            let mut runnable = Vec::new();
            for event in phase {
                match blocker(&event, &failed, &before) {
                    Some(blocker) => {
                        let identifier = event.resource.identifier.clone();
                        log.log(format!("skipping {} {}: {} failed", event.event_type, identifier, blocker))
                            .await;
                        failed.insert(identifier.clone());
                        errors.push(Error::Blocked {
                            identifier,
                            blocker,
                        });
                    }
                    None => runnable.push(event),
                }
            }

            // Each outcome is persisted as it lands. On cancel the calls still
            // in flight are dropped, but everything finished is kept.
            let snapshot = current.clone();
            let mut work: FuturesUnordered<_> = runnable
                .into_iter()
                .map(|event| self.run_event(event, &snapshot, log))
                .collect();
            let mut interrupted = false;
            loop {
                let next = match cancel.as_mut() {
                    Some(rx) => tokio::select! {
                        next = work.next() => next,
                        _ = canceled(rx) => {
                            interrupted = true;
                            break;
                        }
                    },
                    None => work.next().await,
                };
                let Some((identifier, result)) = next else {
                    break;
                };
                self.record(scope, current, identifier, result, &mut failed, &mut errors)
                    .await;
            }

            if interrupted {
                while let Some(Some((identifier, result))) = work.next().now_or_never() {
                    self.record(scope, current, identifier, result, &mut failed, &mut errors)
                        .await;
                }
                if !work.is_empty() {
                    warn!(scope, in_flight = work.len(), "Canceled with lifecycle calls in flight");
                }
                errors.push(Error::Canceled);
                break;
            }
        }

        match Error::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Persist one finished lifecycle call, or note its failure.
    async fn record(
        &self,
        scope: &str,
        current: &mut State,
        identifier: Identifier,
        result: Result<ApplyOutcome>,
        failed: &mut HashSet<Identifier>,
        errors: &mut Vec<Error>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(scope, resource = %identifier, error = %err, "Resource failed");
                failed.insert(identifier);
                errors.push(err);
                return;
            }
        };

        let persisted = match &outcome {
            ApplyOutcome::Persist(data) => self.store.put(scope, data).await,
            ApplyOutcome::Remove(id) => self.store.delete(scope, id).await,
        };
        match persisted {
            Ok(()) => current.apply(outcome),
            Err(err) => {
                failed.insert(identifier);
                errors.push(err);
            }
        }
    }

    async fn run_event(
        &self,
        event: Event,
        state: &State,
        log: &TaskLogger,
    ) -> (Identifier, Result<ApplyOutcome>) {
        let identifier = event.resource.identifier.clone();
        let action = event.event_type;
        let lifecycle = |source| Error::Lifecycle {
            action,
            identifier: identifier.clone(),
            source: Box::new(source),
        };

        let target = match self.router.resolve(&event.resource.executor, state).await {
            Ok(target) => target,
            Err(err) => {
                log.log(format!("error while {} {}: {}", action.progressive(), identifier, err))
                    .await;
                return (identifier.clone(), Err(lifecycle(err)));
            }
        };

        log.log(format!("{} {} on {}", action.progressive(), identifier, target))
            .await;
        let start = Instant::now();
        let result = self.router.dispatch_to(&target, event, state.clone()).await;

        match result {
            Ok(outcome) => {
                log.log(format!(
                    "finished {} {} (took {:?})",
                    action.progressive(),
                    identifier,
                    start.elapsed()
                ))
                .await;
                (identifier.clone(), Ok(outcome))
            }
            Err(err) => {
                log.log(format!("error while {} {}: {}", action.progressive(), identifier, err))
                    .await;
                (identifier.clone(), Err(lifecycle(err)))
            }
        }
    }
}

fn plan_options(options: &ReconcileOptions) -> PlanOptions {
    PlanOptions {
        force_update: options.force_update,
    }
}

fn desired_graph_check(current: &State, desired: &State) -> Result<()> {
    crate::graph::ResourceGraph::build(desired.iter(), |id| current.contains(id))?.layers()?;
    Ok(())
}

/// A failed resource that `event` must wait for, if any.
///
/// Creates and updates wait on their dependencies; deletes wait on the
/// resources that depended on them.
fn blocker(event: &Event, failed: &HashSet<Identifier>, before: &State) -> Option<Identifier> {
    if failed.is_empty() {
        return None;
    }
    let identifier = &event.resource.identifier;
    match event.event_type {
        EventType::Delete => {
            let mut dependents: Vec<&Identifier> = failed
                .iter()
                .filter(|f| {
                    before
                        .get(f)
                        .is_some_and(|data| data.dependencies.contains(identifier))
                })
                .collect();
            dependents.sort();
            dependents.first().map(|id| (*id).clone())
        }
        _ => event
            .resource
            .dependencies
            .iter()
            .find(|d| failed.contains(*d))
            .cloned(),
    }
}

fn is_canceled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

async fn canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without canceling.
            std::future::pending::<()>().await;
        }
    }
}
