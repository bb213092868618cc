//! Runs lifecycle methods, in-process or behind a host's job queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::Result;
use crate::event::{ApplyOutcome, Event, EventType};
use crate::executor::{Job, JobSender};
use crate::registry::Registry;
use crate::resource::ResourceData;
use crate::state::State;

/// Rehydrates an event's resource and invokes the matching lifecycle method
/// with this location's collaborators.
pub struct Runner<C> {
    registry: Arc<Registry<C>>,
    collaborators: Arc<C>,
}

impl<C> Clone for Runner<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            collaborators: Arc::clone(&self.collaborators),
        }
    }
}

impl<C> Runner<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(registry: Arc<Registry<C>>, collaborators: Arc<C>) -> Self {
        Self {
            registry,
            collaborators,
        }
    }

    pub fn collaborators(&self) -> &Arc<C> {
        &self.collaborators
    }

    pub async fn run(&self, event: Event, state: State) -> Result<ApplyOutcome> {
        let identifier = event.resource.identifier.clone();
        let mut resource = self.registry.resolve(&event.resource)?;
        let rc = Context::new(
            state,
            Arc::clone(&self.registry),
            Arc::clone(&self.collaborators),
        );

        match event.event_type {
            EventType::Refresh => match resource.refresh(&rc).await {
                Err(err) if err.is_not_found() => {
                    debug!(resource = %identifier, "Resource no longer exists");
                    return Ok(ApplyOutcome::Remove(identifier));
                }
                other => other?,
            },
            EventType::Create => resource.create(&rc).await?,
            EventType::Update => resource.update(&rc).await?,
            EventType::Delete => {
                resource.delete(&rc).await?;
                return Ok(ApplyOutcome::Remove(identifier));
            }
        }

        Ok(ApplyOutcome::Persist(ResourceData::from_resource(
            resource.as_ref(),
        )?))
    }
}

/// A host-local worker draining its job queue.
///
/// Jobs run concurrently; the dispatcher awaits each reply on its oneshot.
pub struct Worker<C> {
    host_id: String,
    runner: Runner<C>,
    jobs: mpsc::Receiver<Job>,
}

impl<C> Worker<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(host_id: &str, runner: Runner<C>, capacity: usize) -> (Self, JobSender) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = Self {
            host_id: host_id.to_string(),
            runner,
            jobs: rx,
        };
        (worker, tx)
    }

    /// Process jobs until every sender is dropped.
    pub async fn run(mut self) {
        info!(host = %self.host_id, "Worker started");

        while let Some(job) = self.jobs.recv().await {
            let runner = self.runner.clone();
            let host_id = self.host_id.clone();
            tokio::spawn(async move {
                let Job {
                    event,
                    state,
                    reply,
                } = job;
                debug!(host = %host_id, resource = %event.resource.identifier, action = %event.event_type, "Running job");
                let result = runner.run(event, state).await;
                if reply.send(result).is_err() {
                    debug!(host = %host_id, "Dispatcher went away before job completed");
                }
            });
        }

        info!(host = %self.host_id, "Worker stopped");
    }
}
