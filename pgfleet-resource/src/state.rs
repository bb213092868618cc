//! Resource state of one reconciliation scope, and planning against it.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{ApplyOutcome, Event, EventReason, EventType, Plan};
use crate::graph::ResourceGraph;
use crate::identifier::Identifier;
use crate::resource::{Resource, ResourceData};

/// Records keyed by type, then ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    resources: BTreeMap<String, BTreeMap<String, ResourceData>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Update every existing resource even without a diff.
    pub force_update: bool,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, data: ResourceData) {
        self.resources
            .entry(data.identifier.resource_type.clone())
            .or_default()
            .insert(data.identifier.id.clone(), data);
    }

    pub fn add_resource<C, R>(&mut self, resource: &R) -> Result<()>
    where
        C: Send + Sync + 'static,
        R: Resource<C> + ?Sized,
    {
        self.add(ResourceData::from_resource(resource)?);
        Ok(())
    }

    pub fn remove(&mut self, identifier: &Identifier) -> Option<ResourceData> {
        let by_id = self.resources.get_mut(&identifier.resource_type)?;
        let removed = by_id.remove(&identifier.id);
        if by_id.is_empty() {
            self.resources.remove(&identifier.resource_type);
        }
        removed
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&ResourceData> {
        self.resources
            .get(&identifier.resource_type)?
            .get(&identifier.id)
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.get(identifier).is_some()
    }

    pub fn get_all(&self, resource_type: &str) -> impl Iterator<Item = &ResourceData> {
        self.resources
            .get(resource_type)
            .into_iter()
            .flat_map(|by_id| by_id.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceData> {
        self.resources.values().flat_map(|by_id| by_id.values())
    }

    pub fn len(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn has_resources(&self, identifiers: &[Identifier]) -> bool {
        identifiers.iter().all(|id| self.contains(id))
    }

    pub fn apply(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Persist(data) => self.add(data),
            ApplyOutcome::Remove(identifier) => {
                self.remove(&identifier);
            }
        }
    }

    /// Dependency-first layers. Every dependency must be present.
    pub fn creation_ordered(&self) -> Result<Vec<Vec<Identifier>>> {
        ResourceGraph::build(self.iter(), |_| false)?.layers()
    }

    /// Dependents-first layers, the exact reverse of creation order.
    ///
    /// Tolerates dependencies that are no longer present, since a refresh
    /// may have dropped them.
    pub fn deletion_ordered(&self) -> Result<Vec<Vec<Identifier>>> {
        let mut layers = ResourceGraph::build(self.iter(), |_| true)?.layers()?;
        layers.reverse();
        Ok(layers)
    }

    /// One refresh event per record, in dependency order.
    pub fn plan_refresh(&self) -> Result<Plan> {
        let layers = ResourceGraph::build(self.iter(), |_| true)?.layers()?;
        let phases = layers
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter_map(|id| self.get(&id).cloned())
                    .map(|data| Event::new(EventType::Refresh, None, data))
                    .collect()
            })
            .collect();
        Ok(Plan { phases })
    }

    /// Events turning this (current) state into `desired`.
    ///
    /// Creates and updates come first in dependency order, then deletes of
    /// everything not desired in reverse dependency order. A resource whose
    /// dependency is created or updated in the same plan is updated too.
    ///
    /// Existing records a desired resource reaches through its dependencies
    /// count as desired and are never deleted.
    pub fn plan(&self, desired: &State, options: &PlanOptions) -> Result<Plan> {
        let layers = ResourceGraph::build(desired.iter(), |id| self.contains(id))?.layers()?;
        let retained = self.reachable_from(desired);

        let mut touched: HashSet<Identifier> = HashSet::new();
        let mut phases = Vec::new();

        for layer in layers {
            let mut phase = Vec::new();
            for id in layer {
                let Some(resource) = desired.get(&id) else {
                    continue;
                };
                if let Some(event) = self.plan_one(resource, &touched, options) {
                    touched.insert(id);
                    phase.push(event);
                }
            }
            if !phase.is_empty() {
                phases.push(phase);
            }
        }

        for layer in self.deletion_ordered()? {
            let phase: Vec<Event> = layer
                .into_iter()
                .filter(|id| !desired.contains(id) && !retained.contains(id))
                .filter_map(|id| self.get(&id).cloned())
                .map(|data| Event::new(EventType::Delete, None, data))
                .collect();
            if !phase.is_empty() {
                phases.push(phase);
            }
        }

        Ok(Plan { phases })
    }

    /// Records outside `desired` that a desired resource depends on,
    /// directly or through other such records.
    fn reachable_from(&self, desired: &State) -> HashSet<Identifier> {
        let mut reached = HashSet::new();
        let mut pending: Vec<&Identifier> = desired
            .iter()
            .flat_map(|data| data.dependencies.iter())
            .collect();
        while let Some(id) = pending.pop() {
            if desired.contains(id) || reached.contains(id) {
                continue;
            }
            let Some(data) = self.get(id) else {
                continue;
            };
            reached.insert(id.clone());
            pending.extend(data.dependencies.iter());
        }
        reached
    }

    fn plan_one(
        &self,
        resource: &ResourceData,
        touched: &HashSet<Identifier>,
        options: &PlanOptions,
    ) -> Option<Event> {
        let create = |reason| Some(Event::new(EventType::Create, Some(reason), resource.clone()));
        let update = |reason| Some(Event::new(EventType::Update, Some(reason), resource.clone()));

        let Some(current) = self.get(&resource.identifier) else {
            return create(EventReason::DoesNotExist);
        };
        if current.needs_recreate {
            return create(EventReason::NeedsRecreate);
        }
        if current.resource_version != resource.resource_version {
            return create(EventReason::VersionChanged);
        }

        let diff = current.diff(resource);
        if !diff.is_empty() {
            return update(EventReason::HasDiff).map(|e| e.with_diff(diff));
        }
        if options.force_update {
            return update(EventReason::ForceUpdate);
        }
        if resource.dependencies.iter().any(|d| touched.contains(d)) {
            return update(EventReason::DependencyUpdated);
        }
        None
    }
}
