//! Events, plans and plan summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diff::DiffOp;
use crate::identifier::Identifier;
use crate::resource::ResourceData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Refresh,
    Create,
    Update,
    Delete,
}

impl EventType {
    /// Present participle used in task log lines ("creating ...").
    pub fn progressive(self) -> &'static str {
        match self {
            EventType::Refresh => "refreshing",
            EventType::Create => "creating",
            EventType::Update => "updating",
            EventType::Delete => "deleting",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Refresh => "refresh",
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Why the planner scheduled an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReason {
    DoesNotExist,
    NeedsRecreate,
    VersionChanged,
    HasDiff,
    ForceUpdate,
    DependencyUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EventReason>,
    pub resource: ResourceData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<DiffOp>,
}

impl Event {
    pub fn new(event_type: EventType, reason: Option<EventReason>, resource: ResourceData) -> Self {
        Self {
            event_type,
            reason,
            resource,
            diff: Vec::new(),
        }
    }

    pub fn with_diff(mut self, diff: Vec<DiffOp>) -> Self {
        self.diff = diff;
        self
    }

    pub fn identifier(&self) -> &Identifier {
        &self.resource.identifier
    }
}

/// What applying an event does to the scope's state.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Store this (hydrated) record.
    Persist(ResourceData),
    /// Drop the record: it was deleted, or refresh found it gone.
    Remove(Identifier),
}

impl ApplyOutcome {
    pub fn identifier(&self) -> &Identifier {
        match self {
            ApplyOutcome::Persist(data) => &data.identifier,
            ApplyOutcome::Remove(identifier) => identifier,
        }
    }
}

/// Ordered phases of events. Events within a phase are independent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub phases: Vec<Vec<Event>>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.phases.iter().all(Vec::is_empty)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.phases.iter().flatten()
    }

    pub fn summary(&self) -> PlanSummary {
        let phases = self
            .phases
            .iter()
            .map(|phase| {
                let mut events: Vec<EventSummary> = phase.iter().map(EventSummary::from).collect();
                events.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
                events
            })
            .collect();
        PlanSummary { phases }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource_id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EventReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<DiffOp>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            event_type: event.event_type,
            resource_id: event.resource.identifier.clone(),
            reason: event.reason,
            diff: event.diff.clone(),
        }
    }
}

/// User-facing rendition of a plan, persisted per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub phases: Vec<Vec<EventSummary>>,
}

impl PlanSummary {
    /// Phase index of the first event touching `identifier`.
    pub fn phase_of(&self, identifier: &Identifier) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|e| &e.resource_id == identifier))
    }
}
