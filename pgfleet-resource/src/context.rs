//! Per-invocation context handed to every lifecycle call.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::identifier::Identifier;
use crate::registry::Registry;
use crate::state::State;

/// The scope's state view plus the collaborators a resource may use.
pub struct Context<C> {
    state: State,
    registry: Arc<Registry<C>>,
    collaborators: Arc<C>,
}

impl<C> Context<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(state: State, registry: Arc<Registry<C>>, collaborators: Arc<C>) -> Self {
        Self {
            state,
            registry,
            collaborators,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn collaborators(&self) -> &C {
        &self.collaborators
    }

    /// Typed lookup of a resource already reconciled in this scope.
    ///
    /// Fails with `NotFound` when the dependency has not been reconciled, and
    /// with `TypeMismatch` when the record is not a `T`.
    pub fn get<T: DeserializeOwned + 'static>(&self, identifier: &Identifier) -> Result<T> {
        self.registry.get(&self.state, identifier)
    }
}
