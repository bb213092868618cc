//! Resource type registry.
//!
//! Maps a type tag to a factory so stored records can be rehydrated into
//! boxed resources without knowing their concrete type, and so typed lookups
//! can check a record's tag against the type asked for.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::resource::{Resource, ResourceData};
use crate::state::State;

type Factory<C> = fn(&ResourceData) -> Result<Box<dyn Resource<C>>>;

pub struct Registry<C> {
    factories: HashMap<String, Factory<C>>,
    types: HashMap<String, TypeId>,
}

impl<C> Default for Registry<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Registry<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Register `T` under `resource_type`. Re-registering a tag replaces it.
    pub fn register<T>(&mut self, resource_type: &str)
    where
        T: Resource<C> + DeserializeOwned + 'static,
    {
        self.factories
            .insert(resource_type.to_string(), build::<C, T> as Factory<C>);
        self.types
            .insert(resource_type.to_string(), TypeId::of::<T>());
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.factories.contains_key(resource_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Rehydrate a stored record.
    pub fn resolve(&self, data: &ResourceData) -> Result<Box<dyn Resource<C>>> {
        let factory = self
            .factories
            .get(&data.identifier.resource_type)
            .ok_or_else(|| Error::UnknownResourceType(data.identifier.resource_type.clone()))?;
        let resource = factory(data)?;

        let actual = resource.identifier();
        if actual != data.identifier {
            return Err(Error::TypeMismatch {
                expected: data.identifier.clone(),
                actual,
            });
        }
        Ok(resource)
    }

    /// Typed lookup of a record in `state`.
    ///
    /// The record's tag must be the one `T` is registered under.
    pub fn get<T>(&self, state: &State, identifier: &Identifier) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let data = state
            .get(identifier)
            .ok_or_else(|| Error::not_found(identifier))?;
        let tag = &data.identifier.resource_type;
        let registered = self
            .types
            .get(tag)
            .ok_or_else(|| Error::UnknownResourceType(tag.clone()))?;
        if *registered != TypeId::of::<T>() {
            let expected = self
                .types
                .iter()
                .find(|(_, id)| **id == TypeId::of::<T>())
                .map(|(tag, _)| tag.as_str())
                .unwrap_or(type_name::<T>());
            return Err(Error::TypeMismatch {
                expected: Identifier::new(&identifier.id, expected),
                actual: data.identifier.clone(),
            });
        }
        Ok(serde_json::from_value(data.attributes.clone())?)
    }
}

fn build<C, T>(data: &ResourceData) -> Result<Box<dyn Resource<C>>>
where
    C: Send + Sync + 'static,
    T: Resource<C> + DeserializeOwned + 'static,
{
    let resource: T = serde_json::from_value(data.attributes.clone())?;
    Ok(Box::new(resource))
}

/// Typed lookup of a record in `state`, without a registry to check the
/// record's tag against.
pub fn from_state<T: DeserializeOwned>(state: &State, identifier: &Identifier) -> Result<T> {
    let data = state
        .get(identifier)
        .ok_or_else(|| Error::not_found(identifier))?;
    Ok(serde_json::from_value(data.attributes.clone())?)
}
