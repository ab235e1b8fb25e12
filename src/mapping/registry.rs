use super::schema::{AnyMapping, Entity, StateMapping};
use crate::core::{Key, MappingError, Result};
use log::warn;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of state mappings, looked up by Rust type or by namespace.
///
/// Built once by the application's composition root and read-only after
/// that. Registration returns a new registry (copy-on-write), so clones
/// handed to running code never change underneath it.
#[derive(Clone)]
pub struct StateMappings {
    by_type: Arc<HashMap<TypeId, Arc<dyn AnyMapping>>>,
    /// Keyed by encoded namespace key.
    by_namespace: Arc<HashMap<String, Arc<dyn AnyMapping>>>,
}

impl StateMappings {
    pub fn new() -> Self {
        Self {
            by_type: Arc::new(HashMap::new()),
            by_namespace: Arc::new(HashMap::new()),
        }
    }

    /// Register a mapping - returns a NEW registry.
    ///
    /// Registering a type again replaces its previous mapping.
    pub fn with_mapping<T: Entity>(self, mapping: StateMapping<T>) -> Result<Self> {
        let mapping = mapping.seal()?;
        let type_id = TypeId::of::<T>();
        let namespace = mapping.namespace_ref().encode();

        let mut by_type = (*self.by_type).clone();
        let mut by_namespace = (*self.by_namespace).clone();

        if let Some(previous) = by_type.get(&type_id) {
            warn!(
                "state mapping for {} re-registered, replacing namespace '{}'",
                mapping.schema_name(),
                previous.namespace()
            );
            let previous_namespace = previous.namespace().encode();
            if by_namespace
                .get(&previous_namespace)
                .is_some_and(|m| m.entity_type() == type_id)
            {
                by_namespace.remove(&previous_namespace);
            }
        }
        if let Some(other) = by_namespace.get(&namespace)
            && other.entity_type() != type_id
        {
            warn!(
                "namespace '{}' moved from {} to {}",
                mapping.namespace_ref(),
                other.schema_name(),
                mapping.schema_name()
            );
        }

        let mapping: Arc<dyn AnyMapping> = Arc::new(mapping);
        by_type.insert(type_id, Arc::clone(&mapping));
        by_namespace.insert(namespace, mapping);

        Ok(Self {
            by_type: Arc::new(by_type),
            by_namespace: Arc::new(by_namespace),
        })
    }

    /// Typed mapping of `T`.
    pub fn get<T: Entity>(&self) -> Result<&StateMapping<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|mapping| mapping.as_any().downcast_ref::<StateMapping<T>>())
            .ok_or_else(|| MappingError::MappingNotFound(std::any::type_name::<T>().to_string()))
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Mapping registered under exactly this namespace.
    pub fn resolve_namespace(&self, namespace: &Key) -> Result<&dyn AnyMapping> {
        self.by_namespace
            .get(&namespace.encode())
            .map(|mapping| &**mapping)
            .ok_or_else(|| MappingError::MappingNotFound(namespace.to_string()))
    }

    /// Mapping whose namespace is the longest prefix of a raw key.
    pub fn resolve_key(&self, key: &Key) -> Result<&dyn AnyMapping> {
        let parts = key.parts();
        (1..=parts.len())
            .rev()
            .find_map(|len| {
                let prefix = Key::new(parts[..len].to_vec()).ok()?;
                self.by_namespace.get(&prefix.encode())
            })
            .map(|mapping| &**mapping)
            .ok_or_else(|| MappingError::MappingNotFound(key.to_string()))
    }

    /// Primary key of any registered entity.
    pub fn primary_key<T: Entity>(&self, entity: &T) -> Result<Key> {
        self.get::<T>()?.primary_key(entity)
    }

    pub fn namespaces(&self) -> Vec<&Key> {
        let mut namespaces: Vec<&Key> = self.by_namespace.values().map(|m| m.namespace()).collect();
        namespaces.sort();
        namespaces
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Default for StateMappings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Car {
        id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Owner {
        name: String,
    }

    fn car_mapping() -> StateMapping<Car> {
        StateMapping::new()
            .field("id", |c: &Car| c.id.clone())
            .primary_key_fields(["id"])
    }

    #[test]
    fn test_resolve_by_type_and_key() {
        let mappings = StateMappings::new().with_mapping(car_mapping()).unwrap();
        assert!(mappings.contains::<Car>());

        let key = mappings.primary_key(&Car { id: "A1".into() }).unwrap();
        assert_eq!(key, Key::of(["Car", "A1"]).unwrap());

        let resolved = mappings.resolve_key(&key).unwrap();
        assert_eq!(resolved.entity_type(), TypeId::of::<Car>());
        assert_eq!(resolved.namespace(), &Key::namespace_only("Car"));
    }

    #[test]
    fn test_unregistered_lookups() {
        let mappings = StateMappings::new().with_mapping(car_mapping()).unwrap();
        assert_eq!(mappings.get::<Owner>().unwrap_err().kind(), ErrorKind::MappingNotFound);

        let key = Key::of(["Owner", "bob"]).unwrap();
        let err = mappings.resolve_key(&key).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MappingNotFound);
    }

    #[test]
    fn test_longest_namespace_wins() {
        let mappings = StateMappings::new()
            .with_mapping(car_mapping())
            .unwrap()
            .with_mapping(
                StateMapping::<Owner>::new()
                    .namespace_key(Key::of(["Car", "owners"]).unwrap())
                    .field("name", |o: &Owner| o.name.clone())
                    .primary_key_fields(["name"]),
            )
            .unwrap();

        let owner_key = Key::of(["Car", "owners", "bob"]).unwrap();
        assert_eq!(
            mappings.resolve_key(&owner_key).unwrap().entity_type(),
            TypeId::of::<Owner>()
        );
        let car_key = Key::of(["Car", "A1"]).unwrap();
        assert_eq!(
            mappings.resolve_key(&car_key).unwrap().entity_type(),
            TypeId::of::<Car>()
        );
    }

    #[test]
    fn test_re_registration_last_write_wins() {
        let original = StateMappings::new().with_mapping(car_mapping()).unwrap();
        let replaced = original
            .clone()
            .with_mapping(car_mapping().namespace("Vehicle"))
            .unwrap();

        assert_eq!(replaced.len(), 1);
        assert_eq!(
            replaced.get::<Car>().unwrap().namespace_ref(),
            &Key::namespace_only("Vehicle")
        );
        assert!(replaced.resolve_namespace(&Key::namespace_only("Car")).is_err());

        // The earlier registry handle is untouched.
        assert_eq!(
            original.get::<Car>().unwrap().namespace_ref(),
            &Key::namespace_only("Car")
        );
    }
}
