use super::index::IndexDef;
use crate::core::{KEY_REF_NAMESPACE, Key, MappingError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Anything that can be stored through a mapping.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Reads one named field of an entity as a key segment.
pub type FieldAccessor<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Derives a primary-key suffix directly from an entity.
pub type PrimaryKeyFn<T> = Arc<dyn Fn(&T) -> Result<Vec<String>> + Send + Sync>;

/// Entity-level validation run before every insert and put.
pub type Validator<T> = Arc<dyn Fn(&T) -> std::result::Result<(), String> + Send + Sync>;

/// Container type returned by `MappedState::list_container`.
pub trait EntityList<T>: Sized + 'static {
    fn from_items(items: Vec<T>) -> Self;
}

/// Declared list container of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListShape {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

pub(crate) enum PrimaryKeyer<T> {
    Fields(Vec<String>),
    Resolved(Vec<FieldAccessor<T>>),
    Custom(PrimaryKeyFn<T>),
}

/// How to address an entity: by value, by full key, or by primary-key suffix.
pub enum Lookup<'a, T> {
    Entity(&'a T),
    Key(Key),
    Id(Vec<String>),
}

impl<'a, T: Entity> From<&'a T> for Lookup<'a, T> {
    fn from(entity: &'a T) -> Self {
        Lookup::Entity(entity)
    }
}

impl<T> From<Key> for Lookup<'_, T> {
    fn from(key: Key) -> Self {
        Lookup::Key(key)
    }
}

impl<T> Lookup<'_, T> {
    /// Primary-key suffix lookup.
    pub fn id<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Lookup::Id(parts.into_iter().map(Into::into).collect())
    }
}

/// Mapping of one entity type onto the key space.
///
/// Built with chained calls, then handed to [`StateMappings::with_mapping`]
/// which resolves field names against the accessor table and freezes it.
///
/// [`StateMappings::with_mapping`]: super::StateMappings::with_mapping
pub struct StateMapping<T> {
    namespace: Key,
    schema_name: &'static str,
    fields: Vec<(String, FieldAccessor<T>)>,
    primary_key: Option<PrimaryKeyer<T>>,
    indexes: Vec<IndexDef<T>>,
    list: Option<ListShape>,
    validator: Option<Validator<T>>,
}

impl<T: Entity> StateMapping<T> {
    /// New mapping whose namespace is the short type name of `T`.
    pub fn new() -> Self {
        let schema_name = std::any::type_name::<T>();
        Self {
            namespace: Key::namespace_only(short_type_name(schema_name)),
            schema_name,
            fields: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            list: None,
            validator: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<Key>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Multi-segment namespace.
    pub fn namespace_key(mut self, namespace: Key) -> Self {
        self.namespace = namespace;
        self
    }

    /// Add a field to the accessor table.
    pub fn field<F>(mut self, name: &str, accessor: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.fields.retain(|(existing, _)| existing != name);
        self.fields.push((name.to_string(), Arc::new(accessor)));
        self
    }

    /// Primary key made of the given fields, in order.
    pub fn primary_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(PrimaryKeyer::Fields(
            fields.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Primary key computed by a function of the whole entity.
    pub fn primary_keyer<F>(mut self, keyer: F) -> Self
    where
        F: Fn(&T) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        self.primary_key = Some(PrimaryKeyer::Custom(Arc::new(keyer)));
        self
    }

    pub fn index(mut self, index: IndexDef<T>) -> Self {
        self.indexes.retain(|existing| existing.name() != index.name());
        self.indexes.push(index);
        self
    }

    /// Shorthand for a unique index over fields.
    pub fn unique_index<I, S>(self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index(IndexDef::fields(name, fields).unique())
    }

    /// Declare the container type `list_container` builds.
    pub fn list<C: EntityList<T>>(mut self) -> Self {
        self.list = Some(ListShape {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
        });
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Resolve field references and check the definition.
    pub(crate) fn seal(mut self) -> Result<Self> {
        if self.namespace.namespace() == KEY_REF_NAMESPACE {
            return Err(MappingError::InvalidArgument(format!(
                "namespace '{KEY_REF_NAMESPACE}' is reserved for index references"
            )));
        }

        if let Some(PrimaryKeyer::Fields(names)) = &self.primary_key {
            if names.is_empty() {
                return Err(MappingError::InvalidArgument(format!(
                    "primary key of '{}' has no fields",
                    self.namespace
                )));
            }
            let accessors = self.resolve_fields(names)?;
            self.primary_key = Some(PrimaryKeyer::Resolved(accessors));
        }

        let mut seen = HashSet::new();
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for index in std::mem::take(&mut self.indexes) {
            if !seen.insert(index.name().to_string()) {
                return Err(MappingError::InvalidArgument(format!(
                    "duplicate index '{}' on '{}'",
                    index.name(),
                    self.namespace
                )));
            }
            indexes.push(index.resolve(|names| self.resolve_fields(names))?);
        }
        self.indexes = indexes;

        Ok(self)
    }

    fn resolve_fields(&self, names: &[String]) -> Result<Vec<FieldAccessor<T>>> {
        names
            .iter()
            .map(|name| {
                self.fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .map(|(_, accessor)| Arc::clone(accessor))
                    .ok_or_else(|| {
                        MappingError::InvalidArgument(format!(
                            "unknown field '{}' on '{}'",
                            name, self.namespace
                        ))
                    })
            })
            .collect()
    }
}

impl<T: Entity> Default for StateMapping<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> StateMapping<T> {
    pub fn namespace_ref(&self) -> &Key {
        &self.namespace
    }

    pub fn schema_name(&self) -> &'static str {
        self.schema_name
    }

    pub fn indexes(&self) -> &[IndexDef<T>] {
        &self.indexes
    }

    pub fn find_index(&self, name: &str) -> Result<&IndexDef<T>> {
        self.indexes
            .iter()
            .find(|index| index.name() == name)
            .ok_or_else(|| {
                MappingError::InvalidArgument(format!(
                    "no index '{}' on '{}'",
                    name, self.namespace
                ))
            })
    }

    pub fn list_shape(&self) -> Option<ListShape> {
        self.list
    }

    pub fn has_primary_keyer(&self) -> bool {
        self.primary_key.is_some()
    }

    pub fn has_validation(&self) -> bool {
        self.validator.is_some()
    }

    pub fn validate(&self, entity: &T) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(entity).map_err(MappingError::Validation),
            None => Ok(()),
        }
    }

    /// `namespace ++ keyer(entity)`
    pub fn primary_key(&self, entity: &T) -> Result<Key> {
        let suffix: Vec<String> = match &self.primary_key {
            None => {
                return Err(MappingError::PrimaryKeyerUndefined(
                    self.namespace.to_string(),
                ));
            }
            Some(PrimaryKeyer::Resolved(accessors)) => {
                accessors.iter().map(|accessor| accessor(entity)).collect()
            }
            Some(PrimaryKeyer::Custom(keyer)) => keyer(entity)?,
            Some(PrimaryKeyer::Fields(_)) => {
                return Err(MappingError::InvalidArgument(format!(
                    "mapping '{}' used before registration",
                    self.namespace
                )));
            }
        };
        if suffix.is_empty() {
            return Err(MappingError::InvalidArgument(format!(
                "empty primary key for '{}'",
                self.namespace
            )));
        }
        Ok(self.namespace.child(suffix))
    }

    /// Resolve a lookup to the full primary key.
    pub fn key_for(&self, lookup: &Lookup<'_, T>) -> Result<Key> {
        match lookup {
            Lookup::Entity(entity) => self.primary_key(entity),
            Lookup::Key(key) => {
                if key.len() <= self.namespace.len() || !key.starts_with(&self.namespace) {
                    return Err(MappingError::MappingNotFound(key.to_string()));
                }
                Ok(key.clone())
            }
            Lookup::Id(parts) => {
                if parts.is_empty() {
                    return Err(MappingError::InvalidArgument(format!(
                        "empty id for '{}'",
                        self.namespace
                    )));
                }
                Ok(self.namespace.child(parts.iter().cloned()))
            }
        }
    }
}

impl<T> fmt::Debug for StateMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMapping")
            .field("namespace", &self.namespace)
            .field("schema", &self.schema_name)
            .field(
                "fields",
                &self.fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("indexes", &self.indexes)
            .field("list", &self.list)
            .finish()
    }
}

/// Type-erased view of a registered mapping.
pub trait AnyMapping: Send + Sync {
    fn namespace(&self) -> &Key;
    fn schema_name(&self) -> &'static str;
    fn entity_type(&self) -> TypeId;
    fn index_names(&self) -> Vec<&str>;
    fn has_primary_keyer(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> AnyMapping for StateMapping<T> {
    fn namespace(&self) -> &Key {
        &self.namespace
    }

    fn schema_name(&self) -> &'static str {
        self.schema_name
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(IndexDef::name).collect()
    }

    fn has_primary_keyer(&self) -> bool {
        self.primary_key.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `my_app::model::Account<u8>` -> `Account`
fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}
