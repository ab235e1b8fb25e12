use super::transform::{AesGcmTransformer, Codec, KeyTransformer, Pipeline, PrefixKeyTransformer, ValueTransformer};
use crate::config::StateConfig;
use crate::core::{Key, MappingError, Result};
use crate::mapping::index::{IndexEngine, IndexReader, KeyRef, derive_key_refs, diff};
use crate::mapping::{AnyMapping, Entity, EntityList, Lookup, StateMapping, StateMappings};
use crate::storage::{KvEntry, KvStore};
use std::any::TypeId;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Typed entity access over a key-value store.
///
/// Every call is a plain sequence of store reads and writes issued in the
/// caller's transaction; nothing is cached between calls.
pub struct MappedState<'m, S> {
    pub(super) store: S,
    pub(super) mappings: &'m StateMappings,
    pub(super) pipeline: Pipeline,
    pub(super) config: StateConfig,
}

impl<'m, S: KvStore> MappedState<'m, S> {
    pub fn new(store: S, mappings: &'m StateMappings) -> Self {
        Self {
            store,
            mappings,
            pipeline: Pipeline::default(),
            config: StateConfig::default(),
        }
    }

    /// Build a state with the transformers a config asks for.
    pub fn with_config(store: S, mappings: &'m StateMappings, config: StateConfig) -> Result<Self> {
        config.validate()?;
        let mut pipeline = Pipeline::new(config.codec);
        if !config.key_prefix.is_empty() {
            pipeline.set_key_transformer(Arc::new(PrefixKeyTransformer::new(
                config.key_prefix.iter().cloned(),
            )?));
        }
        if let Some(key) = &config.encryption_key {
            pipeline.push_value_transformer(Arc::new(AesGcmTransformer::new(key)?));
        }
        Ok(Self {
            store,
            mappings,
            pipeline,
            config,
        })
    }

    pub fn use_key_transformer(mut self, transformer: impl KeyTransformer + 'static) -> Self {
        self.pipeline.set_key_transformer(Arc::new(transformer));
        self
    }

    /// Append a value transformer; runs after serialization on writes.
    pub fn use_value_transformer(mut self, transformer: impl ValueTransformer + 'static) -> Self {
        self.pipeline.push_value_transformer(Arc::new(transformer));
        self
    }

    pub fn use_codec(mut self, codec: Codec) -> Self {
        self.pipeline.set_codec(codec);
        self
    }

    pub fn mappings(&self) -> &StateMappings {
        self.mappings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub(super) fn mapping<T: Entity>(&self) -> Result<&'m StateMapping<T>> {
        self.mappings.get::<T>()
    }

    pub(super) fn read_raw(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let store_key = self.pipeline.store_key(key)?;
        let value = self
            .store
            .get(&store_key)
            .map_err(|e| e.context("get", key))?;
        Ok(value.filter(|bytes| !bytes.is_empty()))
    }

    fn read_entity<T: Entity>(&self, key: &Key) -> Result<Option<T>> {
        match self.read_raw(key)? {
            Some(bytes) => self
                .pipeline
                .from_bytes(key, bytes)
                .map(Some)
                .map_err(|e| e.context("decode", key)),
            None => Ok(None),
        }
    }

    fn write_entity<T: Entity>(&mut self, key: &Key, entity: &T) -> Result<()> {
        let store_key = self.pipeline.store_key(key)?;
        let bytes = self
            .pipeline
            .to_bytes(key, entity)
            .map_err(|e| e.context("encode", key))?;
        self.store
            .put(&store_key, bytes)
            .map_err(|e| e.context("put", key))
    }

    /// Read the entity at a primary key.
    pub fn get<'a, T: Entity>(&self, lookup: impl Into<Lookup<'a, T>>) -> Result<T> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.key_for(&lookup.into())?;
        self.read_entity(&key)?
            .ok_or_else(|| MappingError::NotFound(key.to_string()))
    }

    /// Like [`get`](Self::get), with `None` for a missing entity.
    pub fn get_opt<'a, T: Entity>(&self, lookup: impl Into<Lookup<'a, T>>) -> Result<Option<T>> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.key_for(&lookup.into())?;
        self.read_entity(&key)
    }

    pub fn exists<'a, T: Entity>(&self, lookup: impl Into<Lookup<'a, T>>) -> Result<bool> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.key_for(&lookup.into())?;
        Ok(self.read_raw(&key)?.is_some())
    }

    /// Existence check for a raw key of any registered namespace.
    pub fn exists_key(&self, key: &Key) -> Result<bool> {
        let mapping = self.mappings.resolve_key(key)?;
        if key.len() <= mapping.namespace().len() {
            return Err(MappingError::InvalidArgument(format!(
                "{key} names a namespace, not an entry"
            )));
        }
        Ok(self.read_raw(key)?.is_some())
    }

    /// Mapping that owns a raw key.
    pub fn resolve(&self, key: &Key) -> Result<&'m dyn AnyMapping> {
        self.mappings.resolve_key(key)
    }

    /// Store a new entity; fails if its primary key is taken.
    pub fn insert<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.primary_key(entity)?;
        let span = info_span!("statemap.insert", key = %key);
        let _enter = span.enter();

        mapping.validate(entity)?;
        if self.read_raw(&key)?.is_some() {
            return Err(MappingError::AlreadyExists(key.to_string()));
        }

        let refs = derive_key_refs(mapping, entity, &key)?;
        let changes = diff(&[], &refs);
        IndexEngine::new(&mut self.store, &self.pipeline)
            .apply_diff(&changes, &key)
            .inspect_err(|err| event!(Level::DEBUG, error = %err, "key refs not applied"))?;
        self.write_entity(&key, entity)?;

        event!(Level::DEBUG, refs = changes.to_insert.len(), "entity inserted");
        Ok(())
    }

    /// Insert or replace an entity, moving its index references.
    pub fn put<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.primary_key(entity)?;
        let span = info_span!("statemap.put", key = %key);
        let _enter = span.enter();

        mapping.validate(entity)?;
        let new_refs = derive_key_refs(mapping, entity, &key)?;
        let old_refs = match self.read_entity::<T>(&key)? {
            Some(previous) => derive_key_refs(mapping, &previous, &key)?,
            None => Vec::new(),
        };
        let changes = diff(&old_refs, &new_refs);
        IndexEngine::new(&mut self.store, &self.pipeline)
            .apply_diff(&changes, &key)
            .inspect_err(|err| event!(Level::DEBUG, error = %err, "key refs not applied"))?;
        self.write_entity(&key, entity)?;

        event!(
            Level::DEBUG,
            removed = changes.to_delete.len(),
            added = changes.to_insert.len(),
            "entity stored"
        );
        Ok(())
    }

    /// Remove an entity and every index reference it holds.
    pub fn delete<'a, T: Entity>(&mut self, lookup: impl Into<Lookup<'a, T>>) -> Result<()> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.key_for(&lookup.into())?;
        let span = info_span!("statemap.delete", key = %key);
        let _enter = span.enter();

        let current: T = self
            .read_entity(&key)?
            .ok_or_else(|| MappingError::NotFound(key.to_string()))?;
        let changes = diff(&derive_key_refs(mapping, &current, &key)?, &[]);

        let store_key = self.pipeline.store_key(&key)?;
        self.store
            .delete(&store_key)
            .map_err(|e| e.context("delete", &key))?;
        IndexEngine::new(&mut self.store, &self.pipeline)
            .write_diff(&changes)
            .inspect_err(|err| event!(Level::ERROR, error = %err, "key ref delete failed"))?;

        event!(Level::DEBUG, refs = changes.to_delete.len(), "entity deleted");
        Ok(())
    }

    /// Index references `entity` would hold if stored now.
    pub fn key_refs<T: Entity>(&self, entity: &T) -> Result<Vec<KeyRef>> {
        let mapping = self.mapping::<T>()?;
        let key = mapping.primary_key(entity)?;
        derive_key_refs(mapping, entity, &key)
    }

    /// Entity referenced by an index value.
    ///
    /// On a non-unique index the first match in key order is returned.
    pub fn get_by_index<T: Entity>(&self, index: &str, index_parts: &[&str]) -> Result<T> {
        let parts: Vec<String> = index_parts.iter().map(|p| p.to_string()).collect();
        let rendered = format!("{index}: {}", parts.join(" | "));
        let key_ref = self
            .find_refs::<T>(index, &parts, true)?
            .into_iter()
            .next()
            .ok_or_else(|| MappingError::NotFound(rendered.clone()))?;
        self.read_entity(&key_ref.primary_key)?
            .ok_or_else(|| MappingError::NotFound(format!("{rendered} -> {}", key_ref.primary_key)))
    }

    /// Every entity referenced by an index value.
    pub fn list_by_index<T: Entity>(&self, index: &str, index_parts: &[&str]) -> Result<Vec<T>> {
        let parts: Vec<String> = index_parts.iter().map(|p| p.to_string()).collect();
        let mut items = Vec::new();
        for key_ref in self.find_refs::<T>(index, &parts, false)? {
            if let Some(entity) = self.read_entity(&key_ref.primary_key)? {
                items.push(entity);
            }
        }
        Ok(items)
    }

    fn find_refs<T: Entity>(&self, index: &str, parts: &[String], first_only: bool) -> Result<Vec<KeyRef>> {
        let mapping = self.mapping::<T>()?;
        let def = mapping.find_index(index)?;
        let prefix = KeyRef::lookup_prefix(mapping.namespace_ref(), index, parts);

        let engine = IndexReader::new(&self.store, &self.pipeline);
        if def.is_unique() {
            return Ok(engine.read(&prefix)?.into_iter().collect());
        }
        let mut refs: Vec<KeyRef> = engine
            .scan(&prefix)?
            .into_iter()
            .filter(|r| r.index_parts.as_slice() == parts)
            .collect();
        if first_only {
            refs.truncate(1);
        }
        Ok(refs)
    }

    /// Every entity of `T`, in key order.
    pub fn list<T: Entity>(&self) -> Result<Vec<T>> {
        let namespace = self.mapping::<T>()?.namespace_ref().clone();
        self.list_under(&namespace)
    }

    /// Entities whose primary-key suffix starts with `partial`.
    pub fn list_with<T: Entity>(&self, partial: &[&str]) -> Result<Vec<T>> {
        let prefix = self
            .mapping::<T>()?
            .namespace_ref()
            .child(partial.iter().copied());
        self.list_under(&prefix)
    }

    /// Every entity of `T`, wrapped in the mapping's declared list container.
    pub fn list_container<T: Entity, C: EntityList<T>>(&self) -> Result<C> {
        let mapping = self.mapping::<T>()?;
        match mapping.list_shape() {
            Some(shape) if shape.type_id == TypeId::of::<C>() => Ok(C::from_items(self.list()?)),
            _ => Err(MappingError::ListContainerUndefined(format!(
                "{} as {}",
                mapping.namespace_ref(),
                std::any::type_name::<C>()
            ))),
        }
    }

    pub(super) fn list_under<T: Entity>(&self, prefix: &Key) -> Result<Vec<T>> {
        let store_prefix = self.pipeline.store_key(prefix)?;
        let entries = self
            .store
            .scan_prefix(&store_prefix)
            .map_err(|e| e.context("scan", prefix))?;
        let mut items = Vec::new();
        for entry in entries {
            if let Some(entity) = self.decode_owned(entry)? {
                items.push(entity);
            }
        }
        Ok(items)
    }

    /// Decode a scanned entry unless a nested namespace of another mapping
    /// owns its key.
    pub(super) fn decode_owned<T: Entity>(&self, entry: KvEntry) -> Result<Option<T>> {
        let key = self.pipeline.logical_key(&entry.key)?;
        match self.mappings.resolve_key(&key) {
            Ok(owner) if owner.entity_type() == TypeId::of::<T>() => self
                .pipeline
                .from_bytes(&key, entry.value)
                .map(Some)
                .map_err(|e| e.context("decode", &key)),
            _ => Ok(None),
        }
    }
}
