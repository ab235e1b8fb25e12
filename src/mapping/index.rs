// ============================================================================
// Secondary Indexes
// ============================================================================
//
// Each index maps an entity to zero or more index-key suffixes. Every
// suffix is materialized as a KeyRef record:
//
//   unique:      {"_idx", namespace, index, ..index_parts}
//   non-unique:  {"_idx", namespace, index, ..index_parts, ..primary_suffix}
//
// The namespace always takes one segment: its name when it has a single
// segment, otherwise its NUL-led encoding.
//
// The record value is the serialized KeyRef, so the referenced primary key
// is recoverable from the value alone. Updates write only the difference
// between the entity's old and new KeyRef sets.
//
// ============================================================================

use super::schema::{Entity, FieldAccessor, StateMapping};
use crate::core::{KEY_REF_NAMESPACE, Key, MappingError, Result};
use crate::state::transform::Pipeline;
use crate::storage::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

/// Custom index keyer; each inner vector is one index-key suffix.
pub type IndexKeyFn<T> = Arc<dyn Fn(&T) -> Result<Vec<Vec<String>>> + Send + Sync>;

enum IndexKeyer<T> {
    Fields(Vec<String>),
    Resolved(Vec<FieldAccessor<T>>),
    Custom(IndexKeyFn<T>),
}

/// Declaration of one secondary index.
pub struct IndexDef<T> {
    name: String,
    unique: bool,
    required: bool,
    keyer: IndexKeyer<T>,
}

impl<T: Entity> IndexDef<T> {
    /// Index over named fields of the accessor table.
    ///
    /// Yields one key per entity, or none when every field is empty.
    pub fn fields<I, S>(name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            unique: false,
            required: false,
            keyer: IndexKeyer::Fields(fields.into_iter().map(Into::into).collect()),
        }
    }

    /// Index with a keyer that may yield many keys (multi-valued).
    pub fn keyer<F>(name: &str, keyer: F) -> Self
    where
        F: Fn(&T) -> Result<Vec<Vec<String>>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            unique: false,
            required: false,
            keyer: IndexKeyer::Custom(Arc::new(keyer)),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub(crate) fn resolve<F>(mut self, resolve_fields: F) -> Result<Self>
    where
        F: FnOnce(&[String]) -> Result<Vec<FieldAccessor<T>>>,
    {
        if let IndexKeyer::Fields(names) = &self.keyer {
            if names.is_empty() {
                return Err(MappingError::InvalidArgument(format!(
                    "index '{}' has no fields",
                    self.name
                )));
            }
            self.keyer = IndexKeyer::Resolved(resolve_fields(names)?);
        }
        Ok(self)
    }

    /// Index-key suffixes of `entity`, deduplicated, in first-seen order.
    pub fn keys(&self, entity: &T) -> Result<Vec<Vec<String>>> {
        let raw = match &self.keyer {
            IndexKeyer::Resolved(accessors) => {
                let values: Vec<String> = accessors.iter().map(|accessor| accessor(entity)).collect();
                if values.iter().all(String::is_empty) {
                    Vec::new()
                } else {
                    vec![values]
                }
            }
            IndexKeyer::Custom(keyer) => keyer(entity)?,
            IndexKeyer::Fields(_) => {
                return Err(MappingError::InvalidArgument(format!(
                    "index '{}' used before registration",
                    self.name
                )));
            }
        };

        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(raw.len());
        for parts in raw {
            if parts.is_empty() {
                return Err(MappingError::InvalidArgument(format!(
                    "index '{}' produced an empty key",
                    self.name
                )));
            }
            if seen.insert(parts.clone()) {
                keys.push(parts);
            }
        }
        Ok(keys)
    }
}

impl<T> IndexDef<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl<T> fmt::Debug for IndexDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyer = match &self.keyer {
            IndexKeyer::Fields(names) => names.join(", "),
            IndexKeyer::Resolved(accessors) => format!("{} fields", accessors.len()),
            IndexKeyer::Custom(_) => "custom".to_string(),
        };
        if self.unique {
            write!(f, "UNIQUE {}({})", self.name, keyer)
        } else {
            write!(f, "{}({})", self.name, keyer)
        }
    }
}

/// Persisted secondary-index record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub namespace: Key,
    pub index: String,
    pub index_parts: Vec<String>,
    pub primary_key: Key,
    pub unique: bool,
}

impl KeyRef {
    /// Logical key the record is stored at.
    pub fn key(&self) -> Key {
        let mut key = Key::namespace_only(KEY_REF_NAMESPACE)
            .child([namespace_segment(&self.namespace)])
            .child([self.index.clone()])
            .child(self.index_parts.iter().cloned());
        if !self.unique {
            let owned = self.primary_key.parts();
            let start = if self.primary_key.starts_with(&self.namespace) {
                self.namespace.len()
            } else {
                1
            };
            key = key.child(owned[start.min(owned.len())..].iter().cloned());
        }
        key
    }

    /// Prefix shared by every record of `index` holding `index_parts`.
    pub fn lookup_prefix(namespace: &Key, index: &str, index_parts: &[String]) -> Key {
        Key::namespace_only(KEY_REF_NAMESPACE)
            .child([namespace_segment(namespace)])
            .child([index.to_string()])
            .child(index_parts.iter().cloned())
    }
}

/// A namespace folded into one key segment.
///
/// Single-segment namespaces stay readable; longer ones use their encoded
/// form, which starts with NUL and so never collides with a plain name.
fn namespace_segment(namespace: &Key) -> String {
    match namespace.parts() {
        [single] if !single.starts_with('\0') => single.clone(),
        _ => namespace.encode(),
    }
}

/// Result of [`diff`]: records to remove and records to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRefDiff {
    pub to_delete: Vec<KeyRef>,
    pub to_insert: Vec<KeyRef>,
}

impl KeyRefDiff {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }
}

/// All KeyRefs `entity` should have under `mapping`.
pub fn derive_key_refs<T: Entity>(
    mapping: &StateMapping<T>,
    entity: &T,
    primary_key: &Key,
) -> Result<Vec<KeyRef>> {
    let mut refs = Vec::new();
    for index in mapping.indexes() {
        let keys = index.keys(entity)?;
        if keys.is_empty() && index.is_required() {
            return Err(MappingError::RequiredIndexEmpty {
                namespace: mapping.namespace_ref().to_string(),
                index: index.name().to_string(),
            });
        }
        refs.extend(keys.into_iter().map(|index_parts| KeyRef {
            namespace: mapping.namespace_ref().clone(),
            index: index.name().to_string(),
            index_parts,
            primary_key: primary_key.clone(),
            unique: index.is_unique(),
        }));
    }
    Ok(refs)
}

/// Set difference of two KeyRef collections, keyed by encoded record key.
pub fn diff(old: &[KeyRef], new: &[KeyRef]) -> KeyRefDiff {
    let old_keys: HashSet<String> = old.iter().map(|r| r.key().encode()).collect();
    let new_keys: HashSet<String> = new.iter().map(|r| r.key().encode()).collect();

    let mut emitted = HashSet::new();
    let to_delete = old
        .iter()
        .filter(|r| {
            let encoded = r.key().encode();
            !new_keys.contains(&encoded) && emitted.insert(encoded)
        })
        .cloned()
        .collect();
    let to_insert = new
        .iter()
        .filter(|r| {
            let encoded = r.key().encode();
            !old_keys.contains(&encoded) && emitted.insert(encoded)
        })
        .cloned()
        .collect();

    KeyRefDiff {
        to_delete,
        to_insert,
    }
}

/// Reads KeyRef records through a store and value pipeline.
pub struct IndexReader<'a, S> {
    store: &'a S,
    pipeline: &'a Pipeline,
}

impl<'a, S: KvStore> IndexReader<'a, S> {
    pub fn new(store: &'a S, pipeline: &'a Pipeline) -> Self {
        Self { store, pipeline }
    }

    /// Read the KeyRef stored at `key`, if any.
    pub fn read(&self, key: &Key) -> Result<Option<KeyRef>> {
        let store_key = self.pipeline.store_key(key)?;
        match self
            .store
            .get(&store_key)
            .map_err(|e| e.context("get", key))?
        {
            Some(bytes) if !bytes.is_empty() => self
                .pipeline
                .from_bytes(key, bytes)
                .map(Some)
                .map_err(|e| e.context("decode key ref", key)),
            _ => Ok(None),
        }
    }

    /// Every KeyRef under a logical prefix, in key order.
    pub fn scan(&self, prefix: &Key) -> Result<Vec<KeyRef>> {
        let store_prefix = self.pipeline.store_key(prefix)?;
        let entries = self
            .store
            .scan_prefix(&store_prefix)
            .map_err(|e| e.context("scan", prefix))?;
        entries
            .into_iter()
            .map(|entry| {
                let key = self.pipeline.logical_key(&entry.key)?;
                self.pipeline
                    .from_bytes(&key, entry.value)
                    .map_err(|e| e.context("decode key ref", &key))
            })
            .collect()
    }

    /// Fail if a unique KeyRef in `refs` is held by another primary key.
    pub fn check_unique(&self, refs: &[KeyRef], primary_key: &Key) -> Result<()> {
        for key_ref in refs.iter().filter(|r| r.unique) {
            if let Some(existing) = self.read(&key_ref.key())?
                && existing.primary_key != *primary_key
            {
                event!(
                    Level::DEBUG,
                    index = %key_ref.index,
                    value = %key_ref.index_parts.join(" | "),
                    "unique index violation"
                );
                return Err(MappingError::UniqueConstraintViolation {
                    namespace: key_ref.namespace.to_string(),
                    index: key_ref.index.clone(),
                    value: key_ref.index_parts.join(" | "),
                    existing: existing.primary_key.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Writes KeyRef diffs through a store and value pipeline.
pub struct IndexEngine<'a, S> {
    store: &'a mut S,
    pipeline: &'a Pipeline,
}

impl<'a, S: KvStore> IndexEngine<'a, S> {
    pub fn new(store: &'a mut S, pipeline: &'a Pipeline) -> Self {
        Self { store, pipeline }
    }

    pub fn reader(&self) -> IndexReader<'_, S> {
        IndexReader::new(&*self.store, self.pipeline)
    }

    /// Write a diff without re-checking uniqueness.
    ///
    /// Stops at the first failed write; the host transaction discards
    /// whatever was already buffered.
    pub fn write_diff(&mut self, diff: &KeyRefDiff) -> Result<()> {
        for key_ref in &diff.to_delete {
            let key = key_ref.key();
            let store_key = self.pipeline.store_key(&key)?;
            self.store
                .delete(&store_key)
                .map_err(|e| e.context("delete key ref", &key))?;
        }
        for key_ref in &diff.to_insert {
            let key = key_ref.key();
            let store_key = self.pipeline.store_key(&key)?;
            let bytes = self
                .pipeline
                .to_bytes(&key, key_ref)
                .map_err(|e| e.context("encode key ref", &key))?;
            self.store
                .put(&store_key, bytes)
                .map_err(|e| e.context("put key ref", &key))?;
        }
        Ok(())
    }

    /// Check unique constraints, then delete and insert KeyRef records.
    pub fn apply_diff(&mut self, diff: &KeyRefDiff, primary_key: &Key) -> Result<()> {
        self.reader().check_unique(&diff.to_insert, primary_key)?;
        self.write_diff(diff)
    }
}
