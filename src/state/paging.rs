use super::mapped::MappedState;
use crate::core::{Key, MappingError, Result};
use crate::mapping::{Entity, Lookup};
use crate::storage::KvStore;
use chrono::{DateTime, Utc};

/// One page of a bounded listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Where the next page starts; empty once the namespace is exhausted.
    pub bookmark: String,
}

impl<T> PageResult<T> {
    pub fn is_last(&self) -> bool {
        self.bookmark.is_empty()
    }
}

/// One historical version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntity<T> {
    pub tx_id: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` for a delete.
    pub value: Option<T>,
}

impl<T> VersionedEntity<T> {
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

impl<S: KvStore> MappedState<'_, S> {
    /// Entities of `T` in key order, at most `page_size` at a time.
    ///
    /// `page_size == 0` uses the configured default; larger requests are
    /// clamped to the configured maximum. Pass the returned bookmark back to
    /// continue, an empty bookmark to start over.
    pub fn list_paginated<T: Entity>(&self, page_size: usize, bookmark: &str) -> Result<PageResult<T>> {
        let namespace = self.mapping::<T>()?.namespace_ref().clone();
        let store_prefix = self.pipeline.store_key(&namespace)?;
        let page_size = self.config.page_size(page_size);

        let mut items = Vec::with_capacity(page_size);
        let mut next = bookmark.to_string();
        loop {
            let page = self
                .store
                .scan_prefix_page(&store_prefix, page_size - items.len(), &next)
                .map_err(|e| e.context("scan page", &namespace))?;
            for entry in page.entries {
                if let Some(entity) = self.decode_owned(entry)? {
                    items.push(entity);
                }
            }
            next = page.bookmark;
            // skipped nested-namespace entries leave room to refill
            if items.len() == page_size || next.is_empty() {
                break;
            }
        }

        Ok(PageResult {
            items,
            bookmark: next,
        })
    }

    /// Every version ever committed at an entity's primary key, oldest first.
    pub fn history<'a, T: Entity>(&self, lookup: impl Into<Lookup<'a, T>>) -> Result<Vec<VersionedEntity<T>>> {
        let key = self.mapping::<T>()?.key_for(&lookup.into())?;
        let store_key = self.pipeline.store_key(&key)?;
        let modifications = self
            .store
            .history(&store_key)
            .map_err(|e| e.context("history", &key))?;

        modifications
            .into_iter()
            .map(|modification| {
                let value = match modification.value {
                    Some(bytes) if !bytes.is_empty() => Some(
                        self.pipeline
                            .from_bytes(&key, bytes)
                            .map_err(|e| e.context("decode", &key))?,
                    ),
                    _ => None,
                };
                Ok(VersionedEntity {
                    tx_id: modification.tx_id,
                    timestamp: modification.timestamp,
                    value,
                })
            })
            .collect()
    }

    /// History for a raw key; the key must belong to `T`'s namespace.
    pub fn history_key<T: Entity>(&self, key: &Key) -> Result<Vec<VersionedEntity<T>>> {
        let owner = self.resolve(key)?;
        if owner.entity_type() != std::any::TypeId::of::<T>() {
            return Err(MappingError::MappingNotFound(format!(
                "{key} belongs to {}",
                owner.schema_name()
            )));
        }
        self.history::<T>(key.clone())
    }
}
