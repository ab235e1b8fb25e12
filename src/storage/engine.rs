use crate::core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(key, value)` pair returned by a scan. Keys are store strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// A bounded scan result. `bookmark` is the store key the next page starts
/// at, empty when the scan reached the end of the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvPage {
    pub entries: Vec<KvEntry>,
    pub bookmark: String,
}

/// One historical write at a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` for deletes.
    pub value: Option<Vec<u8>>,
}

impl KeyModification {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Ordered key-value store the mapping layer runs on.
///
/// Implementations are expected to run inside a host transaction: every
/// read and write issued during one logical call commits or aborts as a
/// unit. The mapping layer performs no rollback of its own.
pub trait KvStore {
    /// Read the value at `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value` at `key`.
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>>;

    /// At most `page_size` entries under `prefix`, starting at `bookmark`
    /// (inclusive) or at the start of the prefix when `bookmark` is empty.
    fn scan_prefix_page(&self, prefix: &str, page_size: usize, bookmark: &str) -> Result<KvPage>;

    /// Every committed write at `key`, oldest first.
    fn history(&self, key: &str) -> Result<Vec<KeyModification>>;
}

impl<S: KvStore + ?Sized> KvStore for &mut S {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        (**self).scan_prefix(prefix)
    }

    fn scan_prefix_page(&self, prefix: &str, page_size: usize, bookmark: &str) -> Result<KvPage> {
        (**self).scan_prefix_page(prefix, page_size, bookmark)
    }

    fn history(&self, key: &str) -> Result<Vec<KeyModification>> {
        (**self).history(key)
    }
}
