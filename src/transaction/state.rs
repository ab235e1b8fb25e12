// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// ============================================================================

use super::Change;
use crate::core::{MappingError, Result};
use crate::storage::engine::{KeyModification, KvEntry, KvPage, KvStore};
use crate::storage::memory::CommittedState;
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::{Level, event};

/// Unique identifier for a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Committed versions observed by one prefix scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeRead {
    pub prefix: String,
    pub versions: Vec<(String, u64)>,
}

/// A ledger transaction.
///
/// Not shareable across threads: one logical invocation owns it from
/// `MemoryLedger::begin` until it is committed or dropped.
#[derive(Debug)]
pub struct LedgerTx {
    id: TransactionId,
    state: TransactionState,
    base: CommittedState,
    changes: BTreeMap<String, Change>,
    reads: RefCell<BTreeMap<String, Option<u64>>>,
    range_reads: RefCell<Vec<RangeRead>>,
}

impl LedgerTx {
    pub(crate) fn new(id: TransactionId, base: CommittedState) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            base,
            changes: BTreeMap::new(),
            reads: RefCell::new(BTreeMap::new()),
            range_reads: RefCell::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Buffered writes, in key order.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Discard the transaction.
    pub fn rollback(mut self) {
        self.state = TransactionState::Aborted;
        event!(Level::DEBUG, tx = %self.id, changes = self.changes.len(), "ledger transaction rolled back");
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn read_set(&self) -> BTreeMap<String, Option<u64>> {
        self.reads.borrow().clone()
    }

    pub(crate) fn range_read_set(&self) -> Vec<RangeRead> {
        self.range_reads.borrow().clone()
    }

    pub(crate) fn into_changes(self) -> Vec<Change> {
        self.changes.into_values().collect()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(MappingError::InvalidArgument(format!(
                "transaction {} is {}",
                self.id, self.state
            )))
        }
    }

    /// Merged view of committed entries and buffered writes under `prefix`.
    fn merged_prefix(&self, prefix: &str) -> Vec<KvEntry> {
        let committed = self.base.scan_prefix(prefix);
        self.range_reads.borrow_mut().push(RangeRead {
            prefix: prefix.to_string(),
            versions: committed
                .iter()
                .map(|(key, stored)| (key.clone(), stored.version))
                .collect(),
        });

        let mut merged: BTreeMap<String, Vec<u8>> = committed
            .into_iter()
            .map(|(key, stored)| (key, stored.value))
            .collect();
        for (key, change) in self
            .changes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match change.value() {
                Some(value) => {
                    merged.insert(key.clone(), value.to_vec());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged
            .into_iter()
            .map(|(key, value)| KvEntry { key, value })
            .collect()
    }
}

impl KvStore for LedgerTx {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        if let Some(change) = self.changes.get(key) {
            return Ok(change.value().map(<[u8]>::to_vec));
        }
        self.reads
            .borrow_mut()
            .insert(key.to_string(), self.base.version(key));
        Ok(self.base.get(key).map(|stored| stored.value))
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        if key.is_empty() {
            return Err(MappingError::InvalidArgument("empty store key".into()));
        }
        self.changes.insert(
            key.to_string(),
            Change::Put {
                key: key.to_string(),
                value,
            },
        );
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.ensure_active()?;
        self.changes.insert(
            key.to_string(),
            Change::Delete {
                key: key.to_string(),
            },
        );
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        self.ensure_active()?;
        Ok(self.merged_prefix(prefix))
    }

    fn scan_prefix_page(&self, prefix: &str, page_size: usize, bookmark: &str) -> Result<KvPage> {
        self.ensure_active()?;
        if page_size == 0 {
            return Err(MappingError::InvalidArgument("page size must be > 0".into()));
        }
        if !bookmark.is_empty() && !bookmark.starts_with(prefix) {
            return Err(MappingError::InvalidArgument(format!(
                "bookmark {} is outside the scanned range",
                bookmark.escape_default()
            )));
        }

        let mut remaining = self
            .merged_prefix(prefix)
            .into_iter()
            .skip_while(|entry| entry.key.as_str() < bookmark);
        let entries: Vec<KvEntry> = remaining.by_ref().take(page_size).collect();
        let bookmark = remaining.next().map(|entry| entry.key).unwrap_or_default();

        Ok(KvPage { entries, bookmark })
    }

    fn history(&self, key: &str) -> Result<Vec<KeyModification>> {
        self.ensure_active()?;
        Ok(self.base.history(key))
    }
}
