use crate::core::{MappingError, Result};
use crate::storage::engine::KeyModification;
use crate::transaction::{Change, LedgerTx, TransactionId};
use chrono::Utc;
use im::{HashMap as ImHashMap, OrdMap, Vector};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, event, info_span};

/// A committed value together with the transaction that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredValue {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Persistent (structurally shared) view of the committed ledger.
///
/// Cloning is O(1), so every transaction gets its own consistent snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommittedState {
    values: OrdMap<String, StoredValue>,
    /// Last writing transaction per key, deletes included.
    versions: ImHashMap<String, u64>,
    history: ImHashMap<String, Vector<KeyModification>>,
}

impl CommittedState {
    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).cloned()
    }

    pub fn version(&self, key: &str) -> Option<u64> {
        self.versions.get(key).copied()
    }

    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, StoredValue)> {
        self.values
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| (key.clone(), stored.clone()))
            .collect()
    }

    pub fn history(&self, key: &str) -> Vec<KeyModification> {
        self.history
            .get(key)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn prefix_versions(&self, prefix: &str) -> Vec<(String, u64)> {
        self.scan_prefix(prefix)
            .into_iter()
            .map(|(key, stored)| (key, stored.version))
            .collect()
    }
}

/// In-memory ledger store with transactional commit.
///
/// Transactions read a snapshot, buffer their writes and are validated at
/// commit: if any key (or prefix range) they read has been rewritten since,
/// the whole transaction is rejected with a conflict.
pub struct MemoryLedger {
    state: CommittedState,
    next_tx: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: CommittedState::default(),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Start a transaction against the current committed snapshot.
    pub fn begin(&self) -> LedgerTx {
        let id = TransactionId(self.next_tx.fetch_add(1, Ordering::SeqCst));
        LedgerTx::new(id, self.state.clone())
    }

    /// Validate and apply a transaction.
    pub fn commit(&mut self, mut tx: LedgerTx) -> Result<TransactionId> {
        let tx_id = tx.id();
        let span = info_span!("ledger.commit", tx = %tx_id, changes = tx.change_count());
        let _enter = span.enter();

        if !tx.state().is_active() {
            return Err(MappingError::InvalidArgument(format!(
                "transaction {} is {}",
                tx_id,
                tx.state()
            )));
        }

        for (key, seen) in tx.read_set() {
            if self.state.version(&key) != seen {
                event!(Level::WARN, key = %key.escape_default(), "read conflict");
                return Err(MappingError::Conflict(key.escape_default().to_string()));
            }
        }
        for range in tx.range_read_set() {
            if self.state.prefix_versions(&range.prefix) != range.versions {
                event!(Level::WARN, prefix = %range.prefix.escape_default(), "range conflict");
                return Err(MappingError::Conflict(format!(
                    "range {}",
                    range.prefix.escape_default()
                )));
            }
        }

        tx.mark_committed();
        let timestamp = Utc::now();
        let version = tx_id.as_u64();
        for change in tx.into_changes() {
            match change {
                Change::Put { key, value } => {
                    self.state.values.insert(
                        key.clone(),
                        StoredValue {
                            value: value.clone(),
                            version,
                        },
                    );
                    self.state.versions.insert(key.clone(), version);
                    self.state
                        .history
                        .entry(key)
                        .or_insert_with(Vector::new)
                        .push_back(KeyModification {
                            tx_id: version,
                            timestamp,
                            value: Some(value),
                        });
                }
                Change::Delete { key } => {
                    if self.state.values.remove(&key).is_none() {
                        continue;
                    }
                    self.state.versions.insert(key.clone(), version);
                    self.state
                        .history
                        .entry(key)
                        .or_insert_with(Vector::new)
                        .push_back(KeyModification {
                            tx_id: version,
                            timestamp,
                            value: None,
                        });
                }
            }
        }

        event!(Level::DEBUG, "ledger transaction committed");
        Ok(tx_id)
    }

    /// Committed value at `key`, outside any transaction.
    pub fn get_committed(&self, key: &str) -> Option<Vec<u8>> {
        self.state.get(key).map(|stored| stored.value)
    }

    /// All committed keys, in order.
    pub fn keys(&self) -> Vec<String> {
        self.state.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.values.is_empty()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::storage::KvStore;

    fn seeded() -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put("a/1", b"one".to_vec()).unwrap();
        tx.put("a/2", b"two".to_vec()).unwrap();
        tx.put("b/1", b"other".to_vec()).unwrap();
        ledger.commit(tx).unwrap();
        ledger
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let mut ledger = MemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put("k", b"v".to_vec()).unwrap();
        assert_eq!(tx.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(ledger.get_committed("k").is_none());

        ledger.commit(tx).unwrap();
        assert_eq!(ledger.get_committed("k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let ledger = seeded();
        let mut tx = ledger.begin();
        tx.delete("a/1").unwrap();
        tx.rollback();
        assert_eq!(ledger.get_committed("a/1"), Some(b"one".to_vec()));
    }

    #[test]
    fn test_prefix_scan_merges_buffered_writes() {
        let ledger = seeded();
        let mut tx = ledger.begin();
        tx.delete("a/1").unwrap();
        tx.put("a/3", b"three".to_vec()).unwrap();

        let keys: Vec<String> = tx
            .scan_prefix("a/")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["a/2", "a/3"]);
    }

    #[test]
    fn test_paged_scan_bookmarks() {
        let ledger = seeded();
        let tx = ledger.begin();

        let first = tx.scan_prefix_page("a/", 1, "").unwrap();
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].key, "a/1");
        assert_eq!(first.bookmark, "a/2");

        let second = tx.scan_prefix_page("a/", 1, &first.bookmark).unwrap();
        assert_eq!(second.entries[0].key, "a/2");
        assert_eq!(second.bookmark, "");

        let err = tx.scan_prefix_page("a/", 1, "b/1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_stale_read_conflicts() {
        let mut ledger = seeded();

        let mut reader = ledger.begin();
        assert!(reader.get("a/1").unwrap().is_some());
        reader.put("c/1", b"derived".to_vec()).unwrap();

        let mut writer = ledger.begin();
        writer.put("a/1", b"changed".to_vec()).unwrap();
        ledger.commit(writer).unwrap();

        let err = ledger.commit(reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(ledger.get_committed("c/1").is_none());
    }

    #[test]
    fn test_phantom_in_scanned_range_conflicts() {
        let mut ledger = seeded();

        let reader = ledger.begin();
        assert_eq!(reader.scan_prefix("a/").unwrap().len(), 2);

        let mut writer = ledger.begin();
        writer.put("a/9", b"new".to_vec()).unwrap();
        ledger.commit(writer).unwrap();

        assert_eq!(ledger.commit(reader).unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_history_records_tombstones() {
        let mut ledger = seeded();
        let mut tx = ledger.begin();
        tx.put("a/1", b"uno".to_vec()).unwrap();
        ledger.commit(tx).unwrap();
        let mut tx = ledger.begin();
        tx.delete("a/1").unwrap();
        ledger.commit(tx).unwrap();

        let tx = ledger.begin();
        let history = tx.history("a/1").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value.as_deref(), Some(&b"one"[..]));
        assert_eq!(history[1].value.as_deref(), Some(&b"uno"[..]));
        assert!(history[2].is_delete());
        assert!(history[0].tx_id < history[2].tx_id);
    }
}
