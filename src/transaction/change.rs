// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// A ledger transaction buffers its writes as Changes keyed by store key.
// Nothing reaches the committed state until the ledger validates the
// transaction's read set and applies the whole write set at once.
//
// ============================================================================

/// A single buffered write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Write a value at a key
    Put { key: String, value: Vec<u8> },

    /// Remove a key
    Delete { key: String },
}

impl Change {
    /// Get the store key affected by this change
    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } => key,
            Change::Delete { key } => key,
        }
    }

    /// Value visible to reads inside the owning transaction
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Change::Put { value, .. } => Some(value),
            Change::Delete { .. } => None,
        }
    }
}
