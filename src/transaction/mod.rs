// ============================================================================
// Ledger Transactions
// ============================================================================
//
// Write-set / read-set transactions over the in-memory ledger.
//
// - Reads see the committed snapshot taken at begin, overlaid with the
//   transaction's own buffered writes
// - Every committed version read (point or prefix scan) is recorded
// - Commit re-validates the read set and applies all writes or none
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{LedgerTx, TransactionId, TransactionState};
