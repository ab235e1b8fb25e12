// ============================================================================
// statemap Library
// ============================================================================
//
// Typed entities over an ordered key-value ledger: primary-key derivation,
// secondary indexes kept as reference records, pluggable key/value
// transformers, prefix listing with pagination, and version history.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod mapping;
pub mod prelude;
pub mod state;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::StateConfig;
pub use core::{ErrorKind, KEY_REF_NAMESPACE, Key, MappingError, Result};
pub use mapping::{EntityList, IndexDef, KeyRef, Lookup, StateMapping, StateMappings};
pub use state::{Codec, MappedState, PageResult, VersionedEntity};
pub use storage::{KvStore, MemoryLedger};
pub use transaction::LedgerTx;
