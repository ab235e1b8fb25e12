//! Recommended imports grouped by abstraction level.
//!
//! `dx` covers registering entities and working with them through
//! `MappedState`. `advanced` exposes the index engine, transformers and
//! store plumbing.

pub mod dx {
    //! Stable high-level surface.
    pub use crate::{
        Codec, EntityList, ErrorKind, IndexDef, Key, Lookup, MappedState, MappingError,
        MemoryLedger, PageResult, StateConfig, StateMapping, StateMappings, VersionedEntity,
    };
}

pub mod advanced {
    //! Escape hatch for index and store internals.
    pub use crate::mapping::index::{IndexEngine, IndexReader, KeyRefDiff, derive_key_refs, diff};
    pub use crate::state::transform::{
        AesGcmTransformer, KeyTransformer, Pipeline, PrefixKeyTransformer, ValueTransformer,
    };
    pub use crate::storage::engine::{KeyModification, KvEntry, KvPage, KvStore};
    pub use crate::transaction::{Change, LedgerTx, TransactionId, TransactionState};
}
