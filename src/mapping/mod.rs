pub mod index;
pub mod registry;
pub mod schema;

pub use index::{IndexDef, IndexEngine, IndexReader, KeyRef, KeyRefDiff, derive_key_refs, diff};
pub use registry::StateMappings;
pub use schema::{AnyMapping, Entity, EntityList, ListShape, Lookup, StateMapping};
