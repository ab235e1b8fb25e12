pub mod engine;
pub mod memory;

pub use engine::{KeyModification, KvEntry, KvPage, KvStore};
pub use memory::MemoryLedger;
