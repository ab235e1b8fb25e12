pub mod error;
pub mod key;

pub use error::{ErrorKind, MappingError, Result};
pub use key::{KEY_REF_NAMESPACE, Key};
