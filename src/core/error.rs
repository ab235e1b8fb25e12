use thiserror::Error;

/// Coarse classification of a [`MappingError`].
///
/// Callers map these onto their own transport responses (not found,
/// conflict, bad input) without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyKey,
    MalformedKey,
    MappingNotFound,
    PrimaryKeyerUndefined,
    NotFound,
    AlreadyExists,
    RequiredIndexEmpty,
    UniqueConstraintViolation,
    Validation,
    Serialization,
    Transform,
    ListContainerUndefined,
    InvalidArgument,
    Conflict,
    Store,
    Lock,
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Key must have at least one segment")]
    EmptyKey,

    #[error("Malformed composite key: {0}")]
    MalformedKey(String),

    #[error("No state mapping registered for '{0}'")]
    MappingNotFound(String),

    #[error("No primary keyer defined for namespace '{0}'")]
    PrimaryKeyerUndefined(String),

    #[error("State entry not found: {0}")]
    NotFound(String),

    #[error("State entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Required index '{index}' of '{namespace}' produced no keys")]
    RequiredIndexEmpty { namespace: String, index: String },

    #[error("Unique index '{index}' of '{namespace}' already maps {value} to {existing}")]
    UniqueConstraintViolation {
        namespace: String,
        index: String,
        value: String,
        existing: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Value transform error: {0}")]
    Transform(String),

    #[error("No list container declared for '{0}'")]
    ListContainerUndefined(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Read/write conflict on key {0}")]
    Conflict(String),

    #[error("Store {op} failed for key {key}: {message}")]
    Store {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("Lock error: {0}")]
    Lock(String),
}

impl MappingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MappingError::EmptyKey => ErrorKind::EmptyKey,
            MappingError::MalformedKey(_) => ErrorKind::MalformedKey,
            MappingError::MappingNotFound(_) => ErrorKind::MappingNotFound,
            MappingError::PrimaryKeyerUndefined(_) => ErrorKind::PrimaryKeyerUndefined,
            MappingError::NotFound(_) => ErrorKind::NotFound,
            MappingError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            MappingError::RequiredIndexEmpty { .. } => ErrorKind::RequiredIndexEmpty,
            MappingError::UniqueConstraintViolation { .. } => {
                ErrorKind::UniqueConstraintViolation
            }
            MappingError::Validation(_) => ErrorKind::Validation,
            MappingError::Serialization(_) => ErrorKind::Serialization,
            MappingError::Transform(_) => ErrorKind::Transform,
            MappingError::ListContainerUndefined(_) => ErrorKind::ListContainerUndefined,
            MappingError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MappingError::Conflict(_) => ErrorKind::Conflict,
            MappingError::Store { .. } => ErrorKind::Store,
            MappingError::Lock(_) => ErrorKind::Lock,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Attaches operation and key context to pass-through failures.
    ///
    /// Typed engine errors (not found, constraint violations, ...) are
    /// returned unchanged so their kind survives propagation.
    pub fn context(self, op: &'static str, key: impl std::fmt::Display) -> Self {
        match self {
            MappingError::Serialization(message)
            | MappingError::Transform(message)
            | MappingError::Lock(message) => MappingError::Store {
                op,
                key: key.to_string(),
                message,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MappingError>;

impl<T> From<std::sync::PoisonError<T>> for MappingError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MappingError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MappingError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
