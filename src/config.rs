use crate::core::{MappingError, Result};
use crate::state::transform::Codec;
use serde::Deserialize;
use std::fmt;

/// Mapped state configuration
///
/// Loaded from JSON or built with chained setters; applied by
/// `MappedState::with_config`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Segments prepended to every key (sandboxing)
    pub key_prefix: Vec<String>,

    /// Value serializer
    pub codec: Codec,

    /// AES-256-GCM key for values at rest; never loaded from config files
    #[serde(skip)]
    pub encryption_key: Option<[u8; 32]>,

    /// Page size used when a caller asks for 0
    pub default_page_size: usize,

    /// Upper bound on any requested page size
    pub max_page_size: usize,
}

impl StateConfig {
    pub fn new() -> Self {
        Self {
            key_prefix: Vec::new(),
            codec: Codec::MessagePack,
            encryption_key: None,
            default_page_size: 100,
            max_page_size: 1000,
        }
    }

    /// Parse from a JSON document, e.g. `{"codec": "json", "key_prefix": ["sandbox"]}`
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MappingError::InvalidArgument(format!("invalid state config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the key prefix
    pub fn key_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Set the value codec
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Enable value encryption
    pub fn encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Set the default page size
    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Set the maximum page size
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    /// Resolve a requested page size against the configured bounds
    pub fn page_size(&self, requested: usize) -> usize {
        let size = if requested == 0 {
            self.default_page_size
        } else {
            requested
        };
        size.min(self.max_page_size)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(MappingError::InvalidArgument(
                "default_page_size must be > 0".into(),
            ));
        }

        if self.max_page_size == 0 {
            return Err(MappingError::InvalidArgument(
                "max_page_size must be > 0".into(),
            ));
        }

        if self.default_page_size > self.max_page_size {
            return Err(MappingError::InvalidArgument(
                "default_page_size cannot exceed max_page_size".into(),
            ));
        }

        if self.key_prefix.iter().any(String::is_empty) {
            return Err(MappingError::InvalidArgument(
                "key_prefix segments cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("key_prefix", &self.key_prefix)
            .field("codec", &self.codec)
            .field(
                "encryption_key",
                &self.encryption_key.map(|_| "***"),
            )
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}
