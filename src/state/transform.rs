// ============================================================================
// Key & Value Transformers
// ============================================================================
//
// Every logical Key passes through the KeyTransformer before it is encoded
// into a store string, and back through it when scans return raw keys.
//
// Values are serialized by the Codec, then run through the ValueTransformer
// chain in registration order. Reading runs the chain in reverse, then
// deserializes.
//
// ============================================================================

use crate::core::{Key, MappingError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Serializer used for entity and index-reference values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Compact binary (rmp-serde, named fields)
    #[default]
    MessagePack,
    Json,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
            Codec::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

pub trait KeyTransformer: Send + Sync {
    /// Logical key -> key written to the store.
    fn to_store(&self, key: Key) -> Result<Key>;

    /// Store key (from a scan) -> logical key.
    fn from_store(&self, key: Key) -> Result<Key>;
}

pub trait ValueTransformer: Send + Sync {
    fn to_bytes(&self, key: &Key, bytes: Vec<u8>) -> Result<Vec<u8>>;

    fn from_bytes(&self, key: &Key, bytes: Vec<u8>) -> Result<Vec<u8>>;
}

/// Keys are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeys;

impl KeyTransformer for IdentityKeys {
    fn to_store(&self, key: Key) -> Result<Key> {
        Ok(key)
    }

    fn from_store(&self, key: Key) -> Result<Key> {
        Ok(key)
    }
}

/// Prepends fixed segments to every key, e.g. to sandbox one tenant.
#[derive(Debug, Clone)]
pub struct PrefixKeyTransformer {
    prefix: Vec<String>,
}

impl PrefixKeyTransformer {
    pub fn new<I, S>(prefix: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix: Vec<String> = prefix.into_iter().map(Into::into).collect();
        if prefix.is_empty() {
            return Err(MappingError::InvalidArgument("empty key prefix".into()));
        }
        Ok(Self { prefix })
    }
}

impl KeyTransformer for PrefixKeyTransformer {
    fn to_store(&self, key: Key) -> Result<Key> {
        let mut parts = self.prefix.clone();
        parts.extend(key.into_parts());
        Key::new(parts)
    }

    fn from_store(&self, key: Key) -> Result<Key> {
        if key.len() <= self.prefix.len() || !key.parts().starts_with(&self.prefix) {
            return Err(MappingError::MalformedKey(format!(
                "{key} is outside prefix {}",
                self.prefix.join(" | ")
            )));
        }
        Key::new(key.into_parts().split_off(self.prefix.len()))
    }
}

const SEALED_MAGIC: &[u8; 4] = b"SMG1";
const NONCE_LEN: usize = 12;

/// AES-256-GCM value encryption.
///
/// The nonce is derived from the key and plaintext, so identical writes
/// produce identical ciphertext on every endorsing node. The logical key is
/// bound in as associated data; a record copied to another key fails to
/// open.
pub struct AesGcmTransformer {
    cipher: Aes256Gcm,
}

impl AesGcmTransformer {
    pub fn new(key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| MappingError::Transform(format!("invalid encryption key: {e}")))?;
        Ok(Self { cipher })
    }

    fn nonce_for(aad: &[u8], plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update((aad.len() as u64).to_be_bytes());
        hasher.update(aad);
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }
}

impl ValueTransformer for AesGcmTransformer {
    fn to_bytes(&self, key: &Key, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let aad = key.encode();
        let nonce_bytes = Self::nonce_for(aad.as_bytes(), &bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &bytes,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| MappingError::Transform(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(SEALED_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(SEALED_MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn from_bytes(&self, key: &Key, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if bytes.len() < SEALED_MAGIC.len() + NONCE_LEN || !bytes.starts_with(SEALED_MAGIC) {
            return Err(MappingError::Transform(format!(
                "value at {key} is not sealed"
            )));
        }
        let (nonce_bytes, ciphertext) = bytes[SEALED_MAGIC.len()..].split_at(NONCE_LEN);
        let aad = key.encode();
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| MappingError::Transform(format!("decryption failed: {e}")))
    }
}

/// Key transformer, codec and value chain applied to every store call.
#[derive(Clone)]
pub struct Pipeline {
    codec: Codec,
    keys: Arc<dyn KeyTransformer>,
    values: Vec<Arc<dyn ValueTransformer>>,
}

impl Pipeline {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            keys: Arc::new(IdentityKeys),
            values: Vec::new(),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn set_codec(&mut self, codec: Codec) {
        self.codec = codec;
    }

    pub fn set_key_transformer(&mut self, transformer: Arc<dyn KeyTransformer>) {
        self.keys = transformer;
    }

    pub fn push_value_transformer(&mut self, transformer: Arc<dyn ValueTransformer>) {
        self.values.push(transformer);
    }

    /// Store string for a logical key.
    pub fn store_key(&self, key: &Key) -> Result<String> {
        Ok(self.keys.to_store(key.clone())?.encode())
    }

    /// Logical key for a store string returned by a scan.
    pub fn logical_key(&self, raw: &str) -> Result<Key> {
        self.keys.from_store(Key::decode(raw)?)
    }

    pub fn to_bytes<T: Serialize + ?Sized>(&self, key: &Key, value: &T) -> Result<Vec<u8>> {
        let mut bytes = self.codec.encode(value)?;
        for transformer in &self.values {
            bytes = transformer.to_bytes(key, bytes)?;
        }
        Ok(bytes)
    }

    pub fn from_bytes<T: DeserializeOwned>(&self, key: &Key, bytes: Vec<u8>) -> Result<T> {
        let mut bytes = bytes;
        for transformer in self.values.iter().rev() {
            bytes = transformer.from_bytes(key, bytes)?;
        }
        self.codec.decode(&bytes)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Codec::default())
    }
}
