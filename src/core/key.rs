// ============================================================================
// Composite Keys
// ============================================================================
//
// A Key is an ordered list of string segments. Segment 0 is the namespace
// (entity type tag), the rest are attribute values. Keys are flattened into
// a single store string with a NUL-delimited, escaped encoding:
//
//   "\0" seg0 "\0" seg1 "\0" ... segN "\0"
//
// Inside a segment, U+0001 is written as U+0001 U+0001 and U+0000 as
// U+0001 U+0002, so no segment content can forge a delimiter. Every segment
// is terminated, which makes the encoding of a key a strict string prefix of
// the encoding of each of its children (prefix scans rely on this).
//
// ============================================================================

use super::error::{MappingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace under which secondary-index reference records live.
pub const KEY_REF_NAMESPACE: &str = "_idx";

const DELIMITER: char = '\u{0}';
const ESCAPE: char = '\u{1}';
const ESCAPED_ESCAPE: char = '\u{1}';
const ESCAPED_DELIMITER: char = '\u{2}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Key(Vec<String>);

impl Key {
    pub fn new(parts: Vec<String>) -> Result<Self> {
        if parts.is_empty() {
            return Err(MappingError::EmptyKey);
        }
        Ok(Self(parts))
    }

    /// Builds a key from anything string-like.
    pub fn of<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(parts.into_iter().map(Into::into).collect())
    }

    /// Single-segment key holding only a namespace.
    pub fn namespace_only(namespace: impl Into<String>) -> Self {
        Self(vec![namespace.into()])
    }

    pub fn namespace(&self) -> &str {
        &self.0[0]
    }

    /// Segments after the namespace.
    pub fn suffix(&self) -> &[String] {
        &self.0[1..]
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn into_parts(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns a new key with `parts` appended.
    pub fn child<I, S>(&self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segments = self.0.clone();
        segments.extend(parts.into_iter().map(Into::into));
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn encode(&self) -> String {
        let capacity = self.0.iter().map(|s| s.len() + 1).sum::<usize>() + 1;
        let mut out = String::with_capacity(capacity);
        out.push(DELIMITER);
        for segment in &self.0 {
            for ch in segment.chars() {
                match ch {
                    ESCAPE => {
                        out.push(ESCAPE);
                        out.push(ESCAPED_ESCAPE);
                    }
                    DELIMITER => {
                        out.push(ESCAPE);
                        out.push(ESCAPED_DELIMITER);
                    }
                    other => out.push(other),
                }
            }
            out.push(DELIMITER);
        }
        out
    }

    /// Inverse of [`Key::encode`].
    ///
    /// A string that does not start with the delimiter is taken as a bare
    /// namespace and yields a single-segment key.
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.is_empty() {
            return Err(MappingError::EmptyKey);
        }

        let Some(body) = encoded.strip_prefix(DELIMITER) else {
            if encoded.contains(DELIMITER) {
                return Err(MappingError::MalformedKey(render_raw(encoded)));
            }
            return Ok(Self::namespace_only(encoded));
        };

        if !body.ends_with(DELIMITER) {
            return Err(MappingError::MalformedKey(render_raw(encoded)));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = body.chars();
        while let Some(ch) = chars.next() {
            match ch {
                DELIMITER => segments.push(std::mem::take(&mut current)),
                ESCAPE => match chars.next() {
                    Some(ESCAPED_ESCAPE) => current.push(ESCAPE),
                    Some(ESCAPED_DELIMITER) => current.push(DELIMITER),
                    _ => return Err(MappingError::MalformedKey(render_raw(encoded))),
                },
                other => current.push(other),
            }
        }

        Self::new(segments)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" | "))
    }
}

impl From<&str> for Key {
    fn from(namespace: &str) -> Self {
        Self::namespace_only(namespace)
    }
}

impl From<String> for Key {
    fn from(namespace: String) -> Self {
        Self::namespace_only(namespace)
    }
}

impl TryFrom<Vec<String>> for Key {
    type Error = MappingError;

    fn try_from(parts: Vec<String>) -> Result<Self> {
        Self::new(parts)
    }
}

impl From<Key> for Vec<String> {
    fn from(key: Key) -> Self {
        key.0
    }
}

fn render_raw(encoded: &str) -> String {
    encoded.escape_default().to_string()
}
