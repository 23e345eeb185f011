//! Content hashes that identify icon bytes.

use std::fmt;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of an icon's bytes.
///
/// The hash is the icon's identity on the wire: list payloads embed it
/// bare as `icon_hash`, single fetches expose it quoted as the `ETag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IconHash(String);

impl IconHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Strong entity tag: the hex digest wrapped in double quotes.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Exact comparison against a client-supplied `If-None-Match` value.
    ///
    /// Weak validators, `*` and comma-separated lists never match.
    pub fn matches(&self, validator: Option<&str>) -> bool {
        match validator {
            Some(value) => {
                let inner = &self.0;
                value.len() == inner.len() + 2
                    && value.starts_with('"')
                    && value.ends_with('"')
                    && &value[1..value.len() - 1] == inner
            }
            None => false,
        }
    }
}

impl fmt::Display for IconHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
