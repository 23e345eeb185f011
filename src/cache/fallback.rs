use std::io;
use std::path::Path;

use bytes::Bytes;

use crate::domain::icons::IconHash;

/// Image served to users without a stored icon, hashed once at startup.
#[derive(Debug, Clone)]
pub struct FallbackImage {
    bytes: Bytes,
    hash: IconHash,
}

impl FallbackImage {
    pub fn load(path: &Path) -> Result<Self, io::Error> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(Bytes::from(data)))
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        let hash = IconHash::of(&bytes);
        Self { bytes, hash }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn hash(&self) -> &IconHash {
        &self.hash
    }
}
