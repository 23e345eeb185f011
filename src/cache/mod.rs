//! Icon cache.
//!
//! Two disposable tiers sit in front of the durable icon store:
//!
//! - **Hash index**: in-process map from user id to the hex SHA-256 of the
//!   icon that user is served. Answers conditional requests without I/O.
//! - **Blob cache**: one file per user under the configured directory,
//!   holding the bytes last read from or written to the store.
//!
//! Both tiers can be dropped at any time and are rebuilt lazily from the
//! store. Blob writes are best effort; index writes are not. On every
//! write path the blob is written before the index entry so that a hash
//! visible in the index always describes bytes that are reachable.
//!
//! ## Configuration
//!
//! ```toml
//! [icons]
//! cache_dir = "icons"
//! fallback_image = "img/NoImage.jpg"
//! ```

mod blob;
mod config;
mod fallback;
mod index;
mod lock;

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::icons::IconHash;

pub use blob::{BlobCache, BlobWriteError, ClearReport};
pub use config::IconCacheConfig;
pub use fallback::FallbackImage;
pub use index::HashIndex;

#[derive(Debug, Error)]
pub enum CacheInitError {
    #[error("failed to create icon cache directory `{path}`")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load fallback icon `{path}`")]
    Fallback {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Process-wide icon cache, shared through `Arc` by every request.
#[derive(Debug)]
pub struct IconCache {
    index: HashIndex,
    blobs: BlobCache,
    fallback: FallbackImage,
}

impl IconCache {
    /// Create the blob directory and hash the fallback image.
    pub fn new(config: &IconCacheConfig) -> Result<Self, CacheInitError> {
        let blobs =
            BlobCache::new(config.cache_dir.clone()).map_err(|source| CacheInitError::CacheDir {
                path: config.cache_dir.clone(),
                source,
            })?;
        let fallback = FallbackImage::load(&config.fallback_image).map_err(|source| {
            CacheInitError::Fallback {
                path: config.fallback_image.clone(),
                source,
            }
        })?;

        info!(
            target = "usericon::cache",
            cache_dir = %config.cache_dir.display(),
            fallback_hash = %fallback.hash(),
            "icon cache initialised"
        );

        Ok(Self::from_parts(blobs, fallback))
    }

    pub fn from_parts(blobs: BlobCache, fallback: FallbackImage) -> Self {
        Self {
            index: HashIndex::new(),
            blobs,
            fallback,
        }
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    pub fn fallback(&self) -> &FallbackImage {
        &self.fallback
    }

    /// Write-through after the store accepted `bytes` for `user_id`.
    ///
    /// The blob write may fail and is only logged. A blob that could not be
    /// replaced is evicted so readers fall through to the store. The index
    /// entry is always replaced afterwards.
    pub async fn store(&self, user_id: i64, bytes: &Bytes) -> IconHash {
        let hash = IconHash::of(bytes);
        if !self.write_blob(user_id, bytes).await {
            self.evict_blob(user_id).await;
        }
        self.index.set(user_id, hash.clone());
        hash
    }

    /// Best-effort removal of a blob that no longer matches the store.
    pub async fn evict_blob(&self, user_id: i64) {
        if let Err(err) = self.blobs.remove(user_id).await {
            warn!(
                target = "usericon::cache",
                user_id,
                error = %err,
                "failed to evict outdated icon blob"
            );
        }
    }

    /// Copy-up after bytes were read from the store.
    ///
    /// Unlike [`IconCache::store`] this never replaces what is already
    /// cached: an upload that raced the read has newer data. Returns the
    /// hash the index holds afterwards.
    pub async fn fill(&self, user_id: i64, bytes: &[u8]) -> IconHash {
        if !self.blobs.exists(user_id).await {
            self.write_blob(user_id, bytes).await;
        }
        self.index.set_if_absent(user_id, IconHash::of(bytes))
    }

    /// Best-effort blob write. Failures are logged and counted; the caller
    /// only learns whether the blob now holds `bytes`.
    async fn write_blob(&self, user_id: i64, bytes: &[u8]) -> bool {
        match self.blobs.write(user_id, bytes).await {
            Ok(()) => true,
            Err(err) => {
                metrics::counter!("usericon_blob_write_failed_total").increment(1);
                warn!(
                    target = "usericon::cache",
                    user_id,
                    error = %err,
                    "failed to write icon blob; continuing without it"
                );
                false
            }
        }
    }

    /// Drop both tiers and leave an empty blob directory behind.
    pub async fn clear_all(&self) -> Result<ClearReport, io::Error> {
        self.index.clear_all();
        let report = self.blobs.clear_all().await;
        self.blobs.ensure_dir().await?;

        info!(
            target = "usericon::cache",
            removed = report.removed,
            failed = report.failed,
            "icon caches cleared"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icon_cache(dir: &tempfile::TempDir) -> IconCache {
        let blobs = BlobCache::new(dir.path().join("icons")).expect("blob cache");
        IconCache::from_parts(blobs, FallbackImage::from_bytes(Bytes::from_static(b"noimage")))
    }

    #[test]
    fn new_creates_directory_and_loads_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fallback_path = dir.path().join("NoImage.jpg");
        std::fs::write(&fallback_path, b"noimage").expect("write fallback");
        let config = IconCacheConfig {
            cache_dir: dir.path().join("nested/icons"),
            fallback_image: fallback_path,
        };

        let cache = IconCache::new(&config).expect("cache");

        assert!(config.cache_dir.is_dir());
        assert_eq!(cache.fallback().hash(), &IconHash::of(b"noimage"));
    }

    #[test]
    fn new_fails_without_fallback_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = IconCacheConfig {
            cache_dir: dir.path().join("icons"),
            fallback_image: dir.path().join("missing.jpg"),
        };

        let err = IconCache::new(&config).expect_err("missing fallback");
        assert!(matches!(err, CacheInitError::Fallback { .. }));
    }

    #[tokio::test]
    async fn store_updates_index_even_when_blob_write_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = icon_cache(&dir);
        std::fs::remove_dir_all(cache.blobs().root()).expect("remove dir");

        let hash = cache.store(11, &Bytes::from_static(b"new icon")).await;

        assert_eq!(hash, IconHash::of(b"new icon"));
        assert_eq!(cache.index().lookup(11), Some(hash));
    }

    #[tokio::test]
    async fn fill_does_not_replace_newer_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = icon_cache(&dir);
        let uploaded = cache.store(5, &Bytes::from_static(b"uploaded")).await;

        let held = cache.fill(5, b"stale read").await;

        assert_eq!(held, uploaded);
        let blob = cache.blobs().read(5).await.expect("read").expect("present");
        assert_eq!(&blob[..], b"uploaded");
    }

    #[tokio::test]
    async fn fill_populates_empty_tiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = icon_cache(&dir);

        let held = cache.fill(6, b"from store").await;

        assert_eq!(held, IconHash::of(b"from store"));
        assert_eq!(cache.index().lookup(6), Some(held));
        assert!(cache.blobs().exists(6).await);
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = icon_cache(&dir);
        cache.store(1, &Bytes::from_static(b"one")).await;
        cache.store(2, &Bytes::from_static(b"two")).await;

        let report = cache.clear_all().await.expect("clear");

        assert_eq!(report.removed, 2);
        assert!(cache.index().is_empty());
        assert!(cache.blobs().read(1).await.expect("read").is_none());
        assert!(cache.blobs().root().is_dir());
    }
}
