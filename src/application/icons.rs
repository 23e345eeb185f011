use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::repos::{IconsRepo, RepoError};
use crate::cache::{ClearReport, IconCache};
use crate::domain::icons::IconHash;

#[derive(Debug, Error)]
pub enum IconError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("failed to recreate icon cache directory")]
    CacheDir(#[source] std::io::Error),
}

/// Outcome of a single icon fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum IconFetch {
    /// The client's validator names the icon it would receive.
    NotModified { hash: IconHash },
    Found { hash: IconHash, bytes: Bytes },
}

impl IconFetch {
    pub fn hash(&self) -> &IconHash {
        match self {
            IconFetch::NotModified { hash } | IconFetch::Found { hash, .. } => hash,
        }
    }
}

/// Read, bulk-resolve and replace user icons through the two cache tiers.
#[derive(Clone)]
pub struct IconService {
    cache: Arc<IconCache>,
    icons: Arc<dyn IconsRepo>,
}

impl IconService {
    pub fn new(cache: Arc<IconCache>, icons: Arc<dyn IconsRepo>) -> Self {
        Self { cache, icons }
    }

    pub fn cache(&self) -> &IconCache {
        &self.cache
    }

    /// Resolve the icon for `user_id`, honouring an `If-None-Match` value.
    ///
    /// Lookup order is hash index, blob cache, durable store, fallback. The
    /// hash returned with a body is always the digest of that body.
    pub async fn fetch(
        &self,
        user_id: i64,
        validator: Option<&str>,
    ) -> Result<IconFetch, IconError> {
        let indexed = self.cache.index().lookup(user_id);
        match &indexed {
            Some(hash) => {
                metrics::counter!("usericon_index_hit_total").increment(1);
                if hash.matches(validator) {
                    return Ok(not_modified(hash.clone()));
                }
            }
            None => metrics::counter!("usericon_index_miss_total").increment(1),
        }

        match self.cache.blobs().read(user_id).await {
            Ok(Some(bytes)) => {
                let hash = IconHash::of(&bytes);
                match &indexed {
                    Some(expected) if *expected != hash => {
                        // A copy-up lost the race against an upload, or an
                        // upload could not replace the file.
                        metrics::counter!("usericon_blob_stale_total").increment(1);
                        warn!(
                            target = "usericon::application::icons",
                            user_id,
                            indexed = %expected,
                            blob = %hash,
                            "icon blob disagrees with hash index; reloading from store"
                        );
                        self.cache.evict_blob(user_id).await;
                    }
                    _ => {
                        metrics::counter!("usericon_blob_hit_total").increment(1);
                        self.cache.index().set_if_absent(user_id, hash.clone());
                        return Ok(conditional(hash, bytes, validator));
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "usericon::application::icons",
                    user_id,
                    error = %err,
                    "failed to read icon blob; falling through to store"
                );
            }
        }

        metrics::counter!("usericon_store_read_total").increment(1);
        if let Some(record) = self.icons.find_icon(user_id).await? {
            let bytes = record.image;
            self.cache.fill(user_id, &bytes).await;
            let hash = IconHash::of(&bytes);
            return Ok(conditional(hash, bytes, validator));
        }

        metrics::counter!("usericon_fallback_total").increment(1);
        let fallback = self.cache.fallback();
        Ok(conditional(
            fallback.hash().clone(),
            fallback.bytes().clone(),
            validator,
        ))
    }

    /// Resolve the icon hash for every id with at most one store round trip.
    ///
    /// Duplicates are collapsed. Ids without a stored icon map to the
    /// fallback hash and leave nothing behind in the cache.
    pub async fn resolve_hashes<I>(&self, user_ids: I) -> Result<HashMap<i64, IconHash>, IconError>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut ids: Vec<i64> = user_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let (mut resolved, unknown) = self.cache.index().lookup_many(&ids);
        if unknown.is_empty() {
            return Ok(resolved);
        }

        metrics::counter!("usericon_store_read_total").increment(1);
        metrics::histogram!("usericon_bulk_fill_batch_size").record(unknown.len() as f64);
        let records = self.icons.find_icons(&unknown).await?;

        let fills = records
            .iter()
            .map(|record| self.cache.fill(record.user_id, &record.image));
        let held = join_all(fills).await;
        for (record, hash) in records.iter().zip(held) {
            resolved.insert(record.user_id, hash);
        }

        let fallback = self.cache.fallback().hash();
        let mut fallback_count = 0u64;
        for user_id in unknown {
            resolved.entry(user_id).or_insert_with(|| {
                fallback_count += 1;
                fallback.clone()
            });
        }
        metrics::counter!("usericon_fallback_total").increment(fallback_count);

        debug!(
            target = "usericon::application::icons",
            requested = ids.len(),
            fetched = records.len(),
            fallback = fallback_count,
            "bulk icon hash fill"
        );

        Ok(resolved)
    }

    /// Persist a new icon for `user_id`, then refresh both cache tiers.
    ///
    /// Returns the id of the stored icon row. On store failure the caches
    /// are left untouched.
    pub async fn replace_icon(&self, user_id: i64, image: Bytes) -> Result<i64, IconError> {
        let icon_id = self.icons.replace_icon(user_id, image.clone()).await?;
        let hash = self.cache.store(user_id, &image).await;

        info!(
            target = "usericon::application::icons",
            user_id,
            icon_id,
            icon_hash = %hash,
            size_bytes = image.len(),
            "icon replaced"
        );
        Ok(icon_id)
    }

    /// Drop every cached hash and blob. The durable store is not touched.
    pub async fn clear_caches(&self) -> Result<ClearReport, IconError> {
        self.cache.clear_all().await.map_err(IconError::CacheDir)
    }
}

fn not_modified(hash: IconHash) -> IconFetch {
    metrics::counter!("usericon_not_modified_total").increment(1);
    IconFetch::NotModified { hash }
}

fn conditional(hash: IconHash, bytes: Bytes, validator: Option<&str>) -> IconFetch {
    if hash.matches(validator) {
        not_modified(hash)
    } else {
        IconFetch::Found { hash, bytes }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::cache::{BlobCache, FallbackImage};
    use crate::domain::entities::IconRecord;

    const FALLBACK: &[u8] = b"fallback-jpeg";

    #[derive(Default)]
    struct CountingIconsRepo {
        rows: Mutex<HashMap<i64, IconRecord>>,
        next_id: AtomicUsize,
        single_reads: AtomicUsize,
        batch_reads: AtomicUsize,
        fail_writes: bool,
    }

    impl CountingIconsRepo {
        fn single_reads(&self) -> usize {
            self.single_reads.load(Ordering::SeqCst)
        }

        fn batch_reads(&self) -> usize {
            self.batch_reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IconsRepo for CountingIconsRepo {
        async fn find_icon(&self, user_id: i64) -> Result<Option<IconRecord>, RepoError> {
            self.single_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().await.get(&user_id).cloned())
        }

        async fn find_icons(&self, user_ids: &[i64]) -> Result<Vec<IconRecord>, RepoError> {
            self.batch_reads.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().await;
            Ok(user_ids
                .iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect())
        }

        async fn replace_icon(&self, user_id: i64, image: Bytes) -> Result<i64, RepoError> {
            if self.fail_writes {
                return Err(RepoError::Timeout);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            self.rows.lock().await.insert(
                user_id,
                IconRecord {
                    id,
                    user_id,
                    image,
                },
            );
            Ok(id)
        }
    }

    fn service_with(repo: Arc<CountingIconsRepo>) -> (tempfile::TempDir, IconService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = BlobCache::new(dir.path().join("icons")).expect("blob cache");
        let cache = Arc::new(IconCache::from_parts(
            blobs,
            FallbackImage::from_bytes(Bytes::from_static(FALLBACK)),
        ));
        (dir, IconService::new(cache, repo))
    }

    fn found_bytes(fetch: IconFetch) -> (IconHash, Bytes) {
        match fetch {
            IconFetch::Found { hash, bytes } => (hash, bytes),
            other => panic!("expected a body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_icon_serves_fallback_and_caches_nothing() {
        let repo = Arc::new(CountingIconsRepo::default());
        let (_dir, service) = service_with(repo.clone());

        let (hash, bytes) = found_bytes(service.fetch(1, None).await.expect("fetch"));

        assert_eq!(&bytes[..], FALLBACK);
        assert_eq!(hash, IconHash::of(FALLBACK));
        assert_eq!(service.cache().index().lookup(1), None);

        let again = service
            .fetch(1, Some(hash.etag().as_str()))
            .await
            .expect("conditional fetch");
        assert_eq!(again, IconFetch::NotModified { hash });
    }

    #[tokio::test]
    async fn store_hit_populates_both_tiers() {
        let repo = Arc::new(CountingIconsRepo::default());
        repo.replace_icon(3, Bytes::from_static(b"B1"))
            .await
            .expect("seed");
        let (_dir, service) = service_with(repo.clone());

        let (hash, bytes) = found_bytes(service.fetch(3, None).await.expect("fetch"));

        assert_eq!(&bytes[..], b"B1");
        assert_eq!(service.cache().index().lookup(3), Some(hash.clone()));
        assert!(service.cache().blobs().exists(3).await);

        let (second, _) = found_bytes(service.fetch(3, None).await.expect("fetch"));
        assert_eq!(second, hash);
        assert_eq!(repo.single_reads(), 1);
    }

    #[tokio::test]
    async fn index_hit_with_matching_validator_skips_io() {
        let repo = Arc::new(CountingIconsRepo::default());
        let (_dir, service) = service_with(repo.clone());
        let hash = service
            .cache()
            .store(9, &Bytes::from_static(b"cached"))
            .await;
        std::fs::remove_file(service.cache().blobs().path_for(9)).expect("remove blob");

        let fetch = service
            .fetch(9, Some(hash.etag().as_str()))
            .await
            .expect("fetch");

        assert_eq!(fetch, IconFetch::NotModified { hash });
        assert_eq!(repo.single_reads(), 0);
    }

    #[tokio::test]
    async fn replace_icon_invalidates_previous_hash() {
        let repo = Arc::new(CountingIconsRepo::default());
        let (_dir, service) = service_with(repo.clone());

        service
            .replace_icon(5, Bytes::from_static(b"B1"))
            .await
            .expect("first upload");
        let (h1, _) = found_bytes(service.fetch(5, None).await.expect("fetch"));

        service
            .replace_icon(5, Bytes::from_static(b"B2"))
            .await
            .expect("second upload");
        let (h2, bytes) = found_bytes(
            service
                .fetch(5, Some(h1.etag().as_str()))
                .await
                .expect("fetch"),
        );

        assert_ne!(h1, h2);
        assert_eq!(&bytes[..], b"B2");
        assert_eq!(h2, IconHash::of(b"B2"));
    }

    #[tokio::test]
    async fn blob_older_than_index_is_reloaded_from_store() {
        let repo = Arc::new(CountingIconsRepo::default());
        let (_dir, service) = service_with(repo.clone());
        service
            .replace_icon(1, Bytes::from_static(b"B2"))
            .await
            .expect("upload");
        // Copy-up of the previous icon finishing after the upload.
        service
            .cache()
            .blobs()
            .write(1, b"B1")
            .await
            .expect("stale blob");
        let h1 = IconHash::of(b"B1");
        let h2 = IconHash::of(b"B2");

        let (hash, bytes) = found_bytes(
            service
                .fetch(1, Some(h1.etag().as_str()))
                .await
                .expect("fetch"),
        );

        assert_eq!(&bytes[..], b"B2");
        assert_eq!(hash, h2);
        assert_eq!(repo.single_reads(), 1);
        let blob = service
            .cache()
            .blobs()
            .read(1)
            .await
            .expect("read")
            .expect("blob repopulated");
        assert_eq!(&blob[..], b"B2");

        let (again, _) = found_bytes(service.fetch(1, None).await.expect("fetch"));
        assert_eq!(again, h2);
        assert_eq!(repo.single_reads(), 1);
    }

    #[tokio::test]
    async fn failed_store_write_leaves_caches_untouched() {
        let repo = Arc::new(CountingIconsRepo {
            fail_writes: true,
            ..Default::default()
        });
        let (_dir, service) = service_with(repo);

        let err = service
            .replace_icon(5, Bytes::from_static(b"B1"))
            .await
            .expect_err("store failure");

        assert!(matches!(err, IconError::Repo(RepoError::Timeout)));
        assert_eq!(service.cache().index().lookup(5), None);
        assert!(!service.cache().blobs().exists(5).await);
    }

    #[tokio::test]
    async fn bulk_fill_uses_one_batch_then_none() {
        let repo = Arc::new(CountingIconsRepo::default());
        for id in [1, 2] {
            repo.replace_icon(id, Bytes::from(format!("icon-{id}")))
                .await
                .expect("seed");
        }
        let (_dir, service) = service_with(repo.clone());

        let first = service
            .resolve_hashes([1, 2, 3, 2, 1])
            .await
            .expect("resolve");
        assert_eq!(first.len(), 3);
        assert_eq!(first[&1], IconHash::of(b"icon-1"));
        assert_eq!(first[&3], IconHash::of(FALLBACK));
        assert_eq!(repo.batch_reads(), 1);

        let second = service.resolve_hashes([1, 2]).await.expect("resolve");
        assert_eq!(
            second,
            HashMap::from([(1, first[&1].clone()), (2, first[&2].clone())])
        );
        assert_eq!(repo.batch_reads(), 1);
    }

    #[tokio::test]
    async fn bulk_fill_of_empty_input_skips_store() {
        let repo = Arc::new(CountingIconsRepo::default());
        let (_dir, service) = service_with(repo.clone());

        let resolved = service.resolve_hashes(Vec::new()).await.expect("resolve");

        assert!(resolved.is_empty());
        assert_eq!(repo.batch_reads(), 0);
    }

    #[tokio::test]
    async fn clear_then_resolve_twice_reads_store_once() {
        let repo = Arc::new(CountingIconsRepo::default());
        repo.replace_icon(4, Bytes::from_static(b"icon"))
            .await
            .expect("seed");
        let (_dir, service) = service_with(repo.clone());
        service.fetch(4, None).await.expect("warm");

        service.clear_caches().await.expect("clear");
        assert_eq!(service.cache().index().lookup(4), None);

        let (h1, _) = found_bytes(service.fetch(4, None).await.expect("fetch"));
        let (h2, _) = found_bytes(service.fetch(4, None).await.expect("fetch"));

        assert_eq!(h1, h2);
        assert_eq!(repo.single_reads(), 2);
    }
}
