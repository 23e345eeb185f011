use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;
use tokio::sync::Mutex;

use usericon::application::icons::{IconFetch, IconService};
use usericon::application::repos::{IconsRepo, RepoError};
use usericon::cache::{BlobCache, FallbackImage, IconCache};
use usericon::domain::entities::IconRecord;

#[derive(Default)]
struct MapIconsRepo {
    icons: Mutex<HashMap<i64, Bytes>>,
}

#[async_trait]
impl IconsRepo for MapIconsRepo {
    async fn find_icon(&self, user_id: i64) -> Result<Option<IconRecord>, RepoError> {
        Ok(self
            .icons
            .lock()
            .await
            .get(&user_id)
            .map(|image| IconRecord {
                id: user_id,
                user_id,
                image: image.clone(),
            }))
    }

    async fn find_icons(&self, user_ids: &[i64]) -> Result<Vec<IconRecord>, RepoError> {
        let icons = self.icons.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                icons.get(user_id).map(|image| IconRecord {
                    id: *user_id,
                    user_id: *user_id,
                    image: image.clone(),
                })
            })
            .collect())
    }

    async fn replace_icon(&self, user_id: i64, image: Bytes) -> Result<i64, RepoError> {
        self.icons.lock().await.insert(user_id, image);
        Ok(user_id)
    }
}

async fn write_outdated_blob(service: &IconService, user_id: i64) {
    service
        .cache()
        .blobs()
        .write(user_id, b"outdated")
        .await
        .expect("overwrite blob");
}

#[tokio::test]
async fn icon_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().join("icons");
    let blobs = BlobCache::new(root.clone()).expect("blob cache");
    let cache = Arc::new(IconCache::from_parts(
        blobs,
        FallbackImage::from_bytes(Bytes::from_static(b"fallback")),
    ));
    let repo = Arc::new(MapIconsRepo::default());
    repo.icons
        .lock()
        .await
        .extend([(1, Bytes::from_static(b"one")), (3, Bytes::from_static(b"three"))]);
    let service = IconService::new(cache, repo);

    // Miss through to the fallback, then a store hit that fills both tiers.
    service.fetch(2, None).await.expect("fallback fetch");
    let first = service.fetch(1, None).await.expect("store fetch");
    let etag = first.hash().etag();

    // Index hit answered with 304, then an index hit served from disk.
    let revalidated = service.fetch(1, Some(&etag)).await.expect("conditional");
    assert!(matches!(revalidated, IconFetch::NotModified { .. }));
    let cached = service.fetch(1, None).await.expect("blob fetch");
    assert!(matches!(cached, IconFetch::Found { .. }));

    // A blob that disagrees with the index is evicted and reloaded.
    write_outdated_blob(&service, 1).await;
    let reloaded = service.fetch(1, None).await.expect("reload fetch");
    assert!(matches!(reloaded, IconFetch::Found { ref bytes, .. } if &bytes[..] == b"one"));

    // Bulk fill records its batch size.
    service.resolve_hashes([3, 4]).await.expect("bulk fill");

    // A vanished cache directory makes the write-through fail quietly.
    std::fs::remove_dir_all(&root).expect("remove cache dir");
    service
        .replace_icon(5, Bytes::from_static(b"five"))
        .await
        .expect("upload succeeds without a blob tier");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "usericon_index_hit_total",
        "usericon_index_miss_total",
        "usericon_blob_hit_total",
        "usericon_store_read_total",
        "usericon_fallback_total",
        "usericon_not_modified_total",
        "usericon_blob_write_failed_total",
        "usericon_blob_stale_total",
        "usericon_bulk_fill_batch_size",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
