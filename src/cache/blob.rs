//! On-disk blob tier: one file per user holding the last known icon bytes.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

const BLOB_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum BlobWriteError {
    #[error("failed to write icon blob `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move icon blob into place at `{path}`")]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of [`BlobCache::clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: usize,
    pub failed: usize,
}

/// Filesystem-backed blob cache rooted at a single directory.
///
/// Writes land in a uniquely named sibling file first and are renamed into
/// place, so a concurrent reader sees either the old or the new bytes.
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Create the cache rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, user_id: i64) -> PathBuf {
        self.root.join(format!("{user_id}.{BLOB_EXTENSION}"))
    }

    /// Read the cached bytes for `user_id`. A missing file is `Ok(None)`.
    pub async fn read(&self, user_id: i64) -> Result<Option<Bytes>, io::Error> {
        match fs::read(self.path_for(user_id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn exists(&self, user_id: i64) -> bool {
        fs::try_exists(self.path_for(user_id))
            .await
            .unwrap_or(false)
    }

    /// Replace the cached bytes for `user_id`.
    pub async fn write(&self, user_id: i64, data: &[u8]) -> Result<(), BlobWriteError> {
        let target = self.path_for(user_id);
        let staging = self
            .root
            .join(format!("{user_id}.{BLOB_EXTENSION}.tmp-{}", Uuid::new_v4()));

        if let Err(source) = write_file(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(BlobWriteError::Write {
                path: staging,
                source,
            });
        }

        if let Err(source) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(BlobWriteError::Rename {
                path: target,
                source,
            });
        }

        Ok(())
    }

    /// Drop the cached bytes for `user_id`. A missing file is not an error.
    pub async fn remove(&self, user_id: i64) -> Result<(), io::Error> {
        match fs::remove_file(self.path_for(user_id)).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Remove every regular file in the cache directory.
    ///
    /// Individual failures are counted and skipped. A missing directory is
    /// treated as already empty.
    pub async fn clear_all(&self) -> ClearReport {
        let mut report = ClearReport::default();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return report,
            Err(err) => {
                warn!(
                    target = "usericon::cache::blob",
                    dir = %self.root.display(),
                    error = %err,
                    "failed to list icon cache directory"
                );
                report.failed += 1;
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(
                        target = "usericon::cache::blob",
                        error = %err,
                        "failed to read icon cache directory entry"
                    );
                    report.failed += 1;
                    break;
                }
            };

            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        target = "usericon::cache::blob",
                        path = %entry.path().display(),
                        error = %err,
                        "failed to remove cached icon"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Recreate the cache directory if it has gone missing.
    pub async fn ensure_dir(&self) -> Result<(), io::Error> {
        fs::create_dir_all(&self.root).await
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), io::Error> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}
