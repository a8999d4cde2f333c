//! Local filesystem snapshot storage.
//!
//! Snapshots are written to a temp file next to the target and renamed
//! into place, so an interrupted run never leaves a truncated file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Record;
use crate::storage::{Snapshot, SnapshotStorage, WriteMetadata, parse_snapshot};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl SnapshotStorage for LocalStorage {
    async fn write_snapshot(&self, key: &str, records: &[Record]) -> Result<WriteMetadata> {
        let snapshot = Snapshot::new(records.to_vec());
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.write_bytes(key, &bytes).await?;

        log::info!(
            "Snapshot: {} records written to {}",
            snapshot.count,
            self.path(key).display()
        );
        Ok(WriteMetadata {
            key: key.to_string(),
            count: snapshot.count,
            bytes: bytes.len(),
        })
    }

    async fn read_snapshot(&self, key: &str) -> Result<Option<Snapshot<Record>>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(parse_snapshot(&bytes)?)),
            None => Ok(None),
        }
    }
}
