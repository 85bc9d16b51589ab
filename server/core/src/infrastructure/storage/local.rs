// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Storage Adapter
//!
//! Stores each payload as a regular file under a base directory. Keys are
//! sharded by their first two character pairs (`ab/cd/abcd...`) to keep
//! directory sizes bounded.
//!
//! Writes go to a hidden temporary file in the shard directory, are fsynced
//! and then renamed into place, so a pointer is never handed out for a
//! partially written payload.
//!
//! **Use Cases:**
//! - Single-node deployments
//! - Development and integration testing
//! - Network mounts that behave like local disks

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::validate_key;
use crate::domain::storage::{ContentStream, StorageAdapter, StorageError, StoragePointer};

pub struct LocalStorageAdapter {
    name: String,
    /// Base directory for all payloads (e.g. "/var/lib/nimbus/blobs")
    base_path: PathBuf,
}

impl LocalStorageAdapter {
    /// Create the adapter, creating `base_path` if needed and verifying that
    /// it is writable.
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            StorageError::IoError(format!(
                "Failed to create base directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let test_file = base_path.join(".nimbus-storage-test");
        std::fs::write(&test_file, b"test").map_err(|e| {
            StorageError::IoError(format!(
                "Base directory {} is not writable: {}",
                base_path.display(),
                e
            ))
        })?;
        std::fs::remove_file(&test_file)
            .map_err(|e| StorageError::IoError(format!("Failed to cleanup test file: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_path,
        })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn resolve_key(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let mut path = self.base_path.clone();
        if key.len() >= 4 {
            path.push(&key[0..2]);
            path.push(&key[2..4]);
        }
        path.push(key);
        Ok(path)
    }

    fn check_pointer(&self, pointer: &StoragePointer) -> Result<PathBuf, StorageError> {
        if pointer.adapter != self.name {
            return Err(StorageError::InvalidKey(format!(
                "pointer {} does not belong to adapter '{}'",
                pointer, self.name
            )));
        }
        self.resolve_key(&pointer.key)
    }

    fn staging_path(target: &Path, key: &str) -> PathBuf {
        target.with_file_name(format!(".{}.{}.partial", key, Uuid::new_v4().simple()))
    }

    async fn write_staged(staging: &Path, mut content: ContentStream) -> Result<(), StorageError> {
        let mut file = tokio::fs::File::create(staging).await?;
        while let Some(chunk) = content.body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Copy `source` to `staging` and flush it to disk before it is renamed
    /// into place.
    async fn copy_staged(source: &Path, staging: &Path) -> std::io::Result<()> {
        tokio::fs::copy(source, staging).await?;
        tokio::fs::File::open(staging).await?.sync_all().await
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, key: &str, content: ContentStream) -> Result<StoragePointer, StorageError> {
        let target = self.resolve_key(key)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let staging = Self::staging_path(&target, key);
        let staged = match Self::write_staged(&staging, content).await {
            Ok(()) => tokio::fs::rename(&staging, &target).await.map_err(StorageError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = staged {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove staging file {}: {}", staging.display(), cleanup);
                }
            }
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }

        debug!(adapter = %self.name, key = %key, "Stored payload at {}", target.display());
        Ok(StoragePointer::new(&self.name, key))
    }

    async fn read(&self, pointer: &StoragePointer) -> Result<ContentStream, StorageError> {
        let path = self.check_pointer(pointer)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(pointer.key.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(ContentStream::new(size, ReaderStream::new(file).boxed()))
    }

    async fn delete(&self, pointer: &StoragePointer) -> Result<(), StorageError> {
        let path = self.check_pointer(pointer)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %pointer.key, "Payload already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, pointer: &StoragePointer, key: &str) -> Result<StoragePointer, StorageError> {
        let source = self.check_pointer(pointer)?;
        let target = self.resolve_key(key)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let staging = Self::staging_path(&target, key);
        match Self::copy_staged(&source, &staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(pointer.key.clone()))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e.into());
            }
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(StoragePointer::new(&self.name, key))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        if !self.base_path.exists() {
            return Err(StorageError::Unavailable(format!(
                "Base directory {} does not exist",
                self.base_path.display()
            )));
        }

        let test_file = self.base_path.join(".nimbus-health-check");
        tokio::fs::write(&test_file, b"health").await.map_err(|e| {
            StorageError::Unavailable(format!("Storage not writable: {}", e))
        })?;
        tokio::fs::remove_file(&test_file).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn adapter() -> (TempDir, LocalStorageAdapter) {
        let dir = TempDir::new().unwrap();
        let adapter = LocalStorageAdapter::new("local", dir.path()).unwrap();
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let (_dir, adapter) = adapter();
        let pointer = adapter
            .write("abcdef0123", ContentStream::from_bytes("payload"))
            .await
            .unwrap();
        assert_eq!(pointer, StoragePointer::new("local", "abcdef0123"));
        assert!(adapter.base_path().join("ab").join("cd").join("abcdef0123").exists());

        let content = adapter.read(&pointer).await.unwrap();
        assert_eq!(content.size, 7);
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"payload");

        adapter.delete(&pointer).await.unwrap();
        assert!(matches!(
            adapter.read(&pointer).await,
            Err(StorageError::NotFound(_))
        ));
        // Deleting twice is fine
        adapter.delete(&pointer).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_no_payload() {
        let (_dir, adapter) = adapter();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away")),
        ])
        .boxed();

        let result = adapter.write("deadbeef", ContentStream::new(100, body)).await;
        assert!(matches!(result, Err(StorageError::WriteFailed { .. })));

        let shard = adapter.base_path().join("de").join("ad");
        let leftovers: Vec<_> = std::fs::read_dir(&shard).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_native_copy() {
        let (_dir, adapter) = adapter();
        let original = adapter
            .write("aaaa1111", ContentStream::from_bytes("same bytes"))
            .await
            .unwrap();
        let copy = adapter.copy(&original, "bbbb2222").await.unwrap();

        adapter.delete(&original).await.unwrap();
        let data = adapter.read(&copy).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(&data[..], b"same bytes");
    }

    #[tokio::test]
    async fn test_copy_of_missing_payload_leaves_nothing_staged() {
        let (_dir, adapter) = adapter();
        let missing = StoragePointer::new("local", "cafe0001");
        assert!(matches!(
            adapter.copy(&missing, "cafe0002").await,
            Err(StorageError::NotFound(_))
        ));

        let original = adapter
            .write("cafe0003", ContentStream::from_bytes("durable"))
            .await
            .unwrap();
        let copy = adapter.copy(&original, "cafe0004").await.unwrap();
        let shard = adapter.base_path().join("ca").join("fe");
        let mut names: Vec<String> = std::fs::read_dir(&shard)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["cafe0003".to_string(), "cafe0004".to_string()]);
        assert_eq!(adapter.read(&copy).await.unwrap().size, 7);
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys_and_foreign_pointers() {
        let (_dir, adapter) = adapter();
        assert!(matches!(
            adapter.write("../escape", ContentStream::empty()).await,
            Err(StorageError::InvalidKey(_))
        ));
        let foreign = StoragePointer::new("other", "abcd");
        assert!(matches!(
            adapter.read(&foreign).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, adapter) = adapter();
        adapter.health_check().await.unwrap();
    }
}
