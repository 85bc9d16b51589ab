// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process storage adapter for tests and throwaway deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::domain::storage::{ContentStream, StorageAdapter, StorageError, StoragePointer};

#[derive(Clone)]
pub struct MemoryStorageAdapter {
    name: String,
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
    writes: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl MemoryStorageAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
            writes: Arc::new(AtomicUsize::new(0)),
            deletes: Arc::new(AtomicUsize::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_deletes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of write calls that reached the adapter, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    /// Drop a payload behind the service's back.
    pub fn evict(&self, key: &str) {
        self.blobs.write().remove(key);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, key: &str, content: ContentStream) -> Result<StoragePointer, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "writes disabled".to_string(),
            });
        }
        let data = content.into_bytes().await.map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.blobs.write().insert(key.to_string(), data);
        Ok(StoragePointer::new(&self.name, key))
    }

    async fn read(&self, pointer: &StoragePointer) -> Result<ContentStream, StorageError> {
        self.blobs
            .read()
            .get(&pointer.key)
            .cloned()
            .map(ContentStream::from_bytes)
            .ok_or_else(|| StorageError::NotFound(pointer.key.clone()))
    }

    async fn delete(&self, pointer: &StoragePointer) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("deletes disabled for {}", pointer.key)));
        }
        self.blobs.write().remove(&pointer.key);
        Ok(())
    }

    async fn copy(&self, pointer: &StoragePointer, key: &str) -> Result<StoragePointer, StorageError> {
        let data = self
            .blobs
            .read()
            .get(&pointer.key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(pointer.key.clone()))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blobs.write().insert(key.to_string(), data);
        Ok(StoragePointer::new(&self.name, key))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
