// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Adapter Trait - Anti-Corruption Layer for blob backends
//!
//! Adapters persist opaque payloads under a key and hand back a
//! [`StoragePointer`] which the metadata layer records on a file version.
//! They know nothing about nodes, owners, versions or permissions.
//!
//! Concrete adapters live in `crate::infrastructure::storage`:
//! - `LocalStorageAdapter` - sharded directories on local disk
//! - `BlobStoreAdapter` - SeaweedFS filer HTTP API
//! - `SmbStorageAdapter` - SMB share driven through `smbclient`
//! - `MemoryStorageAdapter` - in-process map used by tests
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Port between the filesystem service and byte storage

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Location of a stored payload: the registered adapter name plus the
/// adapter-specific key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePointer {
    pub adapter: String,
    pub key: String,
}

impl StoragePointer {
    pub fn new(adapter: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StoragePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.adapter, self.key)
    }
}

/// A byte stream together with its declared length.
///
/// Adapters must consume the body exactly once. The declared `size` is
/// checked against the bytes actually observed by the filesystem service.
pub struct ContentStream {
    pub size: u64,
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

impl ContentStream {
    pub fn new(size: u64, body: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        Self { size, body }
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            size: data.len() as u64,
            body: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    pub fn empty() -> Self {
        Self {
            size: 0,
            body: stream::empty().boxed(),
        }
    }

    /// Drain the body into a single buffer.
    pub async fn into_bytes(self) -> Result<Bytes, StorageError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(Bytes::from(chunks.concat()))
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Byte storage backend.
///
/// `delete` is idempotent: removing a payload that is already gone succeeds.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Name the adapter is registered under. Every pointer it returns carries
    /// this name.
    fn name(&self) -> &str;

    /// Persist `content` under `key`.
    ///
    /// # Returns
    ///
    /// A pointer that only becomes valid once the payload is durable.
    async fn write(&self, key: &str, content: ContentStream) -> Result<StoragePointer, StorageError>;

    /// Open a stored payload for streaming.
    async fn read(&self, pointer: &StoragePointer) -> Result<ContentStream, StorageError>;

    /// Remove a stored payload.
    async fn delete(&self, pointer: &StoragePointer) -> Result<(), StorageError>;

    /// Duplicate a payload under a new key.
    ///
    /// Falls back to a streamed read and write; adapters with a native copy
    /// primitive override this.
    async fn copy(&self, pointer: &StoragePointer, key: &str) -> Result<StoragePointer, StorageError> {
        let content = self.read(pointer).await?;
        self.write(key, content).await
    }

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Named set of configured adapters with a default.
#[derive(Clone)]
pub struct StorageRegistry {
    adapters: BTreeMap<String, Arc<dyn StorageAdapter>>,
    default: String,
}

impl StorageRegistry {
    pub fn new(default: Arc<dyn StorageAdapter>) -> Self {
        let name = default.name().to_string();
        let mut adapters = BTreeMap::new();
        adapters.insert(name.clone(), default);
        Self {
            adapters,
            default: name,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn StorageAdapter>) -> Result<(), StorageError> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(StorageError::InvalidArgument(format!(
                "adapter '{}' is registered twice",
                name
            )));
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn with(mut self, adapter: Arc<dyn StorageAdapter>) -> Result<Self, StorageError> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn StorageAdapter>, StorageError> {
        self.adapters
            .get(name)
            .ok_or_else(|| StorageError::Unavailable(format!("no adapter named '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn default_adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapters[&self.default]
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Payload not found: {0}")]
    NotFound(String),

    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid adapter configuration: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout while talking to storage backend")]
    Timeout,

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Unknown storage error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::TimedOut => StorageError::Timeout,
            _ => StorageError::IoError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StorageError::Timeout
        } else if err.is_connect() {
            StorageError::Unavailable(err.to_string())
        } else {
            StorageError::Network(err.to_string())
        }
    }
}
