// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Filesystem error taxonomy
//!
//! Every public operation of the filesystem service fails with a
//! [`FilesystemError`]. Each variant maps to a stable [`ErrorKind`] which
//! carries the machine-readable code and the HTTP status used by the API
//! layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::node::NodeId;
use crate::domain::repository::RepositoryError;
use crate::domain::storage::StorageError;

/// Why a mutation conflicts with the current state of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    NodeWithSameNameAlreadyExists,
    CantBeChildOfItself,
    ParentNotLive,
    CollectionNotEmpty,
    NodeNotDeleted,
    NodeDeleted,
}

impl ConflictReason {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::NodeWithSameNameAlreadyExists => "NODE_WITH_SAME_NAME_ALREADY_EXISTS",
            ConflictReason::CantBeChildOfItself => "CANT_BE_CHILD_OF_ITSELF",
            ConflictReason::ParentNotLive => "PARENT_NOT_LIVE",
            ConflictReason::CollectionNotEmpty => "COLLECTION_NOT_EMPTY",
            ConflictReason::NodeNotDeleted => "NODE_NOT_DELETED",
            ConflictReason::NodeDeleted => "NODE_DELETED",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Conflict ({reason}): {message}")]
    Conflict {
        reason: ConflictReason,
        message: String,
    },

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Node {0} is locked")]
    Locked(NodeId),

    #[error("Lock token does not match the lock held on node {0}")]
    LockIdMismatch(NodeId),

    #[error("Insufficient storage: requested {requested} bytes, {available} available")]
    InsufficientStorage { requested: u64, available: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage write failed on adapter '{adapter}' for key {key}: {reason}")]
    StorageWriteFailed {
        adapter: String,
        key: String,
        reason: String,
    },

    #[error("Stored payload not found: {0}")]
    StorageNotFound(String),

    #[error("Contents of node {node} version {version} are missing")]
    ContentsNotFound { node: NodeId, version: u32 },

    #[error("Storage adapter '{adapter}' failed: {source}")]
    Storage {
        adapter: String,
        #[source]
        source: StorageError,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Stable classification of a [`FilesystemError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict(ConflictReason),
    Forbidden,
    Locked,
    LockIdMismatch,
    InsufficientStorage,
    InvalidArgument,
    StorageWriteFailed,
    StorageNotFound,
    ContentsNotFound,
    Storage,
    Internal,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict(reason) => reason.code(),
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Locked => "LOCKED",
            ErrorKind::LockIdMismatch => "LOCK_ID_MISMATCH",
            ErrorKind::InsufficientStorage => "INSUFFICIENT_STORAGE",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::StorageWriteFailed => "STORAGE_WRITE_FAILED",
            ErrorKind::StorageNotFound => "STORAGE_NOT_FOUND",
            ErrorKind::ContentsNotFound => "CONTENTS_NOT_FOUND",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// HTTP status reported by the API layer. Lock violations share 423 and
    /// are presented as access errors.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound | ErrorKind::ContentsNotFound | ErrorKind::StorageNotFound => 404,
            ErrorKind::Conflict(_) => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Locked | ErrorKind::LockIdMismatch => 423,
            ErrorKind::InsufficientStorage => 507,
            ErrorKind::InvalidArgument => 400,
            ErrorKind::StorageWriteFailed | ErrorKind::Storage => 502,
            ErrorKind::Internal => 500,
            ErrorKind::Cancelled => 503,
        }
    }

    /// Access errors: permission denials and lock violations.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ErrorKind::Forbidden | ErrorKind::Locked | ErrorKind::LockIdMismatch
        )
    }
}

impl FilesystemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilesystemError::NotFound(_) => ErrorKind::NotFound,
            FilesystemError::Conflict { reason, .. } => ErrorKind::Conflict(*reason),
            FilesystemError::Forbidden(_) => ErrorKind::Forbidden,
            FilesystemError::Locked(_) => ErrorKind::Locked,
            FilesystemError::LockIdMismatch(_) => ErrorKind::LockIdMismatch,
            FilesystemError::InsufficientStorage { .. } => ErrorKind::InsufficientStorage,
            FilesystemError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FilesystemError::StorageWriteFailed { .. } => ErrorKind::StorageWriteFailed,
            FilesystemError::StorageNotFound(_) => ErrorKind::StorageNotFound,
            FilesystemError::ContentsNotFound { .. } => ErrorKind::ContentsNotFound,
            FilesystemError::Storage { .. } => ErrorKind::Storage,
            FilesystemError::Repository(RepositoryError::NotFound(_)) => ErrorKind::NotFound,
            FilesystemError::Repository(_) => ErrorKind::Internal,
            FilesystemError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn conflict(reason: ConflictReason, message: impl Into<String>) -> Self {
        FilesystemError::Conflict {
            reason,
            message: message.into(),
        }
    }

    /// Classify an adapter failure. Missing payloads keep their own variant so
    /// reads can report them as missing contents; rejected options become
    /// `InvalidArgument`.
    pub fn storage(adapter: impl Into<String>, source: StorageError) -> Self {
        match source {
            StorageError::NotFound(key) => FilesystemError::StorageNotFound(key),
            StorageError::InvalidArgument(message) => FilesystemError::InvalidArgument(message),
            source => FilesystemError::Storage {
                adapter: adapter.into(),
                source,
            },
        }
    }

    pub fn write_failed(adapter: impl Into<String>, key: impl Into<String>, source: StorageError) -> Self {
        let reason = match source {
            StorageError::WriteFailed { reason, .. } => reason,
            other => other.to_string(),
        };
        FilesystemError::StorageWriteFailed {
            adapter: adapter.into(),
            key: key.into(),
            reason,
        }
    }
}
