// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Repository Interface
//!
//! Persistence contract for the [`Node`] aggregate. The interface lives in the
//! domain layer and is implemented in `crate::infrastructure::repositories`:
//!
//! | Backend | Implementation |
//! |---------|----------------|
//! | In-memory | `InMemoryNodeRepository` |
//! | PostgreSQL | `PostgresNodeRepository` |
//!
//! Implementations must reject a second live node with the same sibling key
//! under one parent with [`RepositoryError::Conflict`]. Trashed nodes do not
//! take part in that check.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::node::{Node, NodeId, PrincipalId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Arbitrary in-process predicate evaluated after the structured filters.
pub type NodePredicate = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// Query over the node store.
///
/// Structured fields are pushed down to the backend. `predicate` runs in
/// process on every candidate the backend returns.
#[derive(Clone, Default)]
pub struct NodeFilter {
    pub owner: Option<PrincipalId>,
    pub parent: Option<NodeId>,
    pub is_collection: Option<bool>,
    /// `Some(true)` selects trashed nodes, `Some(false)` live ones
    pub deleted: Option<bool>,
    /// Nodes whose `destroy` timestamp is at or before this instant
    pub destroy_before: Option<DateTime<Utc>>,
    pub predicate: Option<NodePredicate>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: PrincipalId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn collections(mut self, is_collection: bool) -> Self {
        self.is_collection = Some(is_collection);
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn destroy_before(mut self, at: DateTime<Utc>) -> Self {
        self.destroy_before = Some(at);
        self
    }

    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Structured part of the filter only.
    pub fn matches_fields(&self, node: &Node) -> bool {
        if let Some(owner) = &self.owner {
            if node.owner != *owner {
                return false;
            }
        }
        if let Some(parent) = self.parent {
            if node.parent != Some(parent) {
                return false;
            }
        }
        if let Some(is_collection) = self.is_collection {
            if node.is_collection() != is_collection {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if node.is_deleted() != deleted {
                return false;
            }
        }
        if let Some(at) = self.destroy_before {
            match node.destroy {
                Some(destroy) if destroy <= at => {}
                _ => return false,
            }
        }
        true
    }

    pub fn matches_predicate(&self, node: &Node) -> bool {
        self.predicate.as_ref().map(|p| p(node)).unwrap_or(true)
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.matches_fields(node) && self.matches_predicate(node)
    }
}

impl fmt::Debug for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFilter")
            .field("owner", &self.owner)
            .field("parent", &self.parent)
            .field("is_collection", &self.is_collection)
            .field("deleted", &self.deleted)
            .field("destroy_before", &self.destroy_before)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// One page of a keyset-paginated scan ordered by node id.
#[derive(Debug, Clone, Default)]
pub struct NodePage {
    pub nodes: Vec<Node>,
    /// Cursor to resume after, `None` once the scan is exhausted
    pub next: Option<NodeId>,
}

/// Repository interface for Node aggregates
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Insert a new node. Fails with `Conflict` on a live sibling name clash.
    async fn insert(&self, node: &Node) -> Result<(), RepositoryError>;

    /// Replace an existing node. Fails with `NotFound` if it is missing and
    /// `Conflict` on a live sibling name clash.
    async fn update(&self, node: &Node) -> Result<(), RepositoryError>;

    /// Remove a node record. Removing an absent id is not an error.
    async fn remove(&self, id: NodeId) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError>;

    /// Root collection of `owner`
    async fn find_root(&self, owner: &PrincipalId) -> Result<Option<Node>, RepositoryError>;

    /// Live child of `parent` whose sibling key equals that of `name`
    async fn find_child(&self, parent: NodeId, name: &str) -> Result<Option<Node>, RepositoryError>;

    async fn find_children(&self, parent: NodeId, include_deleted: bool) -> Result<Vec<Node>, RepositoryError>;

    /// Scan at most `limit` candidates with id greater than `after`.
    async fn find_page(
        &self,
        filter: &NodeFilter,
        after: Option<NodeId>,
        limit: usize,
    ) -> Result<NodePage, RepositoryError>;

    /// Bytes held by the current versions of the live files of `owner`
    async fn live_usage(&self, owner: &PrincipalId) -> Result<u64, RepositoryError>;
}

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Constraint violated: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return RepositoryError::Conflict(db.message().to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
