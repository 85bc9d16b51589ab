// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the [`NodeRepository`] port.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve node records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresNodeRepository** - JSONB documents with indexed columns for
//!   the fields queries filter on
//! - **InMemoryNodeRepository** - `HashMap` behind a lock, for tests and
//!   single-process development
//!
//! # Usage
//!
//! ```no_run
//! # async fn example(database_url: &str) -> anyhow::Result<()> {
//! use sqlx::PgPool;
//! use nimbus_core::infrastructure::repositories::postgres_node::PostgresNodeRepository;
//!
//! let pool = PgPool::connect(database_url).await?;
//! let repo = PostgresNodeRepository::new(pool);
//! repo.ensure_schema().await?;
//! # Ok(())
//! # }
//! ```

pub mod postgres_node;

pub use postgres_node::PostgresNodeRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::name::sibling_key;
use crate::domain::node::{Node, NodeId, PrincipalId};
use crate::domain::repository::{NodeFilter, NodePage, NodeRepository, RepositoryError};

#[derive(Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Live sibling (or second root) that `node` would collide with.
    fn clash(nodes: &HashMap<NodeId, Node>, node: &Node) -> Option<NodeId> {
        if node.is_deleted() {
            return None;
        }
        match node.parent {
            None => nodes
                .values()
                .find(|other| other.id != node.id && other.is_root() && other.owner == node.owner)
                .map(|other| other.id),
            Some(parent) => {
                let key = node.name_key();
                nodes
                    .values()
                    .find(|other| {
                        other.id != node.id
                            && other.parent == Some(parent)
                            && !other.is_deleted()
                            && other.name_key() == key
                    })
                    .map(|other| other.id)
            }
        }
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn insert(&self, node: &Node) -> Result<(), RepositoryError> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.id) {
            return Err(RepositoryError::Conflict(format!("node {} already exists", node.id)));
        }
        if let Some(other) = Self::clash(&nodes, node) {
            return Err(RepositoryError::Conflict(format!(
                "'{}' clashes with live node {}",
                node.name, other
            )));
        }
        nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn update(&self, node: &Node) -> Result<(), RepositoryError> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&node.id) {
            return Err(RepositoryError::NotFound(node.id.to_string()));
        }
        if let Some(other) = Self::clash(&nodes, node) {
            return Err(RepositoryError::Conflict(format!(
                "'{}' clashes with live node {}",
                node.name, other
            )));
        }
        nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn remove(&self, id: NodeId) -> Result<(), RepositoryError> {
        self.nodes.write().remove(&id);
        Ok(())
    }

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        Ok(self.nodes.read().get(&id).cloned())
    }

    async fn find_root(&self, owner: &PrincipalId) -> Result<Option<Node>, RepositoryError> {
        Ok(self
            .nodes
            .read()
            .values()
            .find(|n| n.is_root() && n.owner == *owner)
            .cloned())
    }

    async fn find_child(&self, parent: NodeId, name: &str) -> Result<Option<Node>, RepositoryError> {
        let key = sibling_key(name);
        Ok(self
            .nodes
            .read()
            .values()
            .find(|n| n.parent == Some(parent) && !n.is_deleted() && n.name_key() == key)
            .cloned())
    }

    async fn find_children(&self, parent: NodeId, include_deleted: bool) -> Result<Vec<Node>, RepositoryError> {
        let mut children: Vec<Node> = self
            .nodes
            .read()
            .values()
            .filter(|n| n.parent == Some(parent) && (include_deleted || !n.is_deleted()))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn find_page(
        &self,
        filter: &NodeFilter,
        after: Option<NodeId>,
        limit: usize,
    ) -> Result<NodePage, RepositoryError> {
        let limit = limit.max(1);
        let mut candidates: Vec<Node> = self
            .nodes
            .read()
            .values()
            .filter(|n| after.map(|cursor| n.id > cursor).unwrap_or(true))
            .filter(|n| filter.matches_fields(n))
            .cloned()
            .collect();
        candidates.sort_by_key(|n| n.id);

        let next = if candidates.len() > limit {
            candidates.truncate(limit);
            candidates.last().map(|n| n.id)
        } else {
            None
        };

        let nodes = candidates
            .into_iter()
            .filter(|n| filter.matches_predicate(n))
            .collect();
        Ok(NodePage { nodes, next })
    }

    async fn live_usage(&self, owner: &PrincipalId) -> Result<u64, RepositoryError> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.owner == *owner && !n.is_deleted())
            .map(Node::size)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_live_siblings_must_differ_case_insensitively() {
        let repo = InMemoryNodeRepository::new();
        let root = Node::new_root("alice".into());
        repo.insert(&root).await.unwrap();

        let first = Node::new_collection(root.id, "alice".into(), "Docs".into());
        repo.insert(&first).await.unwrap();

        let second = Node::new_collection(root.id, "alice".into(), "docs".into());
        assert!(matches!(
            repo.insert(&second).await,
            Err(RepositoryError::Conflict(_))
        ));

        let mut trashed = first.clone();
        trashed.deleted = Some(Utc::now());
        repo.update(&trashed).await.unwrap();
        repo.insert(&second).await.unwrap();

        assert!(repo.find_child(root.id, "DOCS").await.unwrap().map(|n| n.id) == Some(second.id));
        assert_eq!(repo.find_children(root.id, true).await.unwrap().len(), 2);
        assert_eq!(repo.find_children(root.id, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_root_per_owner() {
        let repo = InMemoryNodeRepository::new();
        repo.insert(&Node::new_root("alice".into())).await.unwrap();
        assert!(repo.insert(&Node::new_root("alice".into())).await.is_err());
        repo.insert(&Node::new_root("bob".into())).await.unwrap();
        assert!(repo.find_root(&"bob".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pages_cover_every_match_once() {
        let repo = InMemoryNodeRepository::new();
        let root = Node::new_root("alice".into());
        repo.insert(&root).await.unwrap();
        for i in 0..7 {
            let node = Node::new_collection(root.id, "alice".into(), format!("c{}", i));
            repo.insert(&node).await.unwrap();
        }

        let filter = NodeFilter::new().parent(root.id).matching(|n| n.name != "c3");
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = repo.find_page(&filter, cursor, 3).await.unwrap();
            seen.extend(page.nodes.into_iter().map(|n| n.name));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["c0", "c1", "c2", "c4", "c5", "c6"]);
    }

    #[tokio::test]
    async fn test_update_missing_node_is_not_found() {
        let repo = InMemoryNodeRepository::new();
        let node = Node::new_root("alice".into());
        assert!(matches!(
            repo.update(&node).await,
            Err(RepositoryError::NotFound(_))
        ));
        repo.remove(node.id).await.unwrap();
    }
}
