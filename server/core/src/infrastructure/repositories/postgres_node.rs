// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Node Repository
//!
//! Each node is stored as a JSONB document next to the columns that queries
//! filter on. Live sibling uniqueness and the one-root-per-owner rule are
//! enforced by partial unique indexes, so concurrent writers race on the
//! database rather than on a read-then-write check.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** PostgreSQL implementation of `NodeRepository`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::domain::name::sibling_key;
use crate::domain::node::{Node, NodeId, PrincipalId};
use crate::domain::repository::{NodeFilter, NodePage, NodeRepository, RepositoryError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id UUID PRIMARY KEY,
    parent UUID NULL,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL,
    is_collection BOOLEAN NOT NULL,
    size BIGINT NOT NULL DEFAULT 0,
    deleted TIMESTAMPTZ NULL,
    destroy TIMESTAMPTZ NULL,
    document JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    changed_at TIMESTAMPTZ NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS nodes_live_sibling_idx
    ON nodes (parent, name_key) WHERE deleted IS NULL AND parent IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS nodes_root_idx
    ON nodes (owner) WHERE parent IS NULL;
CREATE INDEX IF NOT EXISTS nodes_parent_idx ON nodes (parent);
CREATE INDEX IF NOT EXISTS nodes_owner_idx ON nodes (owner);
CREATE INDEX IF NOT EXISTS nodes_deleted_idx ON nodes (deleted) WHERE deleted IS NOT NULL;
CREATE INDEX IF NOT EXISTS nodes_destroy_idx ON nodes (destroy) WHERE destroy IS NOT NULL;
"#;

pub struct PostgresNodeRepository {
    pool: PgPool,
}

impl PostgresNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to create schema: {}", e)))?;
        Ok(())
    }
}

fn parse_node_row(row: PgRow) -> Result<Node, RepositoryError> {
    let Json(node): Json<Node> = row.try_get("document")?;
    Ok(node)
}

/// Append the structured part of `filter` as `AND` clauses.
pub(crate) fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &NodeFilter) {
    if let Some(owner) = &filter.owner {
        builder.push(" AND owner = ").push_bind(owner.0.clone());
    }
    if let Some(parent) = filter.parent {
        builder.push(" AND parent = ").push_bind(parent.0);
    }
    if let Some(is_collection) = filter.is_collection {
        builder.push(" AND is_collection = ").push_bind(is_collection);
    }
    match filter.deleted {
        Some(true) => {
            builder.push(" AND deleted IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND deleted IS NULL");
        }
        None => {}
    }
    if let Some(at) = filter.destroy_before {
        builder.push(" AND destroy IS NOT NULL AND destroy <= ").push_bind(at);
    }
}

#[async_trait]
impl NodeRepository for PostgresNodeRepository {
    async fn insert(&self, node: &Node) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(node)?;

        sqlx::query(
            r#"
            INSERT INTO nodes (
                id, parent, owner, name, name_key, is_collection, size,
                deleted, destroy, document, created_at, changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(node.id.0)
        .bind(node.parent.map(|p| p.0))
        .bind(node.owner.as_str())
        .bind(&node.name)
        .bind(node.name_key())
        .bind(node.is_collection())
        .bind(node.size() as i64)
        .bind(node.deleted)
        .bind(node.destroy)
        .bind(document)
        .bind(node.created_at)
        .bind(node.changed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, node: &Node) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(node)?;

        let result = sqlx::query(
            r#"
            UPDATE nodes SET
                parent = $2,
                owner = $3,
                name = $4,
                name_key = $5,
                size = $6,
                deleted = $7,
                destroy = $8,
                document = $9,
                changed_at = $10
            WHERE id = $1
            "#,
        )
        .bind(node.id.0)
        .bind(node.parent.map(|p| p.0))
        .bind(node.owner.as_str())
        .bind(&node.name)
        .bind(node.name_key())
        .bind(node.size() as i64)
        .bind(node.deleted)
        .bind(node.destroy)
        .bind(document)
        .bind(node.changed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(node.id.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, id: NodeId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM nodes WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_node_row).transpose()
    }

    async fn find_root(&self, owner: &PrincipalId) -> Result<Option<Node>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM nodes WHERE owner = $1 AND parent IS NULL")
            .bind(owner.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_node_row).transpose()
    }

    async fn find_child(&self, parent: NodeId, name: &str) -> Result<Option<Node>, RepositoryError> {
        let row = sqlx::query(
            "SELECT document FROM nodes WHERE parent = $1 AND name_key = $2 AND deleted IS NULL",
        )
        .bind(parent.0)
        .bind(sibling_key(name))
        .fetch_optional(&self.pool)
        .await?;
        row.map(parse_node_row).transpose()
    }

    async fn find_children(&self, parent: NodeId, include_deleted: bool) -> Result<Vec<Node>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM nodes
            WHERE parent = $1 AND ($2 OR deleted IS NULL)
            ORDER BY name
            "#,
        )
        .bind(parent.0)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_node_row).collect()
    }

    async fn find_page(
        &self,
        filter: &NodeFilter,
        after: Option<NodeId>,
        limit: usize,
    ) -> Result<NodePage, RepositoryError> {
        let limit = limit.max(1);
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id, document FROM nodes WHERE TRUE");
        push_filter(&mut builder, filter);
        if let Some(cursor) = after {
            builder.push(" AND id > ").push_bind(cursor.0);
        }
        builder.push(" ORDER BY id LIMIT ").push_bind(limit as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let scanned = rows.len();
        let last: Option<Uuid> = match rows.last() {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        };

        let mut nodes = Vec::with_capacity(scanned);
        for row in rows {
            let node = parse_node_row(row)?;
            if filter.matches_predicate(&node) {
                nodes.push(node);
            }
        }

        let next = if scanned == limit { last.map(NodeId) } else { None };
        Ok(NodePage { nodes, next })
    }

    async fn live_usage(&self, owner: &PrincipalId) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(size), 0)::BIGINT AS used
            FROM nodes
            WHERE owner = $1 AND deleted IS NULL AND NOT is_collection
            "#,
        )
        .bind(owner.as_str())
        .fetch_one(&self.pool)
        .await?;
        let used: i64 = row.try_get("used")?;
        Ok(used.max(0) as u64)
    }
}
