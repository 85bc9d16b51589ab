// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Picks the concrete `NodeRepository` for the configured backend, keeping the
//! domain layer free of infrastructure types.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::domain::repository::{NodeRepository, RepositoryError, StorageBackend};
use crate::infrastructure::repositories::{InMemoryNodeRepository, PostgresNodeRepository};

const MAX_CONNECTIONS: u32 = 10;

/// Creates a NodeRepository implementation based on the configured backend.
///
/// For PostgreSQL the pool is opened and the `nodes` schema created if
/// missing.
pub async fn create_node_repository(backend: &StorageBackend) -> Result<Arc<dyn NodeRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory node repository");
            Ok(Arc::new(InMemoryNodeRepository::new()))
        }
        StorageBackend::PostgreSQL(config) => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect(&config.connection_string)
                .await?;
            let repository = PostgresNodeRepository::new(pool);
            repository.ensure_schema().await?;
            info!("Using PostgreSQL node repository");
            Ok(Arc::new(repository))
        }
    }
}
