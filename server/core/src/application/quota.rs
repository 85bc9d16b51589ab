// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Quota accounting
//!
//! Usage is the sum of the current-version sizes of a principal's live
//! files. Every write path asks the guard before touching a storage adapter,
//! so a rejected write never consumes storage.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::error::FilesystemError;
use crate::domain::node::PrincipalId;
use crate::domain::principal::{PrincipalDirectory, QuotaUsage};
use crate::domain::repository::NodeRepository;

pub struct QuotaGuard {
    principals: Arc<dyn PrincipalDirectory>,
    repository: Arc<dyn NodeRepository>,
    max_file_size: Option<u64>,
}

impl QuotaGuard {
    pub fn new(
        principals: Arc<dyn PrincipalDirectory>,
        repository: Arc<dyn NodeRepository>,
        max_file_size: Option<u64>,
    ) -> Self {
        Self {
            principals,
            repository,
            max_file_size,
        }
    }

    pub async fn usage(&self, owner: &PrincipalId) -> Result<QuotaUsage, FilesystemError> {
        let principal = self.principals.resolve(owner).await?;
        let used_bytes = self.repository.live_usage(owner).await?;
        Ok(QuotaUsage {
            used_bytes,
            hard_limit_bytes: principal.quota.hard_limit_bytes,
        })
    }

    /// Check a single payload of `size` bytes replacing `released` bytes of
    /// the owner's current usage. The absolute file size ceiling applies here.
    pub async fn check_payload(&self, owner: &PrincipalId, size: u64, released: u64) -> Result<(), FilesystemError> {
        if let Some(max) = self.max_file_size {
            if size > max {
                warn!(owner = %owner, requested = size, max, "Payload exceeds maximum file size");
                return Err(FilesystemError::InsufficientStorage {
                    requested: size,
                    available: max,
                });
            }
        }
        self.check_usage(owner, size, released).await
    }

    /// Check that `owner` can take on `additional` bytes while `released`
    /// bytes of their current usage go away in the same operation.
    pub async fn check_usage(&self, owner: &PrincipalId, additional: u64, released: u64) -> Result<(), FilesystemError> {
        let usage = self.usage(owner).await?;
        let Some(limit) = usage.hard_limit_bytes else {
            return Ok(());
        };

        let retained = usage.used_bytes.saturating_sub(released);
        let projected = retained.saturating_add(additional);
        if projected > limit {
            let available = limit.saturating_sub(retained);
            warn!(
                owner = %owner,
                requested = additional,
                available,
                "Quota exceeded"
            );
            return Err(FilesystemError::InsufficientStorage {
                requested: additional,
                available,
            });
        }

        debug!(owner = %owner, projected, limit, "Quota check passed");
        Ok(())
    }
}
