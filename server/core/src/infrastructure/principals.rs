// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory [`PrincipalDirectory`].
//!
//! Principals that were never registered resolve to the configured default
//! quota and no groups, so every authenticated id can own a tree.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::config::QuotaConfig;
use crate::domain::error::FilesystemError;
use crate::domain::node::PrincipalId;
use crate::domain::principal::{Principal, PrincipalDirectory, Quota};

#[derive(Clone, Default)]
pub struct InMemoryPrincipalDirectory {
    principals: Arc<RwLock<HashMap<PrincipalId, Principal>>>,
    default_quota: Quota,
}

impl InMemoryPrincipalDirectory {
    pub fn new(default_quota: Quota) -> Self {
        Self {
            principals: Arc::new(RwLock::new(HashMap::new())),
            default_quota,
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(Quota {
            hard_limit_bytes: config.default_hard_limit_bytes,
        })
    }

    /// Add or replace a principal.
    pub fn register(&self, principal: Principal) {
        self.principals.write().insert(principal.id.clone(), principal);
    }

    pub fn set_quota(&self, id: &PrincipalId, quota: Quota) {
        let mut principals = self.principals.write();
        principals
            .entry(id.clone())
            .or_insert_with(|| Principal::new(id.clone(), self.default_quota))
            .quota = quota;
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn resolve(&self, id: &PrincipalId) -> Result<Principal, FilesystemError> {
        if let Some(principal) = self.principals.read().get(id) {
            return Ok(principal.clone());
        }
        debug!(principal = %id, "Unregistered principal, using default quota");
        Ok(Principal::new(id.clone(), self.default_quota))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_principal_gets_default_quota() {
        let directory = InMemoryPrincipalDirectory::new(Quota::limited(100));
        let principal = directory.resolve(&"carol".into()).await.unwrap();
        assert_eq!(principal.quota.hard_limit_bytes, Some(100));
        assert!(principal.groups.is_empty());
    }

    #[tokio::test]
    async fn test_registered_quota_overrides_default() {
        let directory = InMemoryPrincipalDirectory::new(Quota::limited(100));
        directory.set_quota(&"alice".into(), Quota::unlimited());
        let principal = directory.resolve(&"alice".into()).await.unwrap();
        assert_eq!(principal.quota, Quota::unlimited());
    }
}
