// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Principals and their quota
//!
//! Authentication is out of scope; the filesystem only needs to resolve a
//! principal id into its groups and storage limit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::FilesystemError;
use crate::domain::node::PrincipalId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// `None` means unlimited
    pub hard_limit_bytes: Option<u64>,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limited(bytes: u64) -> Self {
        Self {
            hard_limit_bytes: Some(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub quota: Quota,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>, quota: Quota) -> Self {
        Self {
            id: id.into(),
            groups: Vec::new(),
            quota,
        }
    }
}

/// Snapshot of a principal's storage consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used_bytes: u64,
    pub hard_limit_bytes: Option<u64>,
}

impl QuotaUsage {
    /// Bytes left before the hard limit, `None` if unlimited.
    pub fn available_bytes(&self) -> Option<u64> {
        self.hard_limit_bytes
            .map(|limit| limit.saturating_sub(self.used_bytes))
    }
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn resolve(&self, id: &PrincipalId) -> Result<Principal, FilesystemError>;
}
