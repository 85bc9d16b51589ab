// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access control
//!
//! Nodes carry an optional list of [`AclRule`]s. The rule set that applies to
//! a node is the nearest non-empty one found walking from the node towards
//! its root. Owners are always allowed. Within a rule set an explicit deny
//! wins over any grant.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Authorization decisions for filesystem actions

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::FilesystemError;
use crate::domain::node::{Node, PrincipalId};
use crate::domain::repository::NodeRepository;

/// Who a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum AclSubject {
    User(PrincipalId),
    Group(String),
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Deny,
    Read,
    Write,
    ReadWrite,
    Manage,
}

impl Privilege {
    pub fn permits(&self, action: Action) -> bool {
        match self {
            Privilege::Deny => false,
            Privilege::Read => action == Action::Read,
            // Write-only drop boxes: create and overwrite without listing
            Privilege::Write => matches!(action, Action::Create | Action::Write),
            Privilege::ReadWrite => !matches!(action, Action::Manage),
            Privilege::Manage => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub subject: AclSubject,
    pub privilege: Privilege,
}

impl AclRule {
    pub fn new(subject: AclSubject, privilege: Privilege) -> Self {
        Self { subject, privilege }
    }

    fn applies_to(&self, ctx: &RequestContext) -> bool {
        match &self.subject {
            AclSubject::User(id) => *id == ctx.principal,
            AclSubject::Group(group) => ctx.groups.iter().any(|g| g == group),
            AclSubject::Everyone => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Write,
    Delete,
    Manage,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Manage => "manage",
        };
        f.write_str(label)
    }
}

/// Per-request caller identity
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: PrincipalId,
    pub groups: Vec<String>,
    /// Lock token presented by the caller (e.g. a WebDAV `If` header)
    pub lock_token: Option<String>,
    pub correlation_id: Uuid,
}

impl RequestContext {
    pub fn new(principal: impl Into<PrincipalId>) -> Self {
        Self {
            principal: principal.into(),
            groups: Vec::new(),
            lock_token: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        PrincipalId(id)
    }
}

#[async_trait]
pub trait AclEvaluator: Send + Sync {
    async fn is_allowed(&self, ctx: &RequestContext, node: &Node, action: Action) -> Result<bool, FilesystemError>;
}

/// Evaluates rules stored on nodes, inheriting from the nearest ancestor
/// that has any.
pub struct RuleAclEvaluator {
    repository: Arc<dyn NodeRepository>,
}

impl RuleAclEvaluator {
    pub fn new(repository: Arc<dyn NodeRepository>) -> Self {
        Self { repository }
    }

    fn decide(rules: &[AclRule], ctx: &RequestContext, action: Action) -> bool {
        let mut granted = false;
        for rule in rules.iter().filter(|r| r.applies_to(ctx)) {
            if rule.privilege == Privilege::Deny {
                return false;
            }
            granted |= rule.privilege.permits(action);
        }
        granted
    }
}

#[async_trait]
impl AclEvaluator for RuleAclEvaluator {
    async fn is_allowed(&self, ctx: &RequestContext, node: &Node, action: Action) -> Result<bool, FilesystemError> {
        if node.owner == ctx.principal {
            return Ok(true);
        }
        if !node.acl.is_empty() {
            return Ok(Self::decide(&node.acl, ctx, action));
        }

        let mut visited = HashSet::from([node.id]);
        let mut next = node.parent;
        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                tracing::error!(node = %node.id, "Cycle detected while walking ancestors");
                return Ok(false);
            }
            let Some(parent) = self.repository.find_by_id(parent_id).await? else {
                break;
            };
            if !parent.acl.is_empty() {
                return Ok(Self::decide(&parent.acl, ctx, action));
            }
            next = parent.parent;
        }
        Ok(false)
    }
}

/// Evaluator that allows everything. Used for system tasks and tests.
pub struct AllowAll;

#[async_trait]
impl AclEvaluator for AllowAll {
    async fn is_allowed(&self, _ctx: &RequestContext, _node: &Node, _action: Action) -> Result<bool, FilesystemError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::NodeId;
    use crate::infrastructure::repositories::InMemoryNodeRepository;

    async fn tree() -> (Arc<InMemoryNodeRepository>, Node, Node) {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let root = Node::new_root("alice".into());
        let mut shared = Node::new_collection(root.id, "alice".into(), "shared".into());
        shared.acl = vec![
            AclRule::new(AclSubject::Group("staff".into()), Privilege::ReadWrite),
            AclRule::new(AclSubject::User("mallory".into()), Privilege::Deny),
        ];
        let child = Node::new_collection(shared.id, "alice".into(), "inner".into());
        repo.insert(&root).await.unwrap();
        repo.insert(&shared).await.unwrap();
        repo.insert(&child).await.unwrap();
        (repo, shared, child)
    }

    #[tokio::test]
    async fn test_owner_is_always_allowed() {
        let (repo, _, child) = tree().await;
        let evaluator = RuleAclEvaluator::new(repo);
        let ctx = RequestContext::new("alice");
        assert!(evaluator.is_allowed(&ctx, &child, Action::Manage).await.unwrap());
    }

    #[tokio::test]
    async fn test_rules_are_inherited_from_nearest_ancestor() {
        let (repo, _, child) = tree().await;
        let evaluator = RuleAclEvaluator::new(repo);

        let staff = RequestContext::new("bob").with_groups(vec!["staff".into()]);
        assert!(evaluator.is_allowed(&staff, &child, Action::Write).await.unwrap());
        assert!(!evaluator.is_allowed(&staff, &child, Action::Manage).await.unwrap());

        let stranger = RequestContext::new("eve");
        assert!(!evaluator.is_allowed(&stranger, &child, Action::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_deny_wins_over_group_grant() {
        let (repo, shared, _) = tree().await;
        let evaluator = RuleAclEvaluator::new(repo);
        let mallory = RequestContext::new("mallory").with_groups(vec!["staff".into()]);
        assert!(!evaluator.is_allowed(&mallory, &shared, Action::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_node_without_any_rules_is_private() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let evaluator = RuleAclEvaluator::new(repo);
        let node = Node::new_collection(NodeId::new(), "alice".into(), "private".into());
        let ctx = RequestContext::new("bob");
        assert!(!evaluator.is_allowed(&ctx, &node, Action::Read).await.unwrap());
    }

    #[test]
    fn test_write_privilege_does_not_grant_read() {
        assert!(Privilege::Write.permits(Action::Create));
        assert!(!Privilege::Write.permits(Action::Read));
        assert!(Privilege::ReadWrite.permits(Action::Delete));
        assert!(!Privilege::Deny.permits(Action::Read));
    }
}
