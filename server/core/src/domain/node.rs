// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node aggregate
//!
//! A [`Node`] is the persisted record of a file or a collection. Files carry
//! an ordered list of [`Version`]s, each pointing at an immutable payload in a
//! storage adapter. Collections may pin a storage adapter for the files
//! created beneath them.
//!
//! Lifecycle:
//! - live: `deleted` unset, visible in listings and path resolution
//! - trashed: `deleted` set, restorable, keeps its payloads
//! - destroyed: record removed and payloads released
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Node state and the invariants that can be checked on a
//!   single record

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::acl::AclRule;
use crate::domain::error::FilesystemError;
use crate::domain::name::sibling_key;
use crate::domain::storage::StoragePointer;

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a user as issued by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Collection,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::File => f.write_str("file"),
            NodeType::Collection => f.write_str("collection"),
        }
    }
}

/// Immutable snapshot of a file's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version: u32,
    pub pointer: StoragePointer,
    pub size: u64,
    /// Lowercase hex SHA-256 of the payload
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub created_by: PrincipalId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub versions: Vec<Version>,
    pub current_version: u32,
}

impl FileContent {
    pub fn current(&self) -> Option<&Version> {
        self.get(self.current_version)
    }

    pub fn get(&self, version: u32) -> Option<&Version> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Size of the current version, zero for an empty history.
    pub fn size(&self) -> u64 {
        self.current().map(|v| v.size).unwrap_or(0)
    }

    pub fn next_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProps {
    /// Adapter used for files created anywhere beneath this collection
    pub storage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    File(FileContent),
    Collection(CollectionProps),
}

/// Exclusive write lock held on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub id: String,
    pub owner: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Attributes accepted when a node is created
#[derive(Debug, Clone, Default)]
pub struct NodeAttributes {
    pub readonly: bool,
    pub destroy: Option<DateTime<Utc>>,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub acl: Vec<AclRule>,
    /// Only meaningful for collections
    pub storage: Option<String>,
}

/// Partial attribute change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AttributeUpdate {
    pub readonly: Option<bool>,
    pub destroy: Option<Option<DateTime<Utc>>>,
    /// A `None` value removes the key
    pub meta: BTreeMap<String, Option<serde_json::Value>>,
    pub acl: Option<Vec<AclRule>>,
    pub storage: Option<Option<String>>,
}

impl AttributeUpdate {
    pub fn is_empty(&self) -> bool {
        self.readonly.is_none()
            && self.destroy.is_none()
            && self.meta.is_empty()
            && self.acl.is_none()
            && self.storage.is_none()
    }
}

// ============================================================================
// Aggregate Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// `None` only for a principal's root collection
    pub parent: Option<NodeId>,
    pub owner: PrincipalId,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub acl: Vec<AclRule>,
    pub lock: Option<Lock>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
    pub deleted: Option<DateTime<Utc>>,
    pub destroy: Option<DateTime<Utc>>,
}

impl Node {
    fn build(parent: Option<NodeId>, owner: PrincipalId, name: String, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            parent,
            owner,
            name,
            kind,
            acl: Vec::new(),
            lock: None,
            readonly: false,
            meta: BTreeMap::new(),
            created_at: now,
            changed_at: now,
            deleted: None,
            destroy: None,
        }
    }

    /// Root collection of `owner`. Roots have no parent and an empty name.
    pub fn new_root(owner: PrincipalId) -> Self {
        Self::build(
            None,
            owner,
            String::new(),
            NodeKind::Collection(CollectionProps::default()),
        )
    }

    /// `name` must already be normalized.
    pub fn new_collection(parent: NodeId, owner: PrincipalId, name: String) -> Self {
        Self::build(
            Some(parent),
            owner,
            name,
            NodeKind::Collection(CollectionProps::default()),
        )
    }

    /// `name` must already be normalized. `first` becomes the current version.
    pub fn new_file(parent: NodeId, owner: PrincipalId, name: String, first: Version) -> Self {
        let current_version = first.version;
        Self::build(
            Some(parent),
            owner,
            name,
            NodeKind::File(FileContent {
                versions: vec![first],
                current_version,
            }),
        )
    }

    pub fn apply_attributes(&mut self, attributes: NodeAttributes) {
        self.readonly = attributes.readonly;
        self.destroy = attributes.destroy;
        self.meta = attributes.meta;
        self.acl = attributes.acl;
        if let NodeKind::Collection(props) = &mut self.kind {
            props.storage = attributes.storage;
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::File(_) => NodeType::File,
            NodeKind::Collection(_) => NodeType::Collection,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, NodeKind::Collection(_))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn file(&self) -> Option<&FileContent> {
        match &self.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Collection(_) => None,
        }
    }

    pub fn file_mut(&mut self) -> Option<&mut FileContent> {
        match &mut self.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Collection(_) => None,
        }
    }

    /// Storage adapter pinned on this collection, if any.
    pub fn pinned_storage(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Collection(props) => props.storage.as_deref(),
            NodeKind::File(_) => None,
        }
    }

    /// Size of the current version; collections report zero.
    pub fn size(&self) -> u64 {
        self.file().map(FileContent::size).unwrap_or(0)
    }

    pub fn name_key(&self) -> String {
        sibling_key(&self.name)
    }

    pub fn touch(&mut self) {
        self.changed_at = Utc::now();
    }

    /// The lock currently in force, ignoring expired ones.
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<&Lock> {
        self.lock.as_ref().filter(|lock| !lock.is_expired_at(now))
    }

    /// Verify that a request carrying `token` may mutate this node.
    pub fn check_lock(&self, token: Option<&str>, now: DateTime<Utc>) -> Result<(), FilesystemError> {
        match self.active_lock(now) {
            None => Ok(()),
            Some(lock) => match token {
                Some(token) if token == lock.id => Ok(()),
                Some(_) => Err(FilesystemError::LockIdMismatch(self.id)),
                None => Err(FilesystemError::Locked(self.id)),
            },
        }
    }

    /// Append `version` and make it current.
    ///
    /// At most `max_versions` entries are kept. The oldest non-current
    /// versions are dropped first and returned so their payloads can be
    /// released once the record is saved.
    pub fn push_version(&mut self, version: Version, max_versions: usize) -> Result<Vec<Version>, FilesystemError> {
        let id = self.id;
        let content = self
            .file_mut()
            .ok_or_else(|| FilesystemError::InvalidArgument(format!("node {} is not a file", id)))?;

        content.current_version = version.version;
        content.versions.push(version);

        let keep = max_versions.max(1);
        let mut pruned = Vec::new();
        while content.versions.len() > keep {
            let current = content.current_version;
            let oldest = content
                .versions
                .iter()
                .enumerate()
                .filter(|(_, v)| v.version != current)
                .min_by_key(|(_, v)| v.version)
                .map(|(idx, _)| idx);
            match oldest {
                Some(idx) => pruned.push(content.versions.remove(idx)),
                None => break,
            }
        }
        self.touch();
        Ok(pruned)
    }

    /// Make an existing version current again.
    pub fn restore_version(&mut self, version: u32) -> Result<(), FilesystemError> {
        let id = self.id;
        let content = self
            .file_mut()
            .ok_or_else(|| FilesystemError::InvalidArgument(format!("node {} is not a file", id)))?;
        if content.get(version).is_none() {
            return Err(FilesystemError::NotFound(format!(
                "version {} of node {}",
                version, id
            )));
        }
        content.current_version = version;
        self.touch();
        Ok(())
    }

    pub fn mark_deleted(&mut self, at: DateTime<Utc>, destroy: Option<DateTime<Utc>>) {
        self.deleted = Some(at);
        if destroy.is_some() {
            self.destroy = destroy;
        }
        self.changed_at = at;
    }

    pub fn mark_restored(&mut self, clear_destroy: bool) {
        self.deleted = None;
        if clear_destroy {
            self.destroy = None;
        }
        self.touch();
    }

    /// Apply a partial attribute change.
    pub fn apply_update(&mut self, update: &AttributeUpdate) {
        if let Some(readonly) = update.readonly {
            self.readonly = readonly;
        }
        if let Some(destroy) = update.destroy {
            self.destroy = destroy;
        }
        for (key, value) in &update.meta {
            match value {
                Some(value) => {
                    self.meta.insert(key.clone(), value.clone());
                }
                None => {
                    self.meta.remove(key);
                }
            }
        }
        if let Some(acl) = &update.acl {
            self.acl = acl.clone();
        }
        if let (Some(storage), NodeKind::Collection(props)) = (&update.storage, &mut self.kind) {
            props.storage = storage.clone();
        }
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(n: u32, size: u64) -> Version {
        Version {
            version: n,
            pointer: StoragePointer::new("memory", format!("blob-{}", n)),
            size,
            checksum: format!("{:064x}", n),
            created_at: Utc::now(),
            created_by: PrincipalId::from("alice"),
        }
    }

    fn file() -> Node {
        Node::new_file(NodeId::new(), "alice".into(), "a.txt".into(), version(1, 10))
    }

    #[test]
    fn test_new_file_starts_at_first_version() {
        let node = file();
        assert_eq!(node.file().unwrap().current_version, 1);
        assert_eq!(node.size(), 10);
        assert!(!node.is_collection());
        assert!(!node.is_deleted());
    }

    #[test]
    fn test_push_version_prunes_oldest_non_current() {
        let mut node = file();
        assert!(node.push_version(version(2, 20), 2).unwrap().is_empty());

        let pruned = node.push_version(version(3, 30), 2).unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].version, 1);

        let content = node.file().unwrap();
        assert_eq!(content.current_version, 3);
        assert_eq!(content.versions.len(), 2);
        assert_eq!(node.size(), 30);
    }

    #[test]
    fn test_pruning_keeps_restored_current_version() {
        let mut node = file();
        node.push_version(version(2, 20), 2).unwrap();
        node.restore_version(1).unwrap();
        assert_eq!(node.size(), 10);

        let next = node.file().unwrap().next_version();
        assert_eq!(next, 3);
        let pruned = node.push_version(version(next, 30), 2).unwrap();
        assert_eq!(pruned.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_restore_unknown_version_is_not_found() {
        let mut node = file();
        assert!(matches!(
            node.restore_version(9),
            Err(FilesystemError::NotFound(_))
        ));
    }

    #[test]
    fn test_lock_check() {
        let mut node = file();
        let now = Utc::now();
        assert!(node.check_lock(None, now).is_ok());

        node.lock = Some(Lock {
            id: "T1".into(),
            owner: "alice".into(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        });
        assert!(node.check_lock(Some("T1"), now).is_ok());
        assert!(matches!(
            node.check_lock(Some("T2"), now),
            Err(FilesystemError::LockIdMismatch(_))
        ));
        assert!(matches!(
            node.check_lock(None, now),
            Err(FilesystemError::Locked(_))
        ));

        let later = now + chrono::Duration::minutes(10);
        assert!(node.check_lock(None, later).is_ok());
    }

    #[test]
    fn test_apply_update_merges_meta() {
        let mut node = Node::new_collection(NodeId::new(), "alice".into(), "docs".into());
        node.meta.insert("color".into(), serde_json::json!("red"));
        node.meta.insert("tag".into(), serde_json::json!("x"));

        let mut update = AttributeUpdate {
            readonly: Some(true),
            storage: Some(Some("share".into())),
            ..Default::default()
        };
        update.meta.insert("color".into(), Some(serde_json::json!("blue")));
        update.meta.insert("tag".into(), None);
        node.apply_update(&update);

        assert!(node.readonly);
        assert_eq!(node.meta.get("color"), Some(&serde_json::json!("blue")));
        assert!(!node.meta.contains_key("tag"));
        assert_eq!(node.pinned_storage(), Some("share"));
    }

    #[test]
    fn test_node_document_round_trips_through_json() {
        let node = file();
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["kind"]["type"], "file");
        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }
}
