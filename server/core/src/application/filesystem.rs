// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Filesystem Application Service
//!
//! The only component that mutates the node hierarchy. It coordinates:
//! - Domain layer: `Node` aggregate, ACL evaluation, hooks
//! - Infrastructure layer: `NodeRepository`, `StorageAdapter`s
//! - Quota accounting through [`QuotaGuard`]
//!
//! Every mutating operation follows the same order: resolve and validate,
//! authorize, check read-only flags and locks, check quota, fire the pre-hook,
//! perform storage I/O, commit the record, release superseded payloads, fire
//! the post-hook. A record is never committed for bytes that are not stored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::quota::QuotaGuard;
use crate::domain::acl::{Action, AclEvaluator, RequestContext};
use crate::domain::attributes::AttributeRegistry;
use crate::domain::config::FilesystemConfigSpec;
use crate::domain::error::{ConflictReason, FilesystemError};
use crate::domain::hooks::{HookEvent, HookRegistry};
use crate::domain::name::normalize_name;
use crate::domain::node::{
    AttributeUpdate, FileContent, Lock, Node, NodeAttributes, NodeId, NodeKind, NodeType,
    PrincipalId, Version,
};
use crate::domain::path::PathSanitizer;
use crate::domain::principal::{PrincipalDirectory, QuotaUsage};
use crate::domain::repository::{NodeFilter, NodeRepository, RepositoryError};
use crate::domain::storage::{ContentStream, StorageAdapter, StorageError, StoragePointer, StorageRegistry};

const DEFAULT_PAGE_SIZE: usize = 500;
const MAX_RESTORE_SUFFIX: u32 = 1000;

// ============================================================================
// Settings and options
// ============================================================================

#[derive(Debug, Clone)]
pub struct FilesystemSettings {
    pub max_versions: usize,
    pub default_lock_ttl: Duration,
    pub max_lock_ttl: Duration,
    /// When set, soft deletes schedule `destroy` this far in the future
    pub trash_retention: Option<chrono::Duration>,
    pub max_file_size: Option<u64>,
    /// Page size used by lazy queries
    pub page_size: usize,
}

impl Default for FilesystemSettings {
    fn default() -> Self {
        Self {
            max_versions: 16,
            default_lock_ttl: Duration::from_secs(1800),
            max_lock_ttl: Duration::from_secs(86400),
            trash_retention: None,
            max_file_size: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl FilesystemSettings {
    pub fn from_spec(spec: &FilesystemConfigSpec) -> Self {
        Self {
            max_versions: spec.versions.max_versions,
            default_lock_ttl: Duration::from_secs(spec.locks.default_ttl_seconds),
            max_lock_ttl: Duration::from_secs(spec.locks.max_ttl_seconds),
            trash_retention: spec
                .trash
                .retention_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            max_file_size: spec.quota.max_file_size_bytes,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A node addressed by id or by a path relative to the caller's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Id(NodeId),
    Path(String),
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Id(id)
    }
}

impl From<&str> for NodeRef {
    fn from(path: &str) -> Self {
        NodeRef::Path(path.to_string())
    }
}

impl From<String> for NodeRef {
    fn from(path: String) -> Self {
        NodeRef::Path(path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Remove records and payloads instead of moving to the trash
    pub force: bool,
    /// Trash a collection together with its live descendants
    pub recursive: bool,
    /// Correlation id for the cascade; generated when absent
    pub recursion_token: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl DeleteOptions {
    pub fn soft() -> Self {
        Self::default()
    }

    pub fn cascade() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn hard() -> Self {
        Self {
            force: true,
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_recursion_token(mut self, token: impl Into<String>) -> Self {
        self.recursion_token = Some(token.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Pick `name (restored)`, `name (restored 2)`... instead of failing on a
    /// name clash
    pub rename_on_conflict: bool,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Name of the copy, defaults to the source name
    pub name: Option<String>,
    pub cancel: Option<CancellationToken>,
}

// ============================================================================
// Service
// ============================================================================

pub struct FilesystemService {
    repository: Arc<dyn NodeRepository>,
    storage: StorageRegistry,
    acl: Arc<dyn AclEvaluator>,
    quota: QuotaGuard,
    hooks: HookRegistry,
    attributes: AttributeRegistry,
    paths: PathSanitizer,
    settings: FilesystemSettings,
}

impl FilesystemService {
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        storage: StorageRegistry,
        acl: Arc<dyn AclEvaluator>,
        principals: Arc<dyn PrincipalDirectory>,
        hooks: HookRegistry,
        settings: FilesystemSettings,
    ) -> Self {
        let quota = QuotaGuard::new(principals, repository.clone(), settings.max_file_size);
        Self {
            repository,
            storage,
            acl,
            quota,
            hooks,
            attributes: AttributeRegistry::standard(),
            paths: PathSanitizer::new(),
            settings,
        }
    }

    pub fn with_attributes(mut self, attributes: AttributeRegistry) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn settings(&self) -> &FilesystemSettings {
        &self.settings
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Root collection of the caller, created on first use.
    pub async fn root(&self, ctx: &RequestContext) -> Result<Node, FilesystemError> {
        if let Some(root) = self.repository.find_root(&ctx.principal).await? {
            return Ok(root);
        }

        let root = Node::new_root(ctx.principal.clone());
        match self.repository.insert(&root).await {
            Ok(()) => {
                info!(owner = %ctx.principal, node_id = %root.id, "Created root collection");
                Ok(root)
            }
            // Another request created it first
            Err(RepositoryError::Conflict(_)) => self
                .repository
                .find_root(&ctx.principal)
                .await?
                .ok_or_else(|| FilesystemError::NotFound(format!("root of {}", ctx.principal))),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a node by id or path. A type mismatch is reported as not found.
    pub async fn get_node(
        &self,
        ctx: &RequestContext,
        node: impl Into<NodeRef>,
        expected: Option<NodeType>,
    ) -> Result<Node, FilesystemError> {
        let node_ref = node.into();
        let node = self.resolve(ctx, &node_ref).await?;
        if let Some(expected) = expected {
            if node.node_type() != expected {
                return Err(FilesystemError::NotFound(format!(
                    "{} {} is not a {}",
                    node.node_type(),
                    node.id,
                    expected
                )));
            }
        }
        self.authorize(ctx, &node, Action::Read).await?;
        debug!(node_id = %node.id, "Resolved {:?}", node_ref);
        Ok(node)
    }

    /// Live children of a collection, ordered by name.
    pub async fn children(&self, ctx: &RequestContext, parent: NodeId) -> Result<Vec<Node>, FilesystemError> {
        let parent = self.load(parent).await?;
        if !parent.is_collection() {
            return Err(FilesystemError::InvalidArgument(format!(
                "node {} is not a collection",
                parent.id
            )));
        }
        self.authorize(ctx, &parent, Action::Read).await?;
        Ok(self.repository.find_children(parent.id, false).await?)
    }

    /// Render the requested attributes of a node, all of them when `names`
    /// is empty.
    pub async fn describe(
        &self,
        ctx: &RequestContext,
        node: impl Into<NodeRef>,
        names: &[&str],
    ) -> Result<Map<String, Value>, FilesystemError> {
        let node = self.get_node(ctx, node, None).await?;
        Ok(self.attributes.decorate(&node, names))
    }

    // ------------------------------------------------------------------------
    // Creation and content
    // ------------------------------------------------------------------------

    pub async fn create_collection(
        &self,
        ctx: &RequestContext,
        parent: NodeId,
        name: &str,
        attributes: NodeAttributes,
    ) -> Result<Node, FilesystemError> {
        let name = normalize_name(name)?;
        let parent = self.writable_parent(ctx, parent).await?;
        self.ensure_name_free(&parent, &name, None).await?;
        if let Some(storage) = &attributes.storage {
            self.ensure_adapter(storage)?;
        }

        self.hooks
            .fire(HookEvent::PreCreateCollection {
                ctx,
                parent: &parent,
                name: &name,
            })
            .await?;

        let mut node = Node::new_collection(parent.id, ctx.principal.clone(), name);
        node.apply_attributes(attributes);
        self.repository
            .insert(&node)
            .await
            .map_err(|e| sibling_conflict(e, &node.name))?;

        info!(node_id = %node.id, parent = %parent.id, owner = %node.owner, "Created collection '{}'", node.name);
        self.hooks
            .fire(HookEvent::PostCreateCollection { ctx, node: &node })
            .await?;
        Ok(node)
    }

    /// Store `content` as version 1 of a new file. The record is inserted
    /// only after the adapter confirmed the write.
    pub async fn create_file(
        &self,
        ctx: &RequestContext,
        parent: NodeId,
        name: &str,
        content: ContentStream,
        attributes: NodeAttributes,
    ) -> Result<Node, FilesystemError> {
        let name = normalize_name(name)?;
        let parent = self.writable_parent(ctx, parent).await?;
        self.ensure_name_free(&parent, &name, None).await?;

        let size = content.size;
        self.quota.check_payload(&ctx.principal, size, 0).await?;

        self.hooks
            .fire(HookEvent::PreCreateFile {
                ctx,
                parent: &parent,
                name: &name,
                size,
            })
            .await?;

        let adapter = self.adapter_for(&parent).await?;
        let version = self.store_content(&adapter, content, 1, &ctx.principal).await?;

        let mut node = Node::new_file(parent.id, ctx.principal.clone(), name, version);
        node.apply_attributes(attributes);
        if let Err(err) = self.repository.insert(&node).await {
            self.release_versions(&node).await;
            return Err(sibling_conflict(err, &node.name));
        }

        info!(
            node_id = %node.id,
            parent = %parent.id,
            owner = %node.owner,
            adapter = %adapter.name(),
            size,
            "Created file '{}'",
            node.name
        );
        self.hooks.fire(HookEvent::PostCreateFile { ctx, node: &node }).await?;
        Ok(node)
    }

    /// Append a new version.
    ///
    /// Without `force`, content identical to the current version is not
    /// stored again and the node is returned unchanged.
    pub async fn put_file(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        content: ContentStream,
        force: bool,
    ) -> Result<Node, FilesystemError> {
        let mut node = self.load_live(id).await?;
        let current = node
            .file()
            .and_then(FileContent::current)
            .cloned()
            .ok_or_else(|| not_a_file(id))?;

        self.authorize(ctx, &node, Action::Write).await?;
        if node.readonly {
            return Err(FilesystemError::Forbidden(format!("file {} is read-only", id)));
        }
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;

        let size = content.size;
        self.quota.check_payload(&node.owner, size, current.size).await?;

        self.hooks
            .fire(HookEvent::PrePutFile {
                ctx,
                node: &node,
                size,
            })
            .await?;

        let adapter = self.adapter_for_file(&node).await?;
        let number = node.file().map(FileContent::next_version).unwrap_or(1);
        let version = self.store_content(&adapter, content, number, &ctx.principal).await?;

        if !force && version.checksum == current.checksum {
            self.release(&version.pointer).await;
            debug!(node_id = %node.id, "Content unchanged, no version added");
            return Ok(node);
        }

        let stored = version.pointer.clone();
        let pruned = node.push_version(version, self.settings.max_versions)?;
        if let Err(err) = self.repository.update(&node).await {
            self.release(&stored).await;
            return Err(err.into());
        }
        for old in &pruned {
            self.release(&old.pointer).await;
        }

        info!(
            node_id = %node.id,
            version = number,
            size,
            pruned = pruned.len(),
            "Added file version"
        );
        self.hooks.fire(HookEvent::PostPutFile { ctx, node: &node }).await?;
        Ok(node)
    }

    /// Make an older (or newer) version current. History is left intact.
    pub async fn restore_version(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        version: u32,
    ) -> Result<Node, FilesystemError> {
        let mut node = self.load_live(id).await?;
        let content = node.file().ok_or_else(|| not_a_file(id))?;
        let target = content.get(version).cloned().ok_or_else(|| {
            FilesystemError::NotFound(format!("version {} of node {}", version, id))
        })?;
        let current_size = content.size();

        self.authorize(ctx, &node, Action::Write).await?;
        if node.readonly {
            return Err(FilesystemError::Forbidden(format!("file {} is read-only", id)));
        }
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;
        self.quota.check_payload(&node.owner, target.size, current_size).await?;

        self.hooks
            .fire(HookEvent::PreRestoreVersion {
                ctx,
                node: &node,
                version,
            })
            .await?;

        node.restore_version(version)?;
        self.repository.update(&node).await?;

        info!(node_id = %node.id, version, "Restored file version");
        self.hooks
            .fire(HookEvent::PostRestoreVersion { ctx, node: &node })
            .await?;
        Ok(node)
    }

    pub async fn list_versions(&self, ctx: &RequestContext, id: NodeId) -> Result<Vec<Version>, FilesystemError> {
        let node = self.load(id).await?;
        self.authorize(ctx, &node, Action::Read).await?;
        let content = node.file().ok_or_else(|| not_a_file(id))?;
        Ok(content.versions.clone())
    }

    pub async fn get_version(&self, ctx: &RequestContext, id: NodeId, version: u32) -> Result<Version, FilesystemError> {
        self.list_versions(ctx, id)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| FilesystemError::NotFound(format!("version {} of node {}", version, id)))
    }

    /// Stream the payload of `version`, the current one when `None`.
    pub async fn read_content(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        version: Option<u32>,
    ) -> Result<ContentStream, FilesystemError> {
        let node = self.load(id).await?;
        self.authorize(ctx, &node, Action::Read).await?;
        let content = node.file().ok_or_else(|| not_a_file(id))?;
        let number = version.unwrap_or(content.current_version);
        let entry = content
            .get(number)
            .ok_or_else(|| FilesystemError::NotFound(format!("version {} of node {}", number, id)))?;

        let adapter = self.adapter_named(&entry.pointer.adapter)?;
        match adapter.read(&entry.pointer).await {
            Ok(stream) => Ok(stream),
            Err(StorageError::NotFound(_)) => {
                warn!(node_id = %id, version = number, pointer = %entry.pointer, "Payload missing from storage");
                Err(FilesystemError::ContentsNotFound {
                    node: id,
                    version: number,
                })
            }
            Err(e) => Err(FilesystemError::storage(adapter.name(), e)),
        }
    }

    // ------------------------------------------------------------------------
    // Trash and lifecycle
    // ------------------------------------------------------------------------

    /// Trash or destroy a node.
    ///
    /// A hard delete processes descendants before their parents. A failing
    /// descendant is logged and skipped, which keeps its ancestors in place;
    /// calling `delete` again resumes the cascade.
    pub async fn delete(&self, ctx: &RequestContext, id: NodeId, options: DeleteOptions) -> Result<(), FilesystemError> {
        let node = self.load(id).await?;
        if node.is_root() {
            return Err(FilesystemError::Forbidden("root collection cannot be deleted".into()));
        }
        self.authorize(ctx, &node, Action::Delete).await?;
        if node.readonly {
            return Err(FilesystemError::Forbidden(format!("node {} is read-only", id)));
        }

        let recursion = options
            .recursion_token
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if options.force {
            let subtree = self.subtree(&node, true).await?;
            check_locks(ctx, &subtree)?;
            self.hooks
                .fire(HookEvent::PreDelete {
                    ctx,
                    node: &node,
                    force: true,
                    recursion: &recursion,
                })
                .await?;
            return self
                .hard_delete(ctx, subtree, &recursion, options.cancel.as_ref())
                .await;
        }

        if node.is_deleted() {
            return Err(FilesystemError::conflict(
                ConflictReason::NodeDeleted,
                format!("node {} is already in the trash", id),
            ));
        }

        let subtree = if options.recursive {
            self.subtree(&node, false).await?
        } else {
            if node.is_collection() && !self.repository.find_children(id, false).await?.is_empty() {
                return Err(FilesystemError::conflict(
                    ConflictReason::CollectionNotEmpty,
                    format!("collection {} has live children", id),
                ));
            }
            vec![node.clone()]
        };
        check_locks(ctx, &subtree)?;

        self.hooks
            .fire(HookEvent::PreDelete {
                ctx,
                node: &node,
                force: false,
                recursion: &recursion,
            })
            .await?;
        self.soft_delete(ctx, subtree, &recursion, options.cancel.as_ref())
            .await
    }

    async fn soft_delete(
        &self,
        ctx: &RequestContext,
        subtree: Vec<Node>,
        recursion: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), FilesystemError> {
        let now = Utc::now();
        let destroy = self.settings.trash_retention.map(|retention| now + retention);

        let Some(top) = subtree.first().map(|n| n.id) else {
            return Ok(());
        };
        let mut blocked: HashSet<NodeId> = HashSet::new();
        let mut failed = 0usize;

        // Children first, so an interrupted cascade leaves a live parent
        for mut node in subtree.into_iter().rev() {
            checkpoint(cancel, "delete", top)?;

            let result = if blocked.contains(&node.id) {
                Err(FilesystemError::conflict(
                    ConflictReason::CollectionNotEmpty,
                    format!("{} descendants of {} could not be trashed", failed, node.id),
                ))
            } else {
                node.mark_deleted(now, destroy);
                self.repository.update(&node).await.map_err(FilesystemError::from)
            };

            match result {
                Ok(()) => {
                    info!(node_id = %node.id, recursion = %recursion, "Moved node to trash");
                    self.hooks
                        .fire(HookEvent::PostDelete {
                            ctx,
                            node: &node,
                            force: false,
                            recursion,
                        })
                        .await?;
                }
                Err(err) if node.id == top => return Err(err),
                Err(err) => {
                    warn!(
                        node_id = %node.id,
                        recursion = %recursion,
                        "Trash step failed, continuing with siblings: {}",
                        err
                    );
                    failed += 1;
                    if let Some(parent) = node.parent {
                        blocked.insert(parent);
                    }
                }
            }
        }
        Ok(())
    }

    async fn hard_delete(
        &self,
        ctx: &RequestContext,
        subtree: Vec<Node>,
        recursion: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), FilesystemError> {
        let Some(top) = subtree.first().map(|n| n.id) else {
            return Ok(());
        };
        let mut blocked: HashSet<NodeId> = HashSet::new();
        let mut failed = 0usize;

        for node in subtree.into_iter().rev() {
            checkpoint(cancel, "delete", top)?;

            let result = if blocked.contains(&node.id) {
                Err(FilesystemError::conflict(
                    ConflictReason::CollectionNotEmpty,
                    format!("{} descendants of {} could not be removed", failed, node.id),
                ))
            } else {
                self.destroy_node(&node).await
            };

            match result {
                Ok(()) => {
                    info!(node_id = %node.id, recursion = %recursion, "Destroyed node");
                    self.hooks
                        .fire(HookEvent::PostDelete {
                            ctx,
                            node: &node,
                            force: true,
                            recursion,
                        })
                        .await?;
                }
                Err(err) if node.id == top => return Err(err),
                Err(err) => {
                    warn!(
                        node_id = %node.id,
                        recursion = %recursion,
                        "Cascade step failed, continuing with siblings: {}",
                        err
                    );
                    failed += 1;
                    if let Some(parent) = node.parent {
                        blocked.insert(parent);
                    }
                }
            }
        }
        Ok(())
    }

    /// Release every payload of `node`, then remove its record. The record is
    /// kept when a payload cannot be released so a retry can finish the job.
    async fn destroy_node(&self, node: &Node) -> Result<(), FilesystemError> {
        if let Some(content) = node.file() {
            for version in &content.versions {
                let adapter = self.adapter_named(&version.pointer.adapter)?;
                adapter
                    .delete(&version.pointer)
                    .await
                    .map_err(|e| FilesystemError::storage(adapter.name(), e))?;
            }
        }
        self.repository.remove(node.id).await?;
        Ok(())
    }

    /// Bring a trashed node back, together with the descendants trashed by
    /// the same delete.
    pub async fn restore(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        options: RestoreOptions,
    ) -> Result<Node, FilesystemError> {
        let mut node = self.load(id).await?;
        let deleted_at = node.deleted.ok_or_else(|| {
            FilesystemError::conflict(
                ConflictReason::NodeNotDeleted,
                format!("node {} is not in the trash", id),
            )
        })?;
        self.authorize(ctx, &node, Action::Delete).await?;
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;

        let parent_id = node
            .parent
            .ok_or_else(|| FilesystemError::InvalidArgument("root collection cannot be restored".into()))?;
        let parent = self.load(parent_id).await?;
        if parent.is_deleted() {
            return Err(FilesystemError::conflict(
                ConflictReason::ParentNotLive,
                format!("parent {} of node {} is in the trash", parent.id, id),
            ));
        }

        if self.repository.find_child(parent.id, &node.name).await?.is_some() {
            if !options.rename_on_conflict {
                return Err(FilesystemError::conflict(
                    ConflictReason::NodeWithSameNameAlreadyExists,
                    format!("'{}' already exists in collection {}", node.name, parent.id),
                ));
            }
            node.name = self.restored_name(&parent, &node.name).await?;
        }

        let cascade = self.trashed_with(&node, deleted_at).await?;
        let bytes: u64 = node.size() + cascade.iter().map(Node::size).sum::<u64>();
        self.quota.check_usage(&node.owner, bytes, 0).await?;

        self.hooks.fire(HookEvent::PreRestore { ctx, node: &node }).await?;

        let clear_destroy = self.settings.trash_retention.is_some();
        node.mark_restored(clear_destroy);
        self.repository
            .update(&node)
            .await
            .map_err(|e| sibling_conflict(e, &node.name))?;

        for mut child in cascade {
            checkpoint(options.cancel.as_ref(), "restore", id)?;
            child.mark_restored(clear_destroy);
            if let Err(err) = self.repository.update(&child).await {
                warn!(node_id = %child.id, "Could not restore descendant: {}", err);
            }
        }

        info!(node_id = %node.id, "Restored node from trash as '{}'", node.name);
        self.hooks.fire(HookEvent::PostRestore { ctx, node: &node }).await?;
        Ok(node)
    }

    /// Descendants of `top` trashed at `deleted_at` whose parent is restored
    /// too, parents before children.
    async fn trashed_with(&self, top: &Node, deleted_at: DateTime<Utc>) -> Result<Vec<Node>, FilesystemError> {
        let mut restored: HashSet<NodeId> = HashSet::from([top.id]);
        let mut cascade = Vec::new();
        for node in self.subtree(top, true).await?.into_iter().skip(1) {
            let parent_restored = node.parent.map(|p| restored.contains(&p)).unwrap_or(false);
            if parent_restored && node.deleted == Some(deleted_at) {
                restored.insert(node.id);
                cascade.push(node);
            }
        }
        Ok(cascade)
    }

    async fn restored_name(&self, parent: &Node, name: &str) -> Result<String, FilesystemError> {
        for n in 1..=MAX_RESTORE_SUFFIX {
            let candidate = if n == 1 {
                format!("{} (restored)", name)
            } else {
                format!("{} (restored {})", name, n)
            };
            let candidate = normalize_name(&candidate)?;
            if self.repository.find_child(parent.id, &candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(FilesystemError::conflict(
            ConflictReason::NodeWithSameNameAlreadyExists,
            format!("no free name for '{}' in collection {}", name, parent.id),
        ))
    }

    /// The caller's trashed nodes.
    pub async fn trash(&self, ctx: &RequestContext) -> Result<Vec<Node>, FilesystemError> {
        let filter = NodeFilter::new().owner(ctx.principal.clone()).deleted(true);
        self.find_nodes_with_custom_filter(filter).try_collect().await
    }

    // ------------------------------------------------------------------------
    // Tree changes
    // ------------------------------------------------------------------------

    pub async fn move_node(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        destination: NodeId,
    ) -> Result<Node, FilesystemError> {
        let mut node = self.load_live(id).await?;
        if node.is_root() {
            return Err(FilesystemError::Forbidden("root collection cannot be moved".into()));
        }
        self.authorize(ctx, &node, Action::Delete).await?;
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;
        self.ensure_not_within(&node, destination).await?;
        if node.parent == Some(destination) {
            return Ok(node);
        }

        let destination = self.writable_parent(ctx, destination).await?;
        self.ensure_name_free(&destination, &node.name, Some(node.id)).await?;

        self.hooks
            .fire(HookEvent::PreMove {
                ctx,
                node: &node,
                destination: &destination,
            })
            .await?;

        let from = node.parent;
        node.parent = Some(destination.id);
        node.touch();
        self.repository
            .update(&node)
            .await
            .map_err(|e| sibling_conflict(e, &node.name))?;

        info!(node_id = %node.id, from = ?from, to = %destination.id, "Moved node");
        self.hooks.fire(HookEvent::PostMove { ctx, node: &node }).await?;
        Ok(node)
    }

    /// Duplicate a live node, and for collections their live subtree, under
    /// `destination`. Files get their current version as version 1 of the
    /// copy, duplicated by the adapter.
    pub async fn copy_node(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        destination: NodeId,
        options: CopyOptions,
    ) -> Result<Node, FilesystemError> {
        let source = self.load_live(id).await?;
        self.authorize(ctx, &source, Action::Read).await?;
        self.ensure_not_within(&source, destination).await?;
        let destination = self.writable_parent(ctx, destination).await?;

        let name = match &options.name {
            Some(name) => normalize_name(name)?,
            None if source.is_root() => {
                return Err(FilesystemError::InvalidArgument(
                    "a copy of a root collection needs a name".into(),
                ))
            }
            None => source.name.clone(),
        };
        self.ensure_name_free(&destination, &name, None).await?;

        let subtree = self.subtree(&source, false).await?;
        let bytes = subtree.iter().map(Node::size).sum();
        self.quota.check_usage(&ctx.principal, bytes, 0).await?;

        self.hooks
            .fire(HookEvent::PreCopy {
                ctx,
                node: &source,
                destination: &destination,
            })
            .await?;

        let mut inserted: Vec<Node> = Vec::new();
        if let Err(err) = self
            .copy_tree(ctx, &subtree, &destination, name, options.cancel.as_ref(), &mut inserted)
            .await
        {
            self.discard_copies(inserted).await;
            return Err(err);
        }

        let count = inserted.len();
        let copy = inserted
            .into_iter()
            .next()
            .ok_or_else(|| FilesystemError::NotFound(format!("node {}", id)))?;
        info!(source = %source.id, copy = %copy.id, nodes = count, "Copied node tree");
        self.hooks
            .fire(HookEvent::PostCopy {
                ctx,
                source: &source,
                copy: &copy,
            })
            .await?;
        Ok(copy)
    }

    /// Insert copies of `subtree` (source first) under `destination`,
    /// recording every committed copy in `inserted`.
    async fn copy_tree(
        &self,
        ctx: &RequestContext,
        subtree: &[Node],
        destination: &Node,
        name: String,
        cancel: Option<&CancellationToken>,
        inserted: &mut Vec<Node>,
    ) -> Result<(), FilesystemError> {
        let Some(source) = subtree.first() else {
            return Ok(());
        };
        let mut copies: HashMap<NodeId, (NodeId, Arc<dyn StorageAdapter>)> = HashMap::new();
        let base_adapter = self.adapter_for(destination).await?;

        for original in subtree {
            let (parent, adapter, copy_name) = if original.id == source.id {
                (destination.id, base_adapter.clone(), name.clone())
            } else {
                checkpoint(cancel, "copy", source.id)?;
                match original.parent.and_then(|p| copies.get(&p)) {
                    Some((parent, adapter)) => (*parent, adapter.clone(), original.name.clone()),
                    None => continue,
                }
            };

            let mut copy = match original.file().and_then(FileContent::current) {
                Some(current) => {
                    let version = self
                        .duplicate_version(original.id, current, &adapter, &ctx.principal)
                        .await?;
                    Node::new_file(parent, ctx.principal.clone(), copy_name, version)
                }
                None => Node::new_collection(parent, ctx.principal.clone(), copy_name),
            };
            copy.meta = original.meta.clone();
            copy.acl = original.acl.clone();
            copy.readonly = original.readonly;

            let mut child_adapter = adapter;
            if let (NodeKind::Collection(props), Some(pinned)) = (&mut copy.kind, original.pinned_storage()) {
                props.storage = Some(pinned.to_string());
                match self.adapter_named(pinned) {
                    Ok(pinned) => child_adapter = pinned,
                    Err(err) => {
                        self.release_versions(&copy).await;
                        return Err(err);
                    }
                }
            }

            if let Err(err) = self.repository.insert(&copy).await {
                self.release_versions(&copy).await;
                return Err(sibling_conflict(err, &copy.name));
            }
            debug!(source = %original.id, copy = %copy.id, "Copied node");
            copies.insert(original.id, (copy.id, child_adapter));
            inserted.push(copy);
        }
        Ok(())
    }

    /// Undo a partial copy, children before parents.
    async fn discard_copies(&self, inserted: Vec<Node>) {
        for copy in inserted.into_iter().rev() {
            self.release_versions(&copy).await;
            if let Err(err) = self.repository.remove(copy.id).await {
                warn!(node_id = %copy.id, "Failed to discard partial copy: {}", err);
            }
        }
    }

    async fn duplicate_version(
        &self,
        node: NodeId,
        current: &Version,
        target: &Arc<dyn StorageAdapter>,
        principal: &PrincipalId,
    ) -> Result<Version, FilesystemError> {
        let key = blob_key();
        let source = self.adapter_named(&current.pointer.adapter)?;

        let result = if source.name() == target.name() {
            target.copy(&current.pointer, &key).await
        } else {
            match source.read(&current.pointer).await {
                Ok(stream) => target.write(&key, stream).await,
                Err(e) => Err(e),
            }
        };

        let pointer = result.map_err(|e| match e {
            StorageError::NotFound(_) => FilesystemError::ContentsNotFound {
                node,
                version: current.version,
            },
            other => FilesystemError::write_failed(target.name(), &key, other),
        })?;

        Ok(Version {
            version: 1,
            pointer,
            size: current.size,
            checksum: current.checksum.clone(),
            created_at: Utc::now(),
            created_by: principal.clone(),
        })
    }

    pub async fn rename(&self, ctx: &RequestContext, id: NodeId, name: &str) -> Result<Node, FilesystemError> {
        let mut node = self.load_live(id).await?;
        if node.is_root() {
            return Err(FilesystemError::Forbidden("root collection cannot be renamed".into()));
        }
        let name = normalize_name(name)?;
        self.authorize(ctx, &node, Action::Write).await?;
        if node.readonly {
            return Err(FilesystemError::Forbidden(format!("node {} is read-only", id)));
        }
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;
        if name == node.name {
            return Ok(node);
        }
        if let Some(parent) = node.parent {
            let parent = self.load(parent).await?;
            self.ensure_name_free(&parent, &name, Some(node.id)).await?;
        }

        self.hooks
            .fire(HookEvent::PreRename {
                ctx,
                node: &node,
                name: &name,
            })
            .await?;

        let previous = std::mem::replace(&mut node.name, name);
        node.touch();
        self.repository
            .update(&node)
            .await
            .map_err(|e| sibling_conflict(e, &node.name))?;

        info!(node_id = %node.id, "Renamed '{}' to '{}'", previous, node.name);
        self.hooks.fire(HookEvent::PostRename { ctx, node: &node }).await?;
        Ok(node)
    }

    // ------------------------------------------------------------------------
    // Locks and attributes
    // ------------------------------------------------------------------------

    /// Take a lock, or extend it when the caller presents the current token.
    pub async fn lock(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        ttl: Option<Duration>,
    ) -> Result<Lock, FilesystemError> {
        let mut node = self.load_live(id).await?;
        self.authorize(ctx, &node, Action::Write).await?;
        let now = Utc::now();
        node.check_lock(ctx.lock_token.as_deref(), now)?;

        let ttl = ttl
            .unwrap_or(self.settings.default_lock_ttl)
            .min(self.settings.max_lock_ttl)
            .max(Duration::from_secs(1));
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| FilesystemError::InvalidArgument(format!("invalid lock timeout: {}", e)))?;

        let lock = match node.active_lock(now) {
            Some(current) => Lock {
                expires_at: now + ttl,
                ..current.clone()
            },
            None => Lock {
                id: format!("opaquelocktoken:{}", Uuid::new_v4()),
                owner: ctx.principal.clone(),
                created_at: now,
                expires_at: now + ttl,
            },
        };
        node.lock = Some(lock.clone());
        self.repository.update(&node).await?;

        info!(node_id = %node.id, expires_at = %lock.expires_at, "Locked node");
        Ok(lock)
    }

    pub async fn unlock(&self, ctx: &RequestContext, id: NodeId) -> Result<(), FilesystemError> {
        let mut node = self.load(id).await?;
        self.authorize(ctx, &node, Action::Write).await?;
        if node.lock.is_none() {
            return Ok(());
        }
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;
        node.lock = None;
        self.repository.update(&node).await?;
        info!(node_id = %node.id, "Unlocked node");
        Ok(())
    }

    /// Changing the ACL or the read-only flag needs `Manage`; everything
    /// else needs `Write`. A read-only node only accepts a change of that
    /// flag.
    pub async fn save_attributes(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        update: AttributeUpdate,
    ) -> Result<Node, FilesystemError> {
        let mut node = self.load_live(id).await?;
        let action = if update.acl.is_some() || update.readonly.is_some() {
            Action::Manage
        } else {
            Action::Write
        };
        self.authorize(ctx, &node, action).await?;

        let touches_more_than_readonly = update.destroy.is_some()
            || !update.meta.is_empty()
            || update.acl.is_some()
            || update.storage.is_some();
        if node.readonly && touches_more_than_readonly {
            return Err(FilesystemError::Forbidden(format!("node {} is read-only", id)));
        }
        node.check_lock(ctx.lock_token.as_deref(), Utc::now())?;

        if let Some(storage) = &update.storage {
            if !node.is_collection() {
                return Err(FilesystemError::InvalidArgument(
                    "storage can only be pinned on collections".into(),
                ));
            }
            if let Some(name) = storage {
                self.ensure_adapter(name)?;
            }
        }
        if update.is_empty() {
            return Ok(node);
        }

        self.hooks
            .fire(HookEvent::PreSaveAttributes {
                ctx,
                node: &node,
                update: &update,
            })
            .await?;

        node.apply_update(&update);
        self.repository.update(&node).await?;

        info!(node_id = %node.id, "Saved attributes");
        self.hooks
            .fire(HookEvent::PostSaveAttributes { ctx, node: &node })
            .await?;
        Ok(node)
    }

    /// Schedule (or cancel with `None`) the destruction of a node by the
    /// trash sweeper.
    pub async fn set_destroy_at(
        &self,
        ctx: &RequestContext,
        id: NodeId,
        at: Option<DateTime<Utc>>,
    ) -> Result<Node, FilesystemError> {
        let update = AttributeUpdate {
            destroy: Some(at),
            ..AttributeUpdate::default()
        };
        self.save_attributes(ctx, id, update).await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Lazily page through every node matching `filter`.
    ///
    /// Pages are fetched on demand in id order, so polling the stream again
    /// later sees the current state rather than a snapshot. No ACL is applied;
    /// this is meant for system workers.
    pub fn find_nodes_with_custom_filter(
        &self,
        filter: NodeFilter,
    ) -> BoxStream<'static, Result<Node, FilesystemError>> {
        let repository = self.repository.clone();
        let page_size = self.settings.page_size.max(1);

        stream::try_unfold(
            (filter, None::<NodeId>, false),
            move |(filter, after, exhausted)| {
                let repository = repository.clone();
                async move {
                    if exhausted {
                        return Ok::<_, FilesystemError>(None);
                    }
                    let page = repository.find_page(&filter, after, page_size).await?;
                    let exhausted = page.next.is_none();
                    Ok(Some((page.nodes, (filter, page.next, exhausted))))
                }
            },
        )
        .map_ok(|nodes| stream::iter(nodes.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    /// Nodes whose `destroy` time is at or before `now`.
    pub fn find_destroyable(&self, now: DateTime<Utc>) -> BoxStream<'static, Result<Node, FilesystemError>> {
        self.find_nodes_with_custom_filter(NodeFilter::new().destroy_before(now))
    }

    pub async fn usage(&self, ctx: &RequestContext) -> Result<QuotaUsage, FilesystemError> {
        self.quota.usage(&ctx.principal).await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn authorize(&self, ctx: &RequestContext, node: &Node, action: Action) -> Result<(), FilesystemError> {
        if self.acl.is_allowed(ctx, node, action).await? {
            Ok(())
        } else {
            debug!(node_id = %node.id, principal = %ctx.principal, "{} denied", action);
            Err(FilesystemError::Forbidden(format!(
                "{} on node {} denied for {}",
                action, node.id, ctx.principal
            )))
        }
    }

    async fn resolve(&self, ctx: &RequestContext, node: &NodeRef) -> Result<Node, FilesystemError> {
        match node {
            NodeRef::Id(id) => self.load(*id).await,
            NodeRef::Path(path) => {
                let segments = self.paths.segments(path)?;
                let mut current = self.root(ctx).await?;
                for segment in &segments {
                    if !current.is_collection() {
                        return Err(FilesystemError::NotFound(format!("path '{}'", path)));
                    }
                    current = self
                        .repository
                        .find_child(current.id, segment)
                        .await?
                        .ok_or_else(|| FilesystemError::NotFound(format!("path '{}'", path)))?;
                }
                Ok(current)
            }
        }
    }

    async fn load(&self, id: NodeId) -> Result<Node, FilesystemError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| FilesystemError::NotFound(format!("node {}", id)))
    }

    async fn load_live(&self, id: NodeId) -> Result<Node, FilesystemError> {
        let node = self.load(id).await?;
        if node.is_deleted() {
            return Err(FilesystemError::conflict(
                ConflictReason::NodeDeleted,
                format!("node {} is in the trash", id),
            ));
        }
        Ok(node)
    }

    /// A live collection the caller may create children in.
    async fn writable_parent(&self, ctx: &RequestContext, id: NodeId) -> Result<Node, FilesystemError> {
        let parent = self.load(id).await?;
        if !parent.is_collection() {
            return Err(FilesystemError::InvalidArgument(format!(
                "node {} is not a collection",
                id
            )));
        }
        if parent.is_deleted() {
            return Err(FilesystemError::conflict(
                ConflictReason::ParentNotLive,
                format!("collection {} is in the trash", id),
            ));
        }
        self.authorize(ctx, &parent, Action::Create).await?;
        if parent.readonly {
            return Err(FilesystemError::Forbidden(format!("collection {} is read-only", id)));
        }
        parent.check_lock(ctx.lock_token.as_deref(), Utc::now())?;
        Ok(parent)
    }

    async fn ensure_name_free(&self, parent: &Node, name: &str, except: Option<NodeId>) -> Result<(), FilesystemError> {
        if let Some(existing) = self.repository.find_child(parent.id, name).await? {
            if Some(existing.id) != except {
                return Err(FilesystemError::conflict(
                    ConflictReason::NodeWithSameNameAlreadyExists,
                    format!("'{}' already exists in collection {}", name, parent.id),
                ));
            }
        }
        Ok(())
    }

    /// Fail when `destination` is `node` itself or lies beneath it.
    async fn ensure_not_within(&self, node: &Node, destination: NodeId) -> Result<(), FilesystemError> {
        let mut cursor = Some(destination);
        let mut seen = HashSet::new();
        while let Some(id) = cursor {
            if id == node.id {
                return Err(FilesystemError::conflict(
                    ConflictReason::CantBeChildOfItself,
                    format!("node {} cannot be placed inside itself", node.id),
                ));
            }
            if !seen.insert(id) {
                break;
            }
            cursor = self.repository.find_by_id(id).await?.and_then(|n| n.parent);
        }
        Ok(())
    }

    /// `top` followed by its descendants in breadth-first order.
    async fn subtree(&self, top: &Node, include_deleted: bool) -> Result<Vec<Node>, FilesystemError> {
        let mut nodes = vec![top.clone()];
        let mut seen: HashSet<NodeId> = HashSet::from([top.id]);
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        if top.is_collection() {
            queue.push_back(top.id);
        }
        while let Some(id) = queue.pop_front() {
            for child in self.repository.find_children(id, include_deleted).await? {
                if !seen.insert(child.id) {
                    continue;
                }
                if child.is_collection() {
                    queue.push_back(child.id);
                }
                nodes.push(child);
            }
        }
        Ok(nodes)
    }

    fn ensure_adapter(&self, name: &str) -> Result<(), FilesystemError> {
        if self.storage.contains(name) {
            Ok(())
        } else {
            Err(FilesystemError::InvalidArgument(format!(
                "unknown storage adapter '{}'",
                name
            )))
        }
    }

    fn adapter_named(&self, name: &str) -> Result<Arc<dyn StorageAdapter>, FilesystemError> {
        self.storage
            .get(name)
            .cloned()
            .map_err(|e| FilesystemError::storage(name, e))
    }

    /// Adapter for files created in `collection`: the nearest pinned one on
    /// the way to the root, else the default.
    async fn adapter_for(&self, collection: &Node) -> Result<Arc<dyn StorageAdapter>, FilesystemError> {
        let mut current = Some(collection.clone());
        let mut seen = HashSet::new();
        while let Some(node) = current {
            if !seen.insert(node.id) {
                break;
            }
            if let Some(name) = node.pinned_storage() {
                return self.adapter_named(name);
            }
            current = match node.parent {
                Some(parent) => self.repository.find_by_id(parent).await?,
                None => None,
            };
        }
        Ok(self.storage.default_adapter().clone())
    }

    async fn adapter_for_file(&self, file: &Node) -> Result<Arc<dyn StorageAdapter>, FilesystemError> {
        match file.parent {
            Some(parent) => {
                let parent = self.load(parent).await?;
                self.adapter_for(&parent).await
            }
            None => Ok(self.storage.default_adapter().clone()),
        }
    }

    /// Write `content` under a fresh key while hashing it on the way through.
    async fn store_content(
        &self,
        adapter: &Arc<dyn StorageAdapter>,
        content: ContentStream,
        version: u32,
        principal: &PrincipalId,
    ) -> Result<Version, FilesystemError> {
        let key = blob_key();
        let declared = content.size;

        let digest = Arc::new(Mutex::new((Sha256::new(), 0u64)));
        let tap = digest.clone();
        // Cut the upload off once it outgrows the declared size
        let body = content
            .body
            .map(move |chunk| {
                let chunk = chunk?;
                let mut state = tap.lock();
                state.1 += chunk.len() as u64;
                if state.1 > declared {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("payload exceeds declared size of {} bytes", declared),
                    ));
                }
                state.0.update(&chunk);
                Ok(chunk)
            })
            .boxed();

        let pointer = adapter
            .write(&key, ContentStream::new(declared, body))
            .await
            .map_err(|e| FilesystemError::write_failed(adapter.name(), &key, e))?;

        let (hasher, written) = {
            let state = digest.lock();
            (state.0.clone(), state.1)
        };
        if written != declared {
            self.release(&pointer).await;
            return Err(FilesystemError::StorageWriteFailed {
                adapter: adapter.name().to_string(),
                key,
                reason: format!("expected {} bytes, received {}", declared, written),
            });
        }

        debug!(adapter = %adapter.name(), key = %pointer.key, size = written, "Stored payload");
        Ok(Version {
            version,
            pointer,
            size: written,
            checksum: hex::encode(hasher.finalize()),
            created_at: Utc::now(),
            created_by: principal.clone(),
        })
    }

    /// Best-effort payload release; failures leave an orphan blob behind.
    async fn release(&self, pointer: &StoragePointer) {
        let result = match self.storage.get(&pointer.adapter) {
            Ok(adapter) => adapter.delete(pointer).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(pointer = %pointer, "Failed to release payload: {}", e);
        }
    }

    async fn release_versions(&self, node: &Node) {
        if let Some(content) = node.file() {
            for version in &content.versions {
                self.release(&version.pointer).await;
            }
        }
    }
}

fn blob_key() -> String {
    Uuid::new_v4().simple().to_string()
}

fn not_a_file(id: NodeId) -> FilesystemError {
    FilesystemError::InvalidArgument(format!("node {} is not a file", id))
}

fn sibling_conflict(err: RepositoryError, name: &str) -> FilesystemError {
    match err {
        RepositoryError::Conflict(_) => FilesystemError::conflict(
            ConflictReason::NodeWithSameNameAlreadyExists,
            format!("'{}' already exists", name),
        ),
        other => other.into(),
    }
}

fn check_locks(ctx: &RequestContext, nodes: &[Node]) -> Result<(), FilesystemError> {
    let now = Utc::now();
    nodes
        .iter()
        .try_for_each(|node| node.check_lock(ctx.lock_token.as_deref(), now))
}

fn checkpoint(cancel: Option<&CancellationToken>, operation: &str, node: NodeId) -> Result<(), FilesystemError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(FilesystemError::Cancelled(format!(
            "{} of {} interrupted",
            operation, node
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::acl::{AclRule, AclSubject, Privilege, RuleAclEvaluator};
    use crate::domain::hooks::NodeHook;
    use crate::domain::principal::Quota;
    use crate::infrastructure::principals::InMemoryPrincipalDirectory;
    use crate::infrastructure::repositories::InMemoryNodeRepository;
    use crate::infrastructure::storage::MemoryStorageAdapter;
    use crate::domain::repository::NodePage;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        service: FilesystemService,
        repo: Arc<InMemoryNodeRepository>,
        blobs: MemoryStorageAdapter,
        directory: Arc<InMemoryPrincipalDirectory>,
    }

    fn fixture_with(settings: FilesystemSettings, hooks: HookRegistry) -> Fixture {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let blobs = MemoryStorageAdapter::new("memory");
        let directory = Arc::new(InMemoryPrincipalDirectory::new(Quota::unlimited()));
        let service = FilesystemService::new(
            repo.clone(),
            StorageRegistry::new(Arc::new(blobs.clone())),
            Arc::new(RuleAclEvaluator::new(repo.clone())),
            directory.clone(),
            hooks,
            settings,
        );
        Fixture {
            service,
            repo,
            blobs,
            directory,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FilesystemSettings::default(), HookRegistry::new())
    }

    fn alice() -> RequestContext {
        RequestContext::new("alice")
    }

    async fn read_all(f: &Fixture, ctx: &RequestContext, id: NodeId, version: Option<u32>) -> Vec<u8> {
        f.service
            .read_content(ctx, id, version)
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap()
            .to_vec()
    }

    async fn docs(f: &Fixture, ctx: &RequestContext) -> Node {
        let root = f.service.root(ctx).await.unwrap();
        f.service
            .create_collection(ctx, root.id, "docs", NodeAttributes::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_is_created_once() {
        let f = fixture();
        let first = f.service.root(&alice()).await.unwrap();
        let second = f.service.root(&alice()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_root());
    }

    #[tokio::test]
    async fn test_sibling_names_collide_case_insensitively() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        f.service
            .create_file(&ctx, docs.id, "Report.txt", ContentStream::from_bytes("a"), NodeAttributes::default())
            .await
            .unwrap();

        let err = f
            .service
            .create_collection(&ctx, docs.id, "report.TXT", NodeAttributes::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "NODE_WITH_SAME_NAME_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_get_node_by_path_and_type() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("hello"), NodeAttributes::default())
            .await
            .unwrap();

        let found = f.service.get_node(&ctx, "/docs/a.txt", Some(NodeType::File)).await.unwrap();
        assert_eq!(found.id, file.id);

        let err = f
            .service
            .get_node(&ctx, file.id, Some(NodeType::Collection))
            .await
            .unwrap_err();
        assert!(matches!(err, FilesystemError::NotFound(_)));
        assert!(f.service.get_node(&ctx, "/docs/missing", None).await.is_err());
        assert!(matches!(
            f.service.get_node(&ctx, "/docs/../etc", None).await,
            Err(FilesystemError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_commits_nothing() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        f.blobs.fail_writes(true);

        let err = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("hello"), NodeAttributes::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "STORAGE_WRITE_FAILED");
        assert!(f.repo.find_child(docs.id, "a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_declared_size_must_match_payload() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let mut content = ContentStream::from_bytes("hello");
        content.size = 3;

        assert!(f
            .service
            .create_file(&ctx, docs.id, "a.txt", content, NodeAttributes::default())
            .await
            .is_err());
        assert!(f.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_content_adds_no_version_unless_forced() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("same"), NodeAttributes::default())
            .await
            .unwrap();

        let node = f
            .service
            .put_file(&ctx, file.id, ContentStream::from_bytes("same"), false)
            .await
            .unwrap();
        assert_eq!(node.file().unwrap().versions.len(), 1);
        assert_eq!(f.blobs.len(), 1);

        let node = f
            .service
            .put_file(&ctx, file.id, ContentStream::from_bytes("same"), true)
            .await
            .unwrap();
        assert_eq!(node.file().unwrap().current_version, 2);
    }

    #[tokio::test]
    async fn test_version_history_is_capped_and_pruned_payloads_released() {
        let settings = FilesystemSettings {
            max_versions: 2,
            ..FilesystemSettings::default()
        };
        let f = fixture_with(settings, HookRegistry::new());
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("v1"), NodeAttributes::default())
            .await
            .unwrap();
        for body in ["v2", "v3"] {
            f.service
                .put_file(&ctx, file.id, ContentStream::from_bytes(body), false)
                .await
                .unwrap();
        }

        let versions = f.service.list_versions(&ctx, file.id).await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(f.blobs.len(), 2);
        assert_eq!(read_all(&f, &ctx, file.id, Some(2)).await, b"v2");
    }

    #[tokio::test]
    async fn test_missing_payload_is_contents_not_found() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("x"), NodeAttributes::default())
            .await
            .unwrap();
        let key = file.file().unwrap().current().unwrap().pointer.key.clone();
        f.blobs.evict(&key);

        assert!(matches!(
            f.service.read_content(&ctx, file.id, None).await,
            Err(FilesystemError::ContentsNotFound { version: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_requires_recursion_for_non_empty_collection() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("x"), NodeAttributes::default())
            .await
            .unwrap();

        let err = f
            .service
            .delete(&ctx, docs.id, DeleteOptions::soft())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "COLLECTION_NOT_EMPTY");

        f.service.delete(&ctx, docs.id, DeleteOptions::cascade()).await.unwrap();
        let trashed_docs = f.repo.find_by_id(docs.id).await.unwrap().unwrap();
        let trashed_file = f.repo.find_by_id(file.id).await.unwrap().unwrap();
        assert!(trashed_docs.is_deleted());
        assert_eq!(trashed_docs.deleted, trashed_file.deleted);
        assert_eq!(f.service.trash(&ctx).await.unwrap().len(), 2);
        assert_eq!(f.service.usage(&ctx).await.unwrap().used_bytes, 0);

        let restored = f
            .service
            .restore(&ctx, docs.id, RestoreOptions::default())
            .await
            .unwrap();
        assert!(!restored.is_deleted());
        assert!(!f.repo.find_by_id(file.id).await.unwrap().unwrap().is_deleted());
        assert_eq!(f.blobs.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_renames_on_conflict_when_asked() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let first = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();
        f.service.delete(&ctx, first.id, DeleteOptions::soft()).await.unwrap();
        f.service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("2"), NodeAttributes::default())
            .await
            .unwrap();

        let err = f
            .service
            .restore(&ctx, first.id, RestoreOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "NODE_WITH_SAME_NAME_ALREADY_EXISTS");

        let restored = f
            .service
            .restore(
                &ctx,
                first.id,
                RestoreOptions {
                    rename_on_conflict: true,
                    ..RestoreOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(restored.name, "a.txt (restored)");
    }

    #[tokio::test]
    async fn test_restore_under_trashed_parent_is_rejected() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();
        f.service.delete(&ctx, docs.id, DeleteOptions::cascade()).await.unwrap();

        let err = f
            .service
            .restore(&ctx, file.id, RestoreOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "PARENT_NOT_LIVE");
    }

    #[tokio::test]
    async fn test_hard_delete_releases_payloads_children_first() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let sub = f
            .service
            .create_collection(&ctx, docs.id, "sub", NodeAttributes::default())
            .await
            .unwrap();
        let file = f
            .service
            .create_file(&ctx, sub.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();
        f.service
            .put_file(&ctx, file.id, ContentStream::from_bytes("2"), false)
            .await
            .unwrap();

        f.service.delete(&ctx, docs.id, DeleteOptions::hard()).await.unwrap();
        assert!(f.blobs.is_empty());
        assert!(f.repo.find_by_id(sub.id).await.unwrap().is_none());
        assert!(matches!(
            f.service.delete(&ctx, docs.id, DeleteOptions::hard()).await,
            Err(FilesystemError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hard_delete_skips_failed_child_and_resumes() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let sub = f
            .service
            .create_collection(&ctx, docs.id, "sub", NodeAttributes::default())
            .await
            .unwrap();
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();

        f.blobs.fail_deletes(true);
        let err = f
            .service
            .delete(&ctx, docs.id, DeleteOptions::hard())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "COLLECTION_NOT_EMPTY");
        assert!(f.repo.find_by_id(sub.id).await.unwrap().is_none());
        assert!(f.repo.find_by_id(file.id).await.unwrap().is_some());
        assert!(f.repo.find_by_id(docs.id).await.unwrap().is_some());
        assert_eq!(f.blobs.len(), 1);

        f.blobs.fail_deletes(false);
        f.service.delete(&ctx, docs.id, DeleteOptions::hard()).await.unwrap();
        assert!(f.repo.find_by_id(docs.id).await.unwrap().is_none());
        assert!(f.repo.find_by_id(file.id).await.unwrap().is_none());
        assert!(f.blobs.is_empty());
    }

    /// Delegates to the in-memory repository but refuses to update one node.
    struct StuckNodeRepository {
        inner: Arc<InMemoryNodeRepository>,
        stuck: Mutex<Option<NodeId>>,
    }

    #[async_trait]
    impl NodeRepository for StuckNodeRepository {
        async fn insert(&self, node: &Node) -> Result<(), RepositoryError> {
            self.inner.insert(node).await
        }

        async fn update(&self, node: &Node) -> Result<(), RepositoryError> {
            if *self.stuck.lock() == Some(node.id) {
                return Err(RepositoryError::Database(format!("row {} is locked", node.id)));
            }
            self.inner.update(node).await
        }

        async fn remove(&self, id: NodeId) -> Result<(), RepositoryError> {
            self.inner.remove(id).await
        }

        async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_root(&self, owner: &PrincipalId) -> Result<Option<Node>, RepositoryError> {
            self.inner.find_root(owner).await
        }

        async fn find_child(&self, parent: NodeId, name: &str) -> Result<Option<Node>, RepositoryError> {
            self.inner.find_child(parent, name).await
        }

        async fn find_children(&self, parent: NodeId, include_deleted: bool) -> Result<Vec<Node>, RepositoryError> {
            self.inner.find_children(parent, include_deleted).await
        }

        async fn find_page(
            &self,
            filter: &NodeFilter,
            after: Option<NodeId>,
            limit: usize,
        ) -> Result<NodePage, RepositoryError> {
            self.inner.find_page(filter, after, limit).await
        }

        async fn live_usage(&self, owner: &PrincipalId) -> Result<u64, RepositoryError> {
            self.inner.live_usage(owner).await
        }
    }

    #[tokio::test]
    async fn test_soft_cascade_continues_past_failed_child() {
        let repo = Arc::new(StuckNodeRepository {
            inner: Arc::new(InMemoryNodeRepository::new()),
            stuck: Mutex::new(None),
        });
        let service = FilesystemService::new(
            repo.clone(),
            StorageRegistry::new(Arc::new(MemoryStorageAdapter::new("memory"))),
            Arc::new(RuleAclEvaluator::new(repo.clone())),
            Arc::new(InMemoryPrincipalDirectory::new(Quota::unlimited())),
            HookRegistry::new(),
            FilesystemSettings::default(),
        );
        let ctx = alice();
        let root = service.root(&ctx).await.unwrap();
        let docs = service
            .create_collection(&ctx, root.id, "docs", NodeAttributes::default())
            .await
            .unwrap();
        let sub = service
            .create_collection(&ctx, docs.id, "sub", NodeAttributes::default())
            .await
            .unwrap();
        let file = service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();

        *repo.stuck.lock() = Some(file.id);
        let err = service
            .delete(&ctx, docs.id, DeleteOptions::cascade())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "COLLECTION_NOT_EMPTY");
        assert!(repo.find_by_id(sub.id).await.unwrap().unwrap().is_deleted());
        assert!(!repo.find_by_id(file.id).await.unwrap().unwrap().is_deleted());
        assert!(!repo.find_by_id(docs.id).await.unwrap().unwrap().is_deleted());

        *repo.stuck.lock() = None;
        service.delete(&ctx, docs.id, DeleteOptions::cascade()).await.unwrap();
        assert!(repo.find_by_id(docs.id).await.unwrap().unwrap().is_deleted());
        assert!(repo.find_by_id(file.id).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_cancelled_cascade_can_be_resumed() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        f.service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("1"), NodeAttributes::default())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f
            .service
            .delete(&ctx, docs.id, DeleteOptions::hard().with_cancel(cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind().status_code(), 503);
        assert!(f.repo.find_by_id(docs.id).await.unwrap().is_some());

        f.service.delete(&ctx, docs.id, DeleteOptions::hard()).await.unwrap();
        assert!(f.repo.find_by_id(docs.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_move_into_own_subtree_is_rejected() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let sub = f
            .service
            .create_collection(&ctx, docs.id, "sub", NodeAttributes::default())
            .await
            .unwrap();

        for destination in [docs.id, sub.id] {
            let err = f.service.move_node(&ctx, docs.id, destination).await.unwrap_err();
            assert_eq!(err.kind().code(), "CANT_BE_CHILD_OF_ITSELF");
        }
        let err = f
            .service
            .copy_node(&ctx, docs.id, sub.id, CopyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "CANT_BE_CHILD_OF_ITSELF");

        let root = f.service.root(&ctx).await.unwrap();
        let moved = f.service.move_node(&ctx, sub.id, root.id).await.unwrap();
        assert_eq!(moved.parent, Some(root.id));
    }

    #[tokio::test]
    async fn test_copy_duplicates_tree_and_content() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let file = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("payload"), NodeAttributes::default())
            .await
            .unwrap();
        let root = f.service.root(&ctx).await.unwrap();

        let copy = f
            .service
            .copy_node(
                &ctx,
                docs.id,
                root.id,
                CopyOptions {
                    name: Some("docs-copy".into()),
                    ..CopyOptions::default()
                },
            )
            .await
            .unwrap();
        let children = f.service.children(&ctx, copy.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_ne!(children[0].id, file.id);
        assert_eq!(read_all(&f, &ctx, children[0].id, None).await, b"payload");
        assert_eq!(f.blobs.len(), 2);
        assert_eq!(f.service.usage(&ctx).await.unwrap().used_bytes, 14);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial_tree() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let sub = f
            .service
            .create_collection(&ctx, docs.id, "sub", NodeAttributes::default())
            .await
            .unwrap();
        f.service
            .create_file(&ctx, sub.id, "a.txt", ContentStream::from_bytes("first"), NodeAttributes::default())
            .await
            .unwrap();
        let lost = f
            .service
            .create_file(&ctx, sub.id, "b.txt", ContentStream::from_bytes("second"), NodeAttributes::default())
            .await
            .unwrap();
        let pointer = lost.file().and_then(FileContent::current).unwrap().pointer.clone();
        f.blobs.evict(&pointer.key);
        let root = f.service.root(&ctx).await.unwrap();
        let blobs_before = f.blobs.len();
        let nodes_before = f.repo.len();

        let options = CopyOptions {
            name: Some("copy".into()),
            ..CopyOptions::default()
        };
        let err = f
            .service
            .copy_node(&ctx, docs.id, root.id, options.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "CONTENTS_NOT_FOUND");
        assert!(f.repo.find_child(root.id, "copy").await.unwrap().is_none());
        assert_eq!(f.repo.len(), nodes_before);
        assert_eq!(f.blobs.len(), blobs_before);

        f.service.delete(&ctx, lost.id, DeleteOptions::hard()).await.unwrap();
        let copy = f.service.copy_node(&ctx, docs.id, root.id, options).await.unwrap();
        assert_eq!(copy.name, "copy");
    }

    #[tokio::test]
    async fn test_readonly_and_acl_checks() {
        let f = fixture();
        let ctx = alice();
        let root = f.service.root(&ctx).await.unwrap();
        let archive = f
            .service
            .create_collection(
                &ctx,
                root.id,
                "archive",
                NodeAttributes {
                    readonly: true,
                    ..NodeAttributes::default()
                },
            )
            .await
            .unwrap();
        let err = f
            .service
            .create_collection(&ctx, archive.id, "x", NodeAttributes::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FilesystemError::Forbidden(_)));

        let bob = RequestContext::new("bob");
        assert!(matches!(
            f.service.get_node(&bob, archive.id, None).await,
            Err(FilesystemError::Forbidden(_))
        ));

        let shared = f
            .service
            .create_collection(
                &ctx,
                root.id,
                "shared",
                NodeAttributes {
                    acl: vec![AclRule::new(AclSubject::User("bob".into()), Privilege::Write)],
                    ..NodeAttributes::default()
                },
            )
            .await
            .unwrap();
        let created = f
            .service
            .create_collection(&bob, shared.id, "from-bob", NodeAttributes::default())
            .await
            .unwrap();
        assert_eq!(created.owner, PrincipalId::from("bob"));
        assert!(f.service.children(&bob, shared.id).await.is_err());
    }

    #[tokio::test]
    async fn test_quota_rejects_before_writing() {
        let f = fixture();
        let ctx = alice();
        f.directory.set_quota(&"alice".into(), Quota::limited(4));
        let docs = docs(&f, &ctx).await;

        let err = f
            .service
            .create_file(&ctx, docs.id, "a.txt", ContentStream::from_bytes("hello"), NodeAttributes::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "INSUFFICIENT_STORAGE");
        assert_eq!(f.blobs.write_count(), 0);
    }

    #[tokio::test]
    async fn test_understated_size_is_cut_off() {
        let f = fixture();
        let ctx = alice();
        f.directory.set_quota(&"alice".into(), Quota::limited(4));
        let docs = docs(&f, &ctx).await;

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let body = stream::iter(0..1000)
            .map(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(bytes::Bytes::from_static(b"xxxx"))
            })
            .boxed();

        let err = f
            .service
            .create_file(&ctx, docs.id, "big.bin", ContentStream::new(1, body), NodeAttributes::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "STORAGE_WRITE_FAILED");
        assert!(pulled.load(Ordering::SeqCst) < 1000);
        assert!(f.blobs.is_empty());
        assert!(f.repo.find_child(docs.id, "big.bin").await.unwrap().is_none());
        assert_eq!(f.service.usage(&ctx).await.unwrap().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_lock_refresh_and_unlock() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;

        let lock = f.service.lock(&ctx, docs.id, None).await.unwrap();
        assert!(matches!(
            f.service.lock(&ctx, docs.id, None).await,
            Err(FilesystemError::Locked(_))
        ));

        let holder = alice().with_lock_token(lock.id.clone());
        let refreshed = f
            .service
            .lock(&holder, docs.id, Some(Duration::from_secs(10 * 86400)))
            .await
            .unwrap();
        assert_eq!(refreshed.id, lock.id);
        assert!(refreshed.expires_at <= Utc::now() + chrono::Duration::seconds(86400));

        assert!(f.service.unlock(&ctx, docs.id).await.is_err());
        f.service.unlock(&holder, docs.id).await.unwrap();
        f.service
            .create_collection(&ctx, docs.id, "child", NodeAttributes::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_attributes_updates_meta_and_destroy() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let when = Utc::now() - chrono::Duration::minutes(1);

        let update = AttributeUpdate {
            destroy: Some(Some(when)),
            meta: BTreeMap::from([("color".to_string(), Some(Value::from("blue")))]),
            ..AttributeUpdate::default()
        };
        let node = f.service.save_attributes(&ctx, docs.id, update).await.unwrap();
        assert_eq!(node.meta.get("color"), Some(&Value::from("blue")));

        let due: Vec<Node> = f.service.find_destroyable(Utc::now()).try_collect().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, docs.id);

        let bad = AttributeUpdate {
            storage: Some(Some("nowhere".into())),
            ..AttributeUpdate::default()
        };
        assert!(matches!(
            f.service.save_attributes(&ctx, docs.id, bad).await,
            Err(FilesystemError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_schedules_destroy_on_soft_delete() {
        let settings = FilesystemSettings {
            trash_retention: Some(chrono::Duration::days(30)),
            ..FilesystemSettings::default()
        };
        let f = fixture_with(settings, HookRegistry::new());
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        f.service.delete(&ctx, docs.id, DeleteOptions::soft()).await.unwrap();

        let trashed = f.repo.find_by_id(docs.id).await.unwrap().unwrap();
        assert!(trashed.destroy.is_some());
        let later = Utc::now() + chrono::Duration::days(31);
        let due: Vec<Node> = f.service.find_destroyable(later).try_collect().await.unwrap();
        assert_eq!(due.len(), 1);

        let restored = f
            .service
            .restore(&ctx, docs.id, RestoreOptions::default())
            .await
            .unwrap();
        assert!(restored.destroy.is_none());
    }

    #[tokio::test]
    async fn test_custom_filter_spans_pages() {
        let settings = FilesystemSettings {
            page_size: 2,
            ..FilesystemSettings::default()
        };
        let f = fixture_with(settings, HookRegistry::new());
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        for i in 0..5 {
            f.service
                .create_file(
                    &ctx,
                    docs.id,
                    &format!("f{}.txt", i),
                    ContentStream::from_bytes("x"),
                    NodeAttributes::default(),
                )
                .await
                .unwrap();
        }

        let filter = NodeFilter::new().collections(false).matching(|n| n.name != "f2.txt");
        let found: Vec<Node> = f
            .service
            .find_nodes_with_custom_filter(filter.clone())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(found.len(), 4);

        f.service.delete(&ctx, found[0].id, DeleteOptions::hard()).await.unwrap();
        let again: Vec<Node> = f
            .service
            .find_nodes_with_custom_filter(filter)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(again.len(), 3);
    }

    struct Veto;

    #[async_trait]
    impl NodeHook for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        async fn on_event(&self, event: &HookEvent<'_>) -> Result<(), FilesystemError> {
            match event {
                HookEvent::PreCreateCollection { parent, .. } => Err(FilesystemError::Locked(parent.id)),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_pre_hook_veto_aborts_mutation() {
        let f = fixture_with(FilesystemSettings::default(), HookRegistry::new().with(Arc::new(Veto)));
        let ctx = alice();
        let root = f.service.root(&ctx).await.unwrap();

        assert!(matches!(
            f.service
                .create_collection(&ctx, root.id, "docs", NodeAttributes::default())
                .await,
            Err(FilesystemError::Locked(_))
        ));
        assert_eq!(f.repo.len(), 1);
    }

    #[tokio::test]
    async fn test_describe_renders_requested_attributes() {
        let f = fixture();
        let ctx = alice();
        let docs = docs(&f, &ctx).await;
        let attrs = f.service.describe(&ctx, docs.id, &["name", "collection"]).await.unwrap();
        assert_eq!(attrs.get("name"), Some(&Value::from("docs")));
        assert_eq!(attrs.len(), 2);
    }
}
