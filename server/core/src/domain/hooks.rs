// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node lifecycle hooks
//!
//! Hooks observe filesystem mutations. The registry is assembled once at
//! startup and invoked in registration order.
//!
//! - `Pre*` events fire after validation and before anything is written. An
//!   error returned by any hook vetoes the operation and is handed to the
//!   caller unchanged.
//! - `Post*` events fire after the mutation is committed. Errors are logged
//!   and never undo the mutation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::acl::RequestContext;
use crate::domain::error::FilesystemError;
use crate::domain::node::{AttributeUpdate, Node};

#[derive(Debug)]
pub enum HookEvent<'a> {
    PreCreateCollection {
        ctx: &'a RequestContext,
        parent: &'a Node,
        name: &'a str,
    },
    PostCreateCollection {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreCreateFile {
        ctx: &'a RequestContext,
        parent: &'a Node,
        name: &'a str,
        size: u64,
    },
    PostCreateFile {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PrePutFile {
        ctx: &'a RequestContext,
        node: &'a Node,
        size: u64,
    },
    PostPutFile {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreRestoreVersion {
        ctx: &'a RequestContext,
        node: &'a Node,
        version: u32,
    },
    PostRestoreVersion {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreDelete {
        ctx: &'a RequestContext,
        node: &'a Node,
        force: bool,
        recursion: &'a str,
    },
    PostDelete {
        ctx: &'a RequestContext,
        node: &'a Node,
        force: bool,
        recursion: &'a str,
    },
    PreRestore {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PostRestore {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreMove {
        ctx: &'a RequestContext,
        node: &'a Node,
        destination: &'a Node,
    },
    PostMove {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreCopy {
        ctx: &'a RequestContext,
        node: &'a Node,
        destination: &'a Node,
    },
    PostCopy {
        ctx: &'a RequestContext,
        source: &'a Node,
        copy: &'a Node,
    },
    PreRename {
        ctx: &'a RequestContext,
        node: &'a Node,
        name: &'a str,
    },
    PostRename {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
    PreSaveAttributes {
        ctx: &'a RequestContext,
        node: &'a Node,
        update: &'a AttributeUpdate,
    },
    PostSaveAttributes {
        ctx: &'a RequestContext,
        node: &'a Node,
    },
}

impl HookEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::PreCreateCollection { .. } => "pre_create_collection",
            HookEvent::PostCreateCollection { .. } => "post_create_collection",
            HookEvent::PreCreateFile { .. } => "pre_create_file",
            HookEvent::PostCreateFile { .. } => "post_create_file",
            HookEvent::PrePutFile { .. } => "pre_put_file",
            HookEvent::PostPutFile { .. } => "post_put_file",
            HookEvent::PreRestoreVersion { .. } => "pre_restore_version",
            HookEvent::PostRestoreVersion { .. } => "post_restore_version",
            HookEvent::PreDelete { .. } => "pre_delete",
            HookEvent::PostDelete { .. } => "post_delete",
            HookEvent::PreRestore { .. } => "pre_restore",
            HookEvent::PostRestore { .. } => "post_restore",
            HookEvent::PreMove { .. } => "pre_move",
            HookEvent::PostMove { .. } => "post_move",
            HookEvent::PreCopy { .. } => "pre_copy",
            HookEvent::PostCopy { .. } => "post_copy",
            HookEvent::PreRename { .. } => "pre_rename",
            HookEvent::PostRename { .. } => "post_rename",
            HookEvent::PreSaveAttributes { .. } => "pre_save_attributes",
            HookEvent::PostSaveAttributes { .. } => "post_save_attributes",
        }
    }

    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            HookEvent::PreCreateCollection { .. }
                | HookEvent::PreCreateFile { .. }
                | HookEvent::PrePutFile { .. }
                | HookEvent::PreRestoreVersion { .. }
                | HookEvent::PreDelete { .. }
                | HookEvent::PreRestore { .. }
                | HookEvent::PreMove { .. }
                | HookEvent::PreCopy { .. }
                | HookEvent::PreRename { .. }
                | HookEvent::PreSaveAttributes { .. }
        )
    }

    pub fn ctx(&self) -> &RequestContext {
        match self {
            HookEvent::PreCreateCollection { ctx, .. }
            | HookEvent::PostCreateCollection { ctx, .. }
            | HookEvent::PreCreateFile { ctx, .. }
            | HookEvent::PostCreateFile { ctx, .. }
            | HookEvent::PrePutFile { ctx, .. }
            | HookEvent::PostPutFile { ctx, .. }
            | HookEvent::PreRestoreVersion { ctx, .. }
            | HookEvent::PostRestoreVersion { ctx, .. }
            | HookEvent::PreDelete { ctx, .. }
            | HookEvent::PostDelete { ctx, .. }
            | HookEvent::PreRestore { ctx, .. }
            | HookEvent::PostRestore { ctx, .. }
            | HookEvent::PreMove { ctx, .. }
            | HookEvent::PostMove { ctx, .. }
            | HookEvent::PreCopy { ctx, .. }
            | HookEvent::PostCopy { ctx, .. }
            | HookEvent::PreRename { ctx, .. }
            | HookEvent::PostRename { ctx, .. }
            | HookEvent::PreSaveAttributes { ctx, .. }
            | HookEvent::PostSaveAttributes { ctx, .. } => ctx,
        }
    }
}

#[async_trait]
pub trait NodeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &HookEvent<'_>) -> Result<(), FilesystemError>;
}

/// Ordered list of hooks, fixed after construction.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn NodeHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn NodeHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook for `event`.
    ///
    /// Returns the first error for a pre-event. Post-event failures are
    /// logged and swallowed.
    pub async fn fire(&self, event: HookEvent<'_>) -> Result<(), FilesystemError> {
        for hook in &self.hooks {
            if let Err(err) = hook.on_event(&event).await {
                if event.is_pre() {
                    warn!(
                        hook = hook.name(),
                        event = event.name(),
                        correlation_id = %event.ctx().correlation_id,
                        "Hook vetoed operation: {}",
                        err
                    );
                    return Err(err);
                }
                warn!(
                    hook = hook.name(),
                    event = event.name(),
                    correlation_id = %event.ctx().correlation_id,
                    "Hook failed after commit: {}",
                    err
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}
