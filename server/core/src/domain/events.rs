// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::hooks::HookEvent;
use crate::domain::node::{NodeId, PrincipalId};

/// Committed filesystem mutations, published on the event bus after the
/// corresponding post-hook fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilesystemEvent {
    NodeCreated {
        node_id: NodeId,
        parent: Option<NodeId>,
        owner: PrincipalId,
        name: String,
        collection: bool,
        created_at: DateTime<Utc>,
    },
    VersionAdded {
        node_id: NodeId,
        version: u32,
        size: u64,
        added_at: DateTime<Utc>,
    },
    VersionRestored {
        node_id: NodeId,
        version: u32,
        restored_at: DateTime<Utc>,
    },
    NodeDeleted {
        node_id: NodeId,
        hard: bool,
        recursion: String,
        deleted_at: DateTime<Utc>,
    },
    NodeRestored {
        node_id: NodeId,
        restored_at: DateTime<Utc>,
    },
    NodeMoved {
        node_id: NodeId,
        parent: Option<NodeId>,
        moved_at: DateTime<Utc>,
    },
    NodeCopied {
        source: NodeId,
        copy: NodeId,
        copied_at: DateTime<Utc>,
    },
    NodeRenamed {
        node_id: NodeId,
        name: String,
        renamed_at: DateTime<Utc>,
    },
    AttributesChanged {
        node_id: NodeId,
        changed_at: DateTime<Utc>,
    },
}

impl FilesystemEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            FilesystemEvent::NodeCreated { node_id, .. }
            | FilesystemEvent::VersionAdded { node_id, .. }
            | FilesystemEvent::VersionRestored { node_id, .. }
            | FilesystemEvent::NodeDeleted { node_id, .. }
            | FilesystemEvent::NodeRestored { node_id, .. }
            | FilesystemEvent::NodeMoved { node_id, .. }
            | FilesystemEvent::NodeRenamed { node_id, .. }
            | FilesystemEvent::AttributesChanged { node_id, .. } => *node_id,
            FilesystemEvent::NodeCopied { copy, .. } => *copy,
        }
    }

    /// Event describing a committed mutation, `None` for pre-events.
    pub fn from_hook(event: &HookEvent<'_>) -> Option<Self> {
        let now = Utc::now();
        let event = match event {
            HookEvent::PostCreateCollection { node, .. } | HookEvent::PostCreateFile { node, .. } => {
                FilesystemEvent::NodeCreated {
                    node_id: node.id,
                    parent: node.parent,
                    owner: node.owner.clone(),
                    name: node.name.clone(),
                    collection: node.is_collection(),
                    created_at: node.created_at,
                }
            }
            HookEvent::PostPutFile { node, .. } => {
                let content = node.file()?;
                FilesystemEvent::VersionAdded {
                    node_id: node.id,
                    version: content.current_version,
                    size: content.size(),
                    added_at: node.changed_at,
                }
            }
            HookEvent::PostRestoreVersion { node, .. } => FilesystemEvent::VersionRestored {
                node_id: node.id,
                version: node.file()?.current_version,
                restored_at: now,
            },
            HookEvent::PostDelete {
                node,
                force,
                recursion,
                ..
            } => FilesystemEvent::NodeDeleted {
                node_id: node.id,
                hard: *force,
                recursion: recursion.to_string(),
                deleted_at: node.deleted.unwrap_or(now),
            },
            HookEvent::PostRestore { node, .. } => FilesystemEvent::NodeRestored {
                node_id: node.id,
                restored_at: now,
            },
            HookEvent::PostMove { node, .. } => FilesystemEvent::NodeMoved {
                node_id: node.id,
                parent: node.parent,
                moved_at: now,
            },
            HookEvent::PostCopy { source, copy, .. } => FilesystemEvent::NodeCopied {
                source: source.id,
                copy: copy.id,
                copied_at: now,
            },
            HookEvent::PostRename { node, .. } => FilesystemEvent::NodeRenamed {
                node_id: node.id,
                name: node.name.clone(),
                renamed_at: now,
            },
            HookEvent::PostSaveAttributes { node, .. } => FilesystemEvent::AttributesChanged {
                node_id: node.id,
                changed_at: node.changed_at,
            },
            _ => return None,
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::acl::RequestContext;
    use crate::domain::node::Node;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = FilesystemEvent::NodeRestored {
            node_id: NodeId::new(),
            restored_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_restored");
        let back: FilesystemEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_only_post_hooks_produce_events() {
        let ctx = RequestContext::new("alice");
        let root = Node::new_root("alice".into());
        let node = Node::new_collection(root.id, "alice".into(), "docs".into());

        let pre = HookEvent::PreCreateCollection {
            ctx: &ctx,
            parent: &root,
            name: "docs",
        };
        assert!(FilesystemEvent::from_hook(&pre).is_none());

        let post = HookEvent::PostCreateCollection { ctx: &ctx, node: &node };
        match FilesystemEvent::from_hook(&post) {
            Some(FilesystemEvent::NodeCreated { node_id, collection, .. }) => {
                assert_eq!(node_id, node.id);
                assert!(collection);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
