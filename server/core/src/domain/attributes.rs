// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Attribute decorators
//!
//! Maps public attribute names to functions that render them from a node.
//! The API layer asks for a subset of attributes per request; the registry is
//! built once and is read-only afterwards.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::domain::node::Node;

pub type AttributeFn = fn(&Node) -> Value;

#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    attributes: BTreeMap<&'static str, AttributeFn>,
}

impl AttributeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in node attributes.
    pub fn standard() -> Self {
        Self::empty()
            .with("id", |n| json!(n.id))
            .with("name", |n| json!(n.name))
            .with("parent", |n| json!(n.parent))
            .with("owner", |n| json!(n.owner))
            .with("collection", |n| json!(n.is_collection()))
            .with("size", |n| json!(n.size()))
            .with("version", |n| json!(n.file().map(|f| f.current_version)))
            .with("hash", |n| {
                json!(n.file().and_then(|f| f.current()).map(|v| v.checksum.clone()))
            })
            .with("readonly", |n| json!(n.readonly))
            .with("locked", |n| json!(n.active_lock(chrono::Utc::now()).is_some()))
            .with("created", |n| json!(n.created_at))
            .with("changed", |n| json!(n.changed_at))
            .with("deleted", |n| json!(n.deleted))
            .with("destroy", |n| json!(n.destroy))
            .with("meta", |n| json!(n.meta))
            .with("storage", |n| json!(n.pinned_storage()))
    }

    pub fn with(mut self, name: &'static str, render: AttributeFn) -> Self {
        self.attributes.insert(name, render);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes.keys().copied()
    }

    /// Render the requested attributes. Unknown names are skipped; an empty
    /// request renders everything.
    pub fn decorate(&self, node: &Node, requested: &[&str]) -> Map<String, Value> {
        let mut out = Map::new();
        if requested.is_empty() {
            for (name, render) in &self.attributes {
                out.insert((*name).to_string(), render(node));
            }
            return out;
        }
        for name in requested {
            if let Some(render) = self.attributes.get(name) {
                out.insert((*name).to_string(), render(node));
            }
        }
        out
    }
}
