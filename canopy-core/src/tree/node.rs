//! Tree Nodes
//!
//! This module defines the entries stored in a tree's node arena.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::cell::Cell;
use super::path::Path;
use super::value::{Record, Value};
use crate::entity::EntityCollection;

/// Unique identifier for a materialized node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A single cell holding any non-record value.
    Leaf,

    /// A record whose children materialize on demand.
    Container,

    /// A path declared as an entity collection.
    Collection,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Container => "container",
            NodeKind::Collection => "entity collection",
        })
    }
}

/// A child of a container: still plain data, or a materialized node.
#[derive(Debug)]
pub(crate) enum Slot {
    Raw(Value),
    Node(NodeId),
}

pub(crate) enum NodeBody {
    Leaf(Cell),
    Container(IndexMap<String, Slot>),
    Collection(EntityCollection),
}

/// A materialized node.
pub(crate) struct NodeEntry {
    id: NodeId,
    path: Path,
    body: NodeBody,
}

impl NodeEntry {
    pub(crate) fn new(path: Path, body: NodeBody) -> Self {
        Self {
            id: NodeId::new(),
            path,
            body,
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Leaf(_) => NodeKind::Leaf,
            NodeBody::Container(_) => NodeKind::Container,
            NodeBody::Collection(_) => NodeKind::Collection,
        }
    }

    pub(crate) fn body(&self) -> &NodeBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut NodeBody {
        &mut self.body
    }

    /// Materialized children, for subtree removal.
    pub(crate) fn child_ids(&self) -> Vec<NodeId> {
        match &self.body {
            NodeBody::Container(slots) => slots
                .values()
                .filter_map(|slot| match slot {
                    Slot::Node(id) => Some(*id),
                    Slot::Raw(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Slots of a fresh container: every child starts as plain data.
pub(crate) fn container_slots(record: Record) -> IndexMap<String, Slot> {
    record
        .into_iter()
        .map(|(key, value)| (key, Slot::Raw(value)))
        .collect()
}
