//! Handles to materialized nodes.

use std::fmt;

use super::cell::Cell;
use super::node::{NodeId, NodeKind};
use super::path::Path;
use super::state::StateTree;
use super::value::Value;
use crate::entity::EntityCollection;
use crate::error::Result;

/// Whatever a path resolves to.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Cell),
    Container(ContainerView),
    Collection(EntityCollection),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Leaf(_) => NodeKind::Leaf,
            Node::Container(_) => NodeKind::Container,
            Node::Collection(_) => NodeKind::Collection,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Node::Leaf(cell) => cell.path(),
            Node::Container(view) => view.path(),
            Node::Collection(collection) => collection.path(),
        }
    }

    /// Current plain value, tracked inside a reactive context.
    pub fn value(&self) -> Value {
        match self {
            Node::Leaf(cell) => cell.get(),
            Node::Container(view) => view.value(),
            Node::Collection(collection) => collection.value(),
        }
    }

    pub fn into_cell(self) -> Option<Cell> {
        match self {
            Node::Leaf(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn into_container(self) -> Option<ContainerView> {
        match self {
            Node::Container(view) => Some(view),
            _ => None,
        }
    }

    pub fn into_collection(self) -> Option<EntityCollection> {
        match self {
            Node::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

/// View of a container node.
///
/// The view names one materialized node. After a structural replacement
/// removes that node the view is detached: [`ContainerView::is_attached`]
/// reports false, its own value reads as null, and child lookups resolve
/// against whatever is now at its path.
#[derive(Clone)]
pub struct ContainerView {
    tree: StateTree,
    id: NodeId,
    path: Path,
}

impl ContainerView {
    pub(crate) fn new(tree: StateTree, id: NodeId, path: Path) -> Self {
        Self { tree, id, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// Keys of the container, in order.
    pub fn keys(&self) -> Vec<String> {
        self.tree.keys_of(self.id)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Resolve a direct child, materializing it.
    pub fn node(&self, key: &str) -> Result<Node> {
        self.tree.node_at(&self.path.child(key))
    }

    pub fn cell(&self, key: &str) -> Result<Cell> {
        self.tree.cell_at(&self.path.child(key))
    }

    pub fn container(&self, key: &str) -> Result<ContainerView> {
        self.tree.container_at(&self.path.child(key))
    }

    pub fn entities(&self, key: &str) -> Result<EntityCollection> {
        self.tree.entities_at(&self.path.child(key))
    }

    /// Whether the child at `key` has been materialized.
    pub fn is_materialized(&self, key: &str) -> bool {
        self.tree.is_materialized_at(&self.path.child(key))
    }

    /// The subtree as plain data.
    pub fn value(&self) -> Value {
        self.tree.value_of(self.id, true)
    }

    /// Structurally replace the subtree.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.tree.set_at(&self.path, value.into())
    }

    /// Whether this view still names the node at its path.
    pub fn is_attached(&self) -> bool {
        self.tree.node_id_at(&self.path) == Some(self.id)
    }

    /// Whether two views name the same node of the same tree.
    pub fn ptr_eq(&self, other: &ContainerView) -> bool {
        self.id == other.id && self.tree.ptr_eq(&other.tree)
    }
}

impl fmt::Debug for ContainerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerView")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish()
    }
}
