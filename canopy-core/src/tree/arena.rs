//! Node Arena
//!
//! Owns every materialized node of one tree, indexed both by id and by
//! path. The path index is what makes repeated reads of a path return the
//! same handle: a path maps to one node until a structural replacement
//! removes it.
//!
//! Removing a node removes its whole materialized subtree from both
//! indexes. Unmaterialized children are plain data inside their parent and
//! need no bookkeeping.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::node::{container_slots, NodeBody, NodeEntry, NodeId, Slot};
use super::path::Path;
use super::value::Record;

pub(crate) struct Arena {
    /// All nodes, indexed by ID.
    nodes: HashMap<NodeId, NodeEntry>,

    /// Materialized paths.
    index: HashMap<Path, NodeId>,

    root: NodeId,
}

impl Arena {
    /// Create an arena holding only the root container.
    pub(crate) fn new(root: Record) -> Self {
        let entry = NodeEntry::new(Path::root(), NodeBody::Container(container_slots(root)));
        let root = entry.id();
        let mut arena = Self {
            nodes: HashMap::new(),
            index: HashMap::new(),
            root,
        };
        arena.add_node(entry);
        arena
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    /// Add a node and index its path.
    pub(crate) fn add_node(&mut self, entry: NodeEntry) -> NodeId {
        let id = entry.id();
        self.index.insert(entry.path().clone(), id);
        self.nodes.insert(id, entry);
        id
    }

    /// Remove a node and everything materialized below it.
    ///
    /// Returns how many nodes were removed. The root cannot be removed.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> usize {
        if id == self.root {
            return 0;
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&node_id) {
                if self.index.get(entry.path()) == Some(&node_id) {
                    self.index.remove(entry.path());
                }
                if let NodeBody::Leaf(cell) = entry.body() {
                    cell.detach();
                }
                stack.extend(entry.child_ids());
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn get_node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_node_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(&id)
    }

    /// Children of a container node.
    pub(crate) fn slots(&self, id: NodeId) -> Option<&IndexMap<String, Slot>> {
        match self.nodes.get(&id).map(NodeEntry::body) {
            Some(NodeBody::Container(slots)) => Some(slots),
            _ => None,
        }
    }

    pub(crate) fn slots_mut(&mut self, id: NodeId) -> Option<&mut IndexMap<String, Slot>> {
        match self.nodes.get_mut(&id).map(NodeEntry::body_mut) {
            Some(NodeBody::Container(slots)) => Some(slots),
            _ => None,
        }
    }

    /// The node materialized at `path`, if any.
    pub(crate) fn lookup(&self, path: &Path) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    /// Get the total number of materialized nodes, root included.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::tree::Value;

    fn container(arena: &mut Arena, parent: NodeId, key: &str) -> NodeId {
        let parent_path = arena.get_node(parent).unwrap().path().clone();
        let record = match arena.slots_mut(parent).unwrap().get_mut(key) {
            Some(Slot::Raw(Value::Record(record))) => std::mem::take(record),
            _ => panic!("expected a raw record at {key}"),
        };
        let id = arena.add_node(NodeEntry::new(
            parent_path.child(key),
            NodeBody::Container(container_slots(record)),
        ));
        arena
            .slots_mut(parent)
            .unwrap()
            .insert(key.to_string(), Slot::Node(id));
        id
    }

    #[test]
    fn starts_with_root_only() {
        let arena = Arena::new(record! { "a" => 1 });
        assert_eq!(arena.node_count(), 1);
        assert_eq!(arena.lookup(&Path::root()), Some(arena.root()));
        assert_eq!(arena.slots(arena.root()).map(|s| s.len()), Some(1));
    }

    #[test]
    fn add_and_lookup() {
        let mut arena = Arena::new(record! { "a" => record! { "b" => 1 } });
        let root = arena.root();
        let a = container(&mut arena, root, "a");

        assert_eq!(arena.lookup(&Path::parse("a").unwrap()), Some(a));
        assert_eq!(arena.lookup(&Path::parse("a.b").unwrap()), None);
        assert_eq!(arena.node_count(), 2);
    }

    #[test]
    fn remove_subtree_drops_descendants() {
        let mut arena = Arena::new(record! {
            "a" => record! { "b" => record! { "c" => 1 } }
        });
        let root = arena.root();
        let a = container(&mut arena, root, "a");
        container(&mut arena, a, "b");
        assert_eq!(arena.node_count(), 3);

        assert_eq!(arena.remove_subtree(a), 2);
        assert_eq!(arena.node_count(), 1);
        assert_eq!(arena.lookup(&Path::parse("a.b").unwrap()), None);
    }

    #[test]
    fn root_is_never_removed() {
        let mut arena = Arena::new(record! {});
        let root = arena.root();
        assert_eq!(arena.remove_subtree(root), 0);
        assert_eq!(arena.node_count(), 1);
    }
}
