//! Named trees.
//!
//! Hosts that address trees by name (an inspector listing every store, a
//! test harness resetting them) own a [`TreeRegistry`] and pass it where it
//! is needed. There is no process-wide instance.

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::state::StateTree;
use super::value::Value;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct TreeRegistry {
    trees: RwLock<IndexMap<String, StateTree>>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree with default settings and register it.
    pub fn create(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<StateTree> {
        self.register(name, StateTree::new(value)?)
    }

    /// Register an already built tree.
    pub fn register(&self, name: impl Into<String>, tree: StateTree) -> Result<StateTree> {
        let name = name.into();
        let mut trees = self.trees.write();
        if trees.contains_key(&name) {
            return Err(Error::AlreadyRegistered { name });
        }
        tracing::debug!(name = %name, "tree registered");
        trees.insert(name, tree.clone());
        Ok(tree)
    }

    pub fn get(&self, name: &str) -> Option<StateTree> {
        self.trees.read().get(name).cloned()
    }

    /// Return the tree registered under `name`, creating it from `init`
    /// if there is none. `init` only runs when the tree is created.
    pub fn get_or_create<F>(&self, name: &str, init: F) -> Result<StateTree>
    where
        F: FnOnce() -> Value,
    {
        if let Some(tree) = self.get(name) {
            return Ok(tree);
        }
        let tree = StateTree::new(init())?;

        let mut trees = self.trees.write();
        if let Some(existing) = trees.get(name) {
            return Ok(existing.clone());
        }
        trees.insert(name.to_string(), tree.clone());
        tracing::debug!(name, "tree registered");
        Ok(tree)
    }

    /// Remove a tree from the registry. Handles to it stay usable.
    pub fn dispose(&self, name: &str) -> Option<StateTree> {
        let removed = self.trees.write().shift_remove(name);
        if removed.is_some() {
            tracing::debug!(name, "tree disposed");
        }
        removed
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.trees.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }
}

impl std::fmt::Debug for TreeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn create_and_get() {
        let registry = TreeRegistry::new();
        let tree = registry.create("app", record! { "count" => 0 }).unwrap();
        assert!(registry.get("app").unwrap().ptr_eq(&tree));
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = TreeRegistry::new();
        registry.create("app", record! {}).unwrap();
        let err = registry.create("app", record! {}).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { ref name } if name == "app"));
    }

    #[test]
    fn get_or_create_initializes_once() {
        let registry = TreeRegistry::new();
        let inits = AtomicI32::new(0);
        let init = || {
            inits.fetch_add(1, Ordering::SeqCst);
            Value::Record(record! { "n" => 1 })
        };

        let first = registry.get_or_create("app", init).unwrap();
        let second = registry.get_or_create("app", init).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_removes_by_name() {
        let registry = TreeRegistry::new();
        registry.create("a", record! {}).unwrap();
        registry.create("b", record! {}).unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);

        let tree = registry.dispose("a").unwrap();
        assert_eq!(tree.snapshot(), Value::Record(record! {}));
        assert!(registry.dispose("a").is_none());
        assert_eq!(registry.len(), 1);
    }
}
