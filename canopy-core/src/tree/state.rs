//! Lazy State Tree
//!
//! A [`StateTree`] wraps a plain [`Value::Record`] and turns it into
//! observable nodes one path at a time.
//!
//! # Materialization
//!
//! Nothing below the root exists as a node until something resolves a path
//! through it. Resolving walks the path segment by segment; at each step a
//! child that is still plain data becomes a node:
//!
//! - a path declared as an entity collection becomes an
//!   [`EntityCollection`],
//! - a record becomes a container whose own children stay plain data,
//! - anything else becomes a [`Cell`].
//!
//! The node is cached by path in the tree's arena, so resolving the same
//! path again returns the same handle. Siblings that were never resolved
//! stay plain data.
//!
//! # Structural writes
//!
//! Writing a non-record value to a leaf goes straight through its cell.
//! Every other write reconciles the new plain value against the existing
//! nodes:
//!
//! - leaves that are still leaves are written through their cells, keeping
//!   their identity,
//! - containers that are still records are reconciled key by key,
//! - collections are replaced wholesale with the new list,
//! - removed keys and nodes that change kind drop their cached subtree,
//! - new keys stay plain data until first resolved.
//!
//! Collection values anywhere in the new value are validated before
//! anything changes. Cell writes, collection replacements and publishes run
//! after the arena lock is released, in the order the reconcile met them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::arena::Arena;
use super::cell::Cell;
use super::node::{container_slots, NodeBody, NodeEntry, NodeId, NodeKind, Slot};
use super::path::{Path, PathRegistry, Segment};
use super::snapshot::Snapshot;
use super::value::{Record, Value};
use super::view::{ContainerView, Node};
use crate::config::TreeConfig;
use crate::entity::{default_selector, parse_entities, EntityCollection, EntityId, IdSelector};
use crate::error::{Error, Result};
use crate::notify::{
    Change, FlushScheduler, ManualScheduler, PathNotifier, PathPattern, Subscription,
};
use crate::reactive::{Equality, Signal};

struct TreeInner {
    config: TreeConfig,
    paths: PathRegistry,
    arena: RwLock<Arena>,
    notifier: PathNotifier,
    equality: Equality<Value>,
    collections: HashMap<Path, IdSelector>,
    /// Set when the tree created its own scheduler; drained by `tick`.
    manual: Option<Arc<ManualScheduler>>,
}

/// A lazily materialized reactive tree.
///
/// Cloning yields another handle to the same tree.
///
/// # Example
///
/// ```rust
/// use canopy_core::record;
/// use canopy_core::tree::{StateTree, Value};
///
/// let tree = StateTree::new(record! { "count" => 0 }).unwrap();
/// let count = tree.cell("count").unwrap();
/// count.set(1);
/// assert_eq!(tree.read("count").unwrap(), Value::Int(1));
/// assert!(count.ptr_eq(&tree.cell("count").unwrap()));
/// ```
#[derive(Clone)]
pub struct StateTree {
    inner: Arc<TreeInner>,
}

/// Configures a [`StateTree`] before it is built.
pub struct StateTreeBuilder {
    value: Value,
    config: TreeConfig,
    equality: Option<Equality<Value>>,
    collections: Vec<(String, IdSelector)>,
    scheduler: Option<Arc<dyn FlushScheduler>>,
}

impl StateTreeBuilder {
    fn new(value: Value) -> Self {
        Self {
            value,
            config: TreeConfig::default(),
            equality: None,
            collections: Vec::new(),
            scheduler: None,
        }
    }

    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Decide when a cell write counts as a change. Defaults to `==`.
    pub fn equality<F>(mut self, equals: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.equality = Some(Arc::new(equals));
        self
    }

    /// Declare `path` as an entity collection keyed by the `id` field.
    pub fn entities(self, path: impl Into<String>) -> Self {
        self.entities_with(path, default_selector())
    }

    /// Declare `path` as an entity collection keyed by `selector`.
    pub fn entities_with(mut self, path: impl Into<String>, selector: IdSelector) -> Self {
        self.collections.push((path.into(), selector));
        self
    }

    /// Run deferred flushes on `scheduler` instead of a manual queue
    /// drained by [`StateTree::tick`].
    pub fn scheduler(mut self, scheduler: Arc<dyn FlushScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<StateTree> {
        let root = match self.value {
            Value::Record(record) => record,
            other => {
                return Err(Error::invalid_path(
                    "",
                    format!("the root must be a record, found {}", other.type_name()),
                ))
            }
        };

        let paths = PathRegistry::new(self.config.path_cache_capacity);
        let mut collections = HashMap::new();
        for (raw, selector) in self.collections {
            let path = paths.resolve(&raw)?;
            if path.is_root() {
                return Err(Error::invalid_path(raw, "the root cannot be an entity collection"));
            }
            let Some(value) = lookup(&root, path.segments()) else {
                return Err(Error::invalid_path(raw, "declared collection has no value"));
            };
            parse_entities(&path, value, &selector, "build")?;
            collections.insert(path, selector);
        }

        let (scheduler, manual) = match self.scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let manual = Arc::new(ManualScheduler::new());
                let shared: Arc<dyn FlushScheduler> = manual.clone();
                (shared, Some(manual))
            }
        };
        let notifier = PathNotifier::new(scheduler);
        notifier.set_batching_enabled(self.config.batching);

        let equality = self
            .equality
            .unwrap_or_else(|| Arc::new(|a: &Value, b: &Value| a == b));

        tracing::debug!(
            collections = collections.len(),
            batching = self.config.batching,
            "state tree built"
        );

        Ok(StateTree {
            inner: Arc::new(TreeInner {
                config: self.config,
                paths,
                arena: RwLock::new(Arena::new(root)),
                notifier,
                equality,
                collections,
                manual,
            }),
        })
    }
}

/// Work left for after the arena lock is released.
enum Followup {
    Publish(Change),
    /// A plain value was overwritten. Publish it unless the tree's equality
    /// calls the values equal, in which case the old value goes back.
    PublishChanged(Change),
    SetCell(Cell, Value),
    Replace(EntityCollection, IndexMap<EntityId, Record>),
}

impl Followup {
    fn publish(path: Path, value: Option<Value>, previous: Option<Value>) -> Self {
        Followup::Publish(Change {
            path,
            value,
            previous,
        })
    }
}

/// What an existing slot holds, cloned out of the arena.
enum Existing {
    Leaf(Cell),
    Container,
    Collection(EntityCollection),
}

/// Validated collection contents, by collection path.
type Staged = HashMap<Path, IndexMap<EntityId, Record>>;

fn lookup<'a>(record: &'a Record, segments: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = record.get(&*first.as_key())?;
    for segment in rest {
        current = current.as_record()?.get(&*segment.as_key())?;
    }
    Some(current)
}

fn lookup_value<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    if segments.is_empty() {
        return Some(value);
    }
    lookup(value.as_record()?, segments)
}

fn key_of(path: &Path) -> String {
    path.last()
        .map(|segment| segment.as_key().into_owned())
        .unwrap_or_default()
}

fn wrong_kind(path: &Path, expected: NodeKind, found: NodeKind) -> Error {
    Error::invalid_path(path.to_string(), format!("expected {expected}, found {found}"))
}

/// Plain value of a node and its materialized descendants.
fn collect_value(arena: &Arena, id: NodeId, tracked: bool) -> Value {
    let Some(entry) = arena.get_node(id) else {
        return Value::Null;
    };
    match entry.body() {
        NodeBody::Leaf(cell) if tracked => cell.get(),
        NodeBody::Leaf(cell) => cell.get_untracked(),
        NodeBody::Container(slots) => Value::Record(
            slots
                .iter()
                .map(|(key, slot)| {
                    let value = match slot {
                        Slot::Raw(value) => value.clone(),
                        Slot::Node(child) => collect_value(arena, *child, tracked),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        NodeBody::Collection(collection) if tracked => collection.value(),
        NodeBody::Collection(collection) => collection.value_untracked(),
    }
}

impl StateTree {
    /// Build a tree with default settings.
    pub fn new(value: impl Into<Value>) -> Result<Self> {
        Self::builder(value).build()
    }

    pub fn builder(value: impl Into<Value>) -> StateTreeBuilder {
        StateTreeBuilder::new(value.into())
    }

    pub fn config(&self) -> &TreeConfig {
        &self.inner.config
    }

    /// The change bus every mutation of this tree publishes to.
    pub fn notifier(&self) -> &PathNotifier {
        &self.inner.notifier
    }

    /// Parse a path through this tree's path cache.
    pub fn resolve(&self, path: &str) -> Result<Path> {
        self.inner.paths.resolve(path)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn root(&self) -> ContainerView {
        let id = self.inner.arena.read().root();
        ContainerView::new(self.clone(), id, Path::root())
    }

    /// Resolve a path to its node, materializing it and its ancestors.
    pub fn node(&self, path: &str) -> Result<Node> {
        self.node_at(&self.resolve(path)?)
    }

    /// Resolve a path that must be a leaf.
    pub fn cell(&self, path: &str) -> Result<Cell> {
        self.cell_at(&self.resolve(path)?)
    }

    /// Resolve a path that must be a container.
    pub fn container(&self, path: &str) -> Result<ContainerView> {
        self.container_at(&self.resolve(path)?)
    }

    /// Resolve a path declared as an entity collection.
    pub fn entities(&self, path: &str) -> Result<EntityCollection> {
        self.entities_at(&self.resolve(path)?)
    }

    /// Current plain value at a path. Leaves read inside a reactive context
    /// are tracked.
    pub fn read(&self, path: &str) -> Result<Value> {
        Ok(self.node(path)?.value())
    }

    /// Write a value at a path: through the cell for a leaf, by structural
    /// reconcile for anything else. Writing a missing key of an existing
    /// container adds it.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.set_at(&self.resolve(path)?, value.into())
    }

    /// Write a function of the current value.
    pub fn update(&self, path: &str, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let path = self.resolve(path)?;
        let id = self.materialize(&path)?;
        let current = self.value_of(id, false);
        self.set_at(&path, f(&current))
    }

    /// The whole tree as plain data, with no live references.
    pub fn snapshot(&self) -> Value {
        let id = self.inner.arena.read().root();
        self.value_of(id, false)
    }

    /// [`StateTree::snapshot`] with a capture timestamp.
    pub fn capture(&self) -> Snapshot {
        Snapshot::new(self.snapshot())
    }

    /// Replace the whole tree, reconciling against existing nodes.
    pub fn restore(&self, value: Value) -> Result<()> {
        self.set_at(&Path::root(), value)
    }

    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.restore(snapshot.value().clone())
    }

    /// Whether a node currently exists for `path`.
    pub fn is_materialized(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|path| self.is_materialized_at(&path))
            .unwrap_or(false)
    }

    /// Number of materialized nodes, root included.
    pub fn materialized_count(&self) -> usize {
        self.inner.arena.read().node_count()
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Subscribe to changes matching a pattern such as `user.name`,
    /// `user.*`, `user.**` or `**`.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        Ok(self
            .inner
            .notifier
            .subscribe(PathPattern::parse(pattern)?, handler))
    }

    pub fn on_flush<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.notifier.on_flush(handler)
    }

    /// Deliver pending changes now.
    pub fn flush_sync(&self) -> usize {
        self.inner.notifier.flush_sync()
    }

    /// Run deferred flushes queued on the tree's own scheduler. Does nothing
    /// when the tree was built with an external scheduler.
    pub fn tick(&self) -> usize {
        self.inner
            .manual
            .as_ref()
            .map_or(0, |scheduler| scheduler.run_pending())
    }

    /// Whether two handles refer to the same tree.
    pub fn ptr_eq(&self, other: &StateTree) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Internals shared with views
    // ------------------------------------------------------------------

    pub(crate) fn node_at(&self, path: &Path) -> Result<Node> {
        let id = self.materialize(path)?;
        let arena = self.inner.arena.read();
        let entry = arena
            .get_node(id)
            .ok_or_else(|| Error::invalid_path(path.to_string(), "node was removed"))?;
        Ok(match entry.body() {
            NodeBody::Leaf(cell) => Node::Leaf(cell.clone()),
            NodeBody::Container(_) => {
                Node::Container(ContainerView::new(self.clone(), id, path.clone()))
            }
            NodeBody::Collection(collection) => Node::Collection(collection.clone()),
        })
    }

    pub(crate) fn cell_at(&self, path: &Path) -> Result<Cell> {
        match self.node_at(path)? {
            Node::Leaf(cell) => Ok(cell),
            other => Err(wrong_kind(path, NodeKind::Leaf, other.kind())),
        }
    }

    pub(crate) fn container_at(&self, path: &Path) -> Result<ContainerView> {
        match self.node_at(path)? {
            Node::Container(view) => Ok(view),
            other => Err(wrong_kind(path, NodeKind::Container, other.kind())),
        }
    }

    pub(crate) fn entities_at(&self, path: &Path) -> Result<EntityCollection> {
        match self.node_at(path)? {
            Node::Collection(collection) => Ok(collection),
            other => Err(wrong_kind(path, NodeKind::Collection, other.kind())),
        }
    }

    pub(crate) fn is_materialized_at(&self, path: &Path) -> bool {
        self.node_id_at(path).is_some()
    }

    pub(crate) fn node_id_at(&self, path: &Path) -> Option<NodeId> {
        self.inner.arena.read().lookup(path)
    }

    pub(crate) fn keys_of(&self, id: NodeId) -> Vec<String> {
        self.inner
            .arena
            .read()
            .slots(id)
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn value_of(&self, id: NodeId, tracked: bool) -> Value {
        collect_value(&self.inner.arena.read(), id, tracked)
    }

    // ------------------------------------------------------------------
    // Materialization
    // ------------------------------------------------------------------

    fn materialize(&self, path: &Path) -> Result<NodeId> {
        if let Some(id) = self.inner.arena.read().lookup(path) {
            return Ok(id);
        }

        // Id selectors are caller code: run them before taking the write lock.
        let mut prepared = self.prepare_collections(path)?;

        let mut arena = self.inner.arena.write();
        let mut current = arena.root();
        for depth in 1..=path.len() {
            let prefix = Path::from_segments(path.segments()[..depth].iter().cloned());
            current = match arena.lookup(&prefix) {
                Some(id) => id,
                None => {
                    self.materialize_child(&mut arena, current, prefix, path, &mut prepared)?
                }
            };
        }
        Ok(current)
    }

    /// Parse every unmaterialized collection on the way to `path`.
    fn prepare_collections(&self, path: &Path) -> Result<Staged> {
        let mut prepared = HashMap::new();
        for (collection, selector) in &self.inner.collections {
            if !path.starts_with(collection) || self.is_materialized_at(collection) {
                continue;
            }
            if let Some(raw) = self.peek_raw(collection) {
                let entities = parse_entities(collection, &raw, selector, "materialize")?;
                prepared.insert(collection.clone(), entities);
            }
        }
        Ok(prepared)
    }

    /// Plain value at an unmaterialized path, read without materializing.
    fn peek_raw(&self, path: &Path) -> Option<Value> {
        let arena = self.inner.arena.read();
        let segments = path.segments();
        let mut id = arena.root();
        for (depth, segment) in segments.iter().enumerate() {
            match arena.slots(id)?.get(&*segment.as_key())? {
                Slot::Node(child) => id = *child,
                Slot::Raw(value) => return lookup_value(value, &segments[depth + 1..]).cloned(),
            }
        }
        None
    }

    fn materialize_child(
        &self,
        arena: &mut Arena,
        parent: NodeId,
        path: Path,
        target: &Path,
        prepared: &mut Staged,
    ) -> Result<NodeId> {
        let key = key_of(&path);
        let raw = {
            let Some(entry) = arena.get_node_mut(parent) else {
                return Err(Error::invalid_path(target.to_string(), "parent node was removed"));
            };
            let kind = entry.kind();
            let parent_path = entry.path().clone();
            match entry.body_mut() {
                NodeBody::Container(slots) => match slots.get_mut(&key) {
                    Some(Slot::Raw(value)) => std::mem::take(value),
                    Some(Slot::Node(id)) => return Ok(*id),
                    None => {
                        return Err(Error::invalid_path(
                            target.to_string(),
                            format!("nothing at '{path}'"),
                        ))
                    }
                },
                _ => {
                    return Err(Error::invalid_path(
                        target.to_string(),
                        format!("'{parent_path}' is a {kind}, not a container"),
                    ))
                }
            }
        };

        let body = match self.body_for(&path, raw, prepared) {
            Ok(body) => body,
            Err((err, raw)) => {
                if let Some(slot) = arena.slots_mut(parent).and_then(|s| s.get_mut(&key)) {
                    *slot = Slot::Raw(raw);
                }
                return Err(err);
            }
        };

        let entry = NodeEntry::new(path.clone(), body);
        let kind = entry.kind();
        let id = arena.add_node(entry);
        if let Some(slots) = arena.slots_mut(parent) {
            slots.insert(key, Slot::Node(id));
        }
        tracing::trace!(path = %path, %kind, "materialized");
        Ok(id)
    }

    /// Node body for a plain value at `path`. Hands the value back on
    /// failure so the caller can put it back. Collections come from
    /// `prepared`, parsed before the arena was locked.
    fn body_for(
        &self,
        path: &Path,
        raw: Value,
        prepared: &mut Staged,
    ) -> std::result::Result<NodeBody, (Error, Value)> {
        if let Some(selector) = self.inner.collections.get(path) {
            return match prepared.remove(path) {
                Some(entities) => Ok(NodeBody::Collection(EntityCollection::new(
                    path.clone(),
                    selector.clone(),
                    entities,
                    self.inner.notifier.clone(),
                    self.inner.config.max_tap_depth,
                ))),
                None => Err((
                    Error::invalid_path(path.to_string(), "collection changed while resolving"),
                    raw,
                )),
            };
        }

        Ok(match raw {
            Value::Record(record) => NodeBody::Container(container_slots(record)),
            leaf => NodeBody::Leaf(Cell::new(
                path.clone(),
                Signal::with_equality(leaf, self.inner.equality.clone()),
                self.inner.notifier.clone(),
            )),
        })
    }

    // ------------------------------------------------------------------
    // Structural writes
    // ------------------------------------------------------------------

    pub(crate) fn set_at(&self, path: &Path, value: Value) -> Result<()> {
        let mut staged = self.stage_collections(path, &value)?;
        let parent = match path.parent() {
            Some(parent) => Some(self.materialize(&parent)?),
            None => None,
        };

        let mut followups = Vec::new();
        {
            let mut arena = self.inner.arena.write();
            match parent {
                None => {
                    let record = match value {
                        Value::Record(record) => record,
                        other => {
                            return Err(Error::invalid_path(
                                "",
                                format!("the root must be a record, found {}", other.type_name()),
                            ))
                        }
                    };
                    let root = arena.root();
                    self.reconcile_container(&mut arena, root, record, &mut staged, &mut followups);
                }
                Some(parent) => {
                    if arena.slots(parent).is_none() {
                        return Err(Error::invalid_path(
                            path.to_string(),
                            "parent is not a container",
                        ));
                    }
                    let key = key_of(path);
                    self.reconcile_slot(
                        &mut arena,
                        parent,
                        &key,
                        path,
                        value,
                        &mut staged,
                        &mut followups,
                    );
                }
            }
        }

        tracing::trace!(path = %path, followups = followups.len(), "set");
        self.apply(followups);
        Ok(())
    }

    /// Validate every declared collection inside the new value.
    fn stage_collections(&self, path: &Path, value: &Value) -> Result<Staged> {
        let mut staged = HashMap::new();
        for (collection, selector) in &self.inner.collections {
            if !collection.starts_with(path) {
                continue;
            }
            let rest = &collection.segments()[path.len()..];
            if let Some(found) = lookup_value(value, rest) {
                let entities = parse_entities(collection, found, selector, "set")?;
                staged.insert(collection.clone(), entities);
            }
        }
        Ok(staged)
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_slot(
        &self,
        arena: &mut Arena,
        parent: NodeId,
        key: &str,
        path: &Path,
        value: Value,
        staged: &mut Staged,
        out: &mut Vec<Followup>,
    ) {
        let existing = arena
            .slots(parent)
            .and_then(|slots| slots.get(key))
            .map(|slot| match slot {
                Slot::Raw(_) => None,
                Slot::Node(id) => Some(*id),
            });

        match existing {
            None => {
                if let Some(slots) = arena.slots_mut(parent) {
                    slots.insert(key.to_string(), Slot::Raw(value.clone()));
                }
                out.push(Followup::publish(path.clone(), Some(value), None));
            }
            Some(None) => {
                let Some(Slot::Raw(old)) = arena.slots_mut(parent).and_then(|s| s.get_mut(key))
                else {
                    return;
                };
                if *old == value {
                    return;
                }
                let previous = std::mem::replace(old, value.clone());
                out.push(Followup::PublishChanged(Change {
                    path: path.clone(),
                    value: Some(value),
                    previous: Some(previous),
                }));
            }
            Some(Some(id)) => self.reconcile_node(arena, parent, key, id, path, value, staged, out),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_node(
        &self,
        arena: &mut Arena,
        parent: NodeId,
        key: &str,
        id: NodeId,
        path: &Path,
        value: Value,
        staged: &mut Staged,
        out: &mut Vec<Followup>,
    ) {
        let existing = match arena.get_node(id).map(|entry| entry.body()) {
            Some(NodeBody::Leaf(cell)) => Existing::Leaf(cell.clone()),
            Some(NodeBody::Container(_)) => Existing::Container,
            Some(NodeBody::Collection(collection)) => Existing::Collection(collection.clone()),
            None => return,
        };

        match (existing, value) {
            (Existing::Collection(collection), _) => {
                if let Some(entities) = staged.remove(path) {
                    out.push(Followup::Replace(collection, entities));
                }
            }
            (Existing::Container, Value::Record(record)) => {
                self.reconcile_container(arena, id, record, staged, out);
            }
            (Existing::Leaf(cell), value) if !value.is_container() => {
                out.push(Followup::SetCell(cell, value));
            }
            (_, value) => {
                let previous = collect_value(arena, id, false);
                let removed = arena.remove_subtree(id);
                if let Some(slots) = arena.slots_mut(parent) {
                    slots.insert(key.to_string(), Slot::Raw(value.clone()));
                }
                tracing::trace!(path = %path, removed, "node changed kind");
                out.push(Followup::publish(path.clone(), Some(value), Some(previous)));
            }
        }
    }

    fn reconcile_container(
        &self,
        arena: &mut Arena,
        id: NodeId,
        record: Record,
        staged: &mut Staged,
        out: &mut Vec<Followup>,
    ) {
        let Some(container_path) = arena.get_node(id).map(|entry| entry.path().clone()) else {
            return;
        };

        let stale: Vec<String> = arena
            .slots(id)
            .map(|slots| {
                slots
                    .keys()
                    .filter(|key| !record.contains_key(*key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for key in stale {
            let Some(slot) = arena.slots_mut(id).and_then(|slots| slots.shift_remove(&key)) else {
                continue;
            };
            let previous = match slot {
                Slot::Raw(value) => value,
                Slot::Node(child) => {
                    let value = collect_value(arena, child, false);
                    arena.remove_subtree(child);
                    value
                }
            };
            out.push(Followup::publish(
                container_path.child(key.as_str()),
                None,
                Some(previous),
            ));
        }

        let order: Vec<String> = record.keys().cloned().collect();
        for (key, value) in record {
            let child_path = container_path.child(key.as_str());
            self.reconcile_slot(arena, id, &key, &child_path, value, staged, out);
        }

        if let Some(slots) = arena.slots_mut(id) {
            let mut previous = std::mem::take(slots);
            for key in order {
                if let Some(slot) = previous.shift_remove(&key) {
                    slots.insert(key, slot);
                }
            }
        }
    }

    /// Put back a plain value the tree's equality says was not changed.
    fn revert_raw(&self, path: &Path, written: &Value, previous: Value) {
        let Some(parent) = path.parent() else {
            return;
        };
        let key = key_of(path);
        let mut arena = self.inner.arena.write();
        let Some(parent) = arena.lookup(&parent) else {
            return;
        };
        if let Some(Slot::Raw(current)) = arena.slots_mut(parent).and_then(|s| s.get_mut(&key)) {
            if current == written {
                *current = previous;
            }
        }
    }

    fn apply(&self, followups: Vec<Followup>) {
        for followup in followups {
            match followup {
                Followup::Publish(change) => {
                    self.inner
                        .notifier
                        .notify(change.path, change.value, change.previous)
                }
                Followup::PublishChanged(change) => {
                    let equal = match (&change.previous, &change.value) {
                        (Some(previous), Some(value)) => (self.inner.equality)(previous, value),
                        _ => false,
                    };
                    match (equal, change.value, change.previous) {
                        (true, Some(written), Some(previous)) => {
                            self.revert_raw(&change.path, &written, previous)
                        }
                        (_, value, previous) => {
                            self.inner.notifier.notify(change.path, value, previous)
                        }
                    }
                }
                Followup::SetCell(cell, value) => cell.set(value),
                Followup::Replace(collection, entities) => collection.replace_storage(entities),
            }
        }
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("materialized", &self.materialized_count())
            .field("collections", &self.inner.collections.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
