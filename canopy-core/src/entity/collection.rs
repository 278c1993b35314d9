//! Entity Collection
//!
//! An id-keyed, insertion-ordered set of records living at one path of a
//! state tree.
//!
//! # Storage and views
//!
//! Storage is a plain map guarded by a lock. Every committed write bumps a
//! generation [`Signal`]; the query views are [`Memo`]s that read the
//! generation and then the storage, so a view always reflects exactly one
//! committed generation and recomputes lazily after the next write.
//!
//! # Mutation order
//!
//! Single-entity operations run: id check, intercepts, commit, view
//! invalidation, publish, taps. A failed check or a block leaves the
//! collection untouched. Batch operations apply the single-entity operation
//! in order and stop at the first error, keeping what already committed.
//!
//! Changes publish at `<collection>.<id>`. Wholesale replacement
//! ([`EntityCollection::set_all`], [`EntityCollection::clear`]) publishes
//! once at the collection path and runs no hooks.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::hooks::{resolve, Hooks, HookId, Outcome, Verdict};
use super::id::{EntityId, IdSelector};
use crate::error::{Error, Result};
use crate::notify::PathNotifier;
use crate::reactive::{Memo, Signal};
use crate::tree::{Path, Record, Value};

type Storage = Arc<RwLock<IndexMap<EntityId, Record>>>;

/// Reactive collection of records keyed by id.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct EntityCollection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    path: Path,
    selector: IdSelector,
    storage: Storage,
    /// Bumped after every committed write.
    generation: Signal<u64>,
    hooks: RwLock<Hooks>,
    notifier: PathNotifier,
    max_tap_depth: usize,
    tap_depth: AtomicUsize,
    all: Memo<Vec<Record>>,
    count: Memo<usize>,
    ids: Memo<Vec<EntityId>>,
    map: Memo<IndexMap<EntityId, Record>>,
}

/// Index records by id, rejecting missing and duplicate ids.
pub(crate) fn index_records(
    collection: &Path,
    records: impl IntoIterator<Item = Record>,
    selector: &IdSelector,
    operation: &'static str,
) -> Result<IndexMap<EntityId, Record>> {
    let mut storage = IndexMap::new();
    for record in records {
        let id = selector(&record).ok_or_else(|| Error::MissingId {
            collection: collection.clone(),
            operation,
        })?;
        if storage.contains_key(&id) {
            return Err(Error::DuplicateId {
                collection: collection.clone(),
                id,
                operation,
            });
        }
        storage.insert(id, record);
    }
    Ok(storage)
}

/// Parse the plain-data form of a collection: a list of records.
pub(crate) fn parse_entities(
    collection: &Path,
    value: &Value,
    selector: &IdSelector,
    operation: &'static str,
) -> Result<IndexMap<EntityId, Record>> {
    let Value::List(items) = value else {
        return Err(Error::InvalidEntity {
            collection: collection.clone(),
            reason: format!("expected a list of records, found {}", value.type_name()),
        });
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Record(record) => records.push(record.clone()),
            other => {
                return Err(Error::InvalidEntity {
                    collection: collection.clone(),
                    reason: format!("expected a record, found {}", other.type_name()),
                })
            }
        }
    }
    index_records(collection, records, selector, operation)
}

/// Decrements the tap depth when dispatch ends, panics included.
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn view<T, F>(storage: &Storage, generation: &Signal<u64>, read: F) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(&IndexMap<EntityId, Record>) -> T + Send + Sync + 'static,
{
    let storage = storage.clone();
    let generation = generation.clone();
    Memo::new(move || {
        generation.get();
        read(&*storage.read())
    })
}

impl EntityCollection {
    pub(crate) fn new(
        path: Path,
        selector: IdSelector,
        entities: IndexMap<EntityId, Record>,
        notifier: PathNotifier,
        max_tap_depth: usize,
    ) -> Self {
        let storage: Storage = Arc::new(RwLock::new(entities));
        let generation = Signal::new(0u64);

        let all = view(&storage, &generation, |s| s.values().cloned().collect());
        let count = view(&storage, &generation, |s| s.len());
        let ids = view(&storage, &generation, |s| s.keys().cloned().collect());
        let map = view(&storage, &generation, |s| s.clone());

        Self {
            inner: Arc::new(CollectionInner {
                path,
                selector,
                storage,
                generation,
                hooks: RwLock::new(Hooks::default()),
                notifier,
                max_tap_depth,
                tap_depth: AtomicUsize::new(0),
                all,
                count,
                ids,
                map,
            }),
        }
    }

    /// Path of the collection in its tree.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Path an entity publishes its changes at.
    pub fn entity_path(&self, id: &EntityId) -> Path {
        self.inner.path.child(id.to_segment())
    }

    /// Compute the id of a record with this collection's selector.
    pub fn select_id(&self, entity: &Record) -> Option<EntityId> {
        (self.inner.selector)(entity)
    }

    fn require_id(&self, entity: &Record, operation: &'static str) -> Result<EntityId> {
        self.select_id(entity).ok_or_else(|| Error::MissingId {
            collection: self.inner.path.clone(),
            operation,
        })
    }

    fn not_found(&self, id: EntityId, operation: &'static str) -> Error {
        Error::NotFound {
            collection: self.inner.path.clone(),
            id,
            operation,
        }
    }

    fn blocked(&self, id: EntityId, operation: &'static str, reason: Option<String>) -> Error {
        tracing::warn!(
            collection = %self.inner.path,
            id = %id,
            operation,
            reason = reason.as_deref().unwrap_or(""),
            "mutation blocked"
        );
        Error::Blocked {
            collection: self.inner.path.clone(),
            id,
            operation,
            reason,
        }
    }

    /// Invalidate the views after a committed write.
    fn bump(&self) {
        self.inner.generation.update(|g| g.wrapping_add(1));
    }

    fn run_taps(&self, dispatch: impl FnOnce()) {
        let depth = self.inner.tap_depth.fetch_add(1, Ordering::SeqCst);
        let _guard = DepthGuard(&self.inner.tap_depth);
        if depth >= self.inner.max_tap_depth {
            tracing::warn!(
                collection = %self.inner.path,
                depth,
                "tap recursion limit reached, skipping taps"
            );
            return;
        }
        dispatch();
    }

    // ------------------------------------------------------------------
    // Single-entity mutations
    // ------------------------------------------------------------------

    /// Add an entity. Fails if its id is already present.
    pub fn add_one(&self, entity: Record) -> Result<EntityId> {
        const OP: &str = "add_one";
        let id = self.require_id(&entity, OP)?;
        if self.contains(&id) {
            return Err(Error::DuplicateId {
                collection: self.inner.path.clone(),
                id,
                operation: OP,
            });
        }

        let intercepts = self.inner.hooks.read().add_intercepts.handlers();
        let entity = match resolve(intercepts.iter().map(|h| h(&entity))) {
            Outcome::Blocked(reason) => return Err(self.blocked(id, OP, reason)),
            Outcome::Proceed(Some(transformed)) => transformed,
            Outcome::Proceed(None) => entity,
        };

        // A transform may rewrite the id.
        let id = self.require_id(&entity, OP)?;
        {
            let mut storage = self.inner.storage.write();
            if storage.contains_key(&id) {
                return Err(Error::DuplicateId {
                    collection: self.inner.path.clone(),
                    id,
                    operation: OP,
                });
            }
            storage.insert(id.clone(), entity.clone());
        }
        self.bump();

        tracing::debug!(collection = %self.inner.path, id = %id, "entity added");
        self.inner.notifier.notify(
            self.entity_path(&id),
            Some(Value::Record(entity.clone())),
            None,
        );

        let taps = self.inner.hooks.read().add_taps.handlers();
        self.run_taps(|| {
            for tap in &taps {
                tap(&id, &entity);
            }
        });
        Ok(id)
    }

    /// Shallow-merge `changes` into an existing entity.
    ///
    /// The entity keeps its key even if the merge rewrites its id field.
    /// A merge that changes nothing commits nothing.
    pub fn update_one(&self, id: impl Into<EntityId>, changes: Record) -> Result<()> {
        const OP: &str = "update_one";
        let id = id.into();
        let Some(current) = self.get(&id) else {
            return Err(self.not_found(id, OP));
        };

        let intercepts = self.inner.hooks.read().update_intercepts.handlers();
        let changes = match resolve(intercepts.iter().map(|h| h(&id, &changes, &current))) {
            Outcome::Blocked(reason) => return Err(self.blocked(id, OP, reason)),
            Outcome::Proceed(Some(transformed)) => transformed,
            Outcome::Proceed(None) => changes,
        };

        let mut merged = current.clone();
        for (key, value) in changes {
            merged.insert(key, value);
        }
        if merged == current {
            return Ok(());
        }

        {
            let mut storage = self.inner.storage.write();
            match storage.get_mut(&id) {
                Some(slot) => *slot = merged.clone(),
                None => return Err(self.not_found(id, OP)),
            }
        }
        self.bump();

        tracing::debug!(collection = %self.inner.path, id = %id, "entity updated");
        self.inner.notifier.notify(
            self.entity_path(&id),
            Some(Value::Record(merged.clone())),
            Some(Value::Record(current.clone())),
        );

        let taps = self.inner.hooks.read().update_taps.handlers();
        self.run_taps(|| {
            for tap in &taps {
                tap(&id, &merged, &current);
            }
        });
        Ok(())
    }

    /// Remove an entity, returning it.
    pub fn remove_one(&self, id: impl Into<EntityId>) -> Result<Record> {
        const OP: &str = "remove_one";
        let id = id.into();
        let Some(current) = self.get(&id) else {
            return Err(self.not_found(id, OP));
        };

        let intercepts = self.inner.hooks.read().remove_intercepts.handlers();
        if let Outcome::Blocked(reason) = resolve(intercepts.iter().map(|h| h(&id, &current))) {
            return Err(self.blocked(id, OP, reason));
        }

        let removed = self.inner.storage.write().shift_remove(&id);
        let Some(removed) = removed else {
            return Err(self.not_found(id, OP));
        };
        self.bump();

        tracing::debug!(collection = %self.inner.path, id = %id, "entity removed");
        self.inner.notifier.notify(
            self.entity_path(&id),
            None,
            Some(Value::Record(removed.clone())),
        );

        let taps = self.inner.hooks.read().remove_taps.handlers();
        self.run_taps(|| {
            for tap in &taps {
                tap(&id, &removed);
            }
        });
        Ok(removed)
    }

    /// Update the entity if its id exists, add it otherwise.
    pub fn upsert_one(&self, entity: Record) -> Result<EntityId> {
        let id = self.require_id(&entity, "upsert_one")?;
        if self.contains(&id) {
            self.update_one(&id, entity)?;
            Ok(id)
        } else {
            self.add_one(entity)
        }
    }

    // ------------------------------------------------------------------
    // Batch mutations
    // ------------------------------------------------------------------

    /// Add entities in order. Stops at the first failure.
    pub fn add_many(&self, entities: impl IntoIterator<Item = Record>) -> Result<Vec<EntityId>> {
        entities
            .into_iter()
            .map(|entity| self.add_one(entity))
            .collect()
    }

    /// Apply `(id, changes)` pairs in order. Stops at the first failure.
    pub fn update_many<I>(&self, updates: impl IntoIterator<Item = (I, Record)>) -> Result<()>
    where
        I: Into<EntityId>,
    {
        for (id, changes) in updates {
            self.update_one(id, changes)?;
        }
        Ok(())
    }

    /// Remove ids in order. Stops at the first failure.
    pub fn remove_many<I>(&self, ids: impl IntoIterator<Item = I>) -> Result<Vec<Record>>
    where
        I: Into<EntityId>,
    {
        ids.into_iter().map(|id| self.remove_one(id)).collect()
    }

    /// Merge `changes` into every entity matching `predicate`, in storage
    /// order. Returns how many entities matched.
    pub fn update_where<P>(&self, predicate: P, changes: Record) -> Result<usize>
    where
        P: Fn(&Record) -> bool,
    {
        let matched = self.matching_ids(predicate);
        for id in &matched {
            self.update_one(id, changes.clone())?;
        }
        Ok(matched.len())
    }

    /// Remove every entity matching `predicate`, in storage order.
    pub fn remove_where<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&Record) -> bool,
    {
        let matched = self.matching_ids(predicate);
        for id in &matched {
            self.remove_one(id)?;
        }
        Ok(matched.len())
    }

    fn matching_ids<P>(&self, predicate: P) -> Vec<EntityId>
    where
        P: Fn(&Record) -> bool,
    {
        // Predicates are caller code: run them without the storage lock.
        let entities: Vec<(EntityId, Record)> = self
            .inner
            .storage
            .read()
            .iter()
            .map(|(id, entity)| (id.clone(), entity.clone()))
            .collect();
        entities
            .into_iter()
            .filter(|(_, entity)| predicate(entity))
            .map(|(id, _)| id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Wholesale replacement
    // ------------------------------------------------------------------

    /// Replace every entity. Duplicate or missing ids fail before anything
    /// changes.
    pub fn set_all(&self, entities: impl IntoIterator<Item = Record>) -> Result<()> {
        let storage = index_records(&self.inner.path, entities, &self.inner.selector, "set_all")?;
        self.replace_storage(storage);
        Ok(())
    }

    /// Remove every entity.
    pub fn clear(&self) {
        self.replace_storage(IndexMap::new());
    }

    /// Swap in already validated storage and publish once at the
    /// collection path.
    pub(crate) fn replace_storage(&self, storage: IndexMap<EntityId, Record>) {
        let previous = {
            let mut current = self.inner.storage.write();
            if *current == storage && current.keys().eq(storage.keys()) {
                return;
            }
            std::mem::replace(&mut *current, storage)
        };
        self.bump();

        let value = self.value_untracked();
        tracing::debug!(
            collection = %self.inner.path,
            count = self.len(),
            "collection replaced"
        );
        self.inner.notifier.notify(
            self.inner.path.clone(),
            Some(value),
            Some(Value::List(previous.into_values().map(Value::Record).collect())),
        );
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    pub fn intercept_add<F>(&self, handler: F) -> HookId
    where
        F: Fn(&Record) -> Verdict<Record> + Send + Sync + 'static,
    {
        self.inner.hooks.write().add_intercepts.push(Arc::new(handler))
    }

    pub fn intercept_update<F>(&self, handler: F) -> HookId
    where
        F: Fn(&EntityId, &Record, &Record) -> Verdict<Record> + Send + Sync + 'static,
    {
        self.inner.hooks.write().update_intercepts.push(Arc::new(handler))
    }

    pub fn intercept_remove<F>(&self, handler: F) -> HookId
    where
        F: Fn(&EntityId, &Record) -> Verdict<()> + Send + Sync + 'static,
    {
        self.inner.hooks.write().remove_intercepts.push(Arc::new(handler))
    }

    pub fn tap_add<F>(&self, handler: F) -> HookId
    where
        F: Fn(&EntityId, &Record) + Send + Sync + 'static,
    {
        self.inner.hooks.write().add_taps.push(Arc::new(handler))
    }

    pub fn tap_update<F>(&self, handler: F) -> HookId
    where
        F: Fn(&EntityId, &Record, &Record) + Send + Sync + 'static,
    {
        self.inner.hooks.write().update_taps.push(Arc::new(handler))
    }

    pub fn tap_remove<F>(&self, handler: F) -> HookId
    where
        F: Fn(&EntityId, &Record) + Send + Sync + 'static,
    {
        self.inner.hooks.write().remove_taps.push(Arc::new(handler))
    }

    /// Unregister a hook. Returns false if it was not registered here.
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.write().remove(id)
    }

    /// Number of registered hooks of every kind.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.read().len()
    }

    // ------------------------------------------------------------------
    // Reactive views
    // ------------------------------------------------------------------

    /// All entities in storage order.
    pub fn all(&self) -> Memo<Vec<Record>> {
        self.inner.all.clone()
    }

    pub fn count(&self) -> Memo<usize> {
        self.inner.count.clone()
    }

    pub fn ids(&self) -> Memo<Vec<EntityId>> {
        self.inner.ids.clone()
    }

    pub fn map(&self) -> Memo<IndexMap<EntityId, Record>> {
        self.inner.map.clone()
    }

    /// The entity with `id`, or `None` while it is absent.
    pub fn by_id(&self, id: impl Into<EntityId>) -> Memo<Option<Record>> {
        let id = id.into();
        view(&self.inner.storage, &self.inner.generation, move |s| {
            s.get(&id).cloned()
        })
    }

    /// Entities matching `predicate`, in storage order.
    pub fn where_<P>(&self, predicate: P) -> Memo<Vec<Record>>
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        let storage = self.inner.storage.clone();
        let generation = self.inner.generation.clone();
        Memo::new(move || {
            generation.get();
            let entities: Vec<Record> = storage.read().values().cloned().collect();
            entities.into_iter().filter(|e| predicate(e)).collect()
        })
    }

    /// First entity matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Memo<Option<Record>>
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        let storage = self.inner.storage.clone();
        let generation = self.inner.generation.clone();
        Memo::new(move || {
            generation.get();
            let entities: Vec<Record> = storage.read().values().cloned().collect();
            entities.into_iter().find(|e| predicate(e))
        })
    }

    // ------------------------------------------------------------------
    // Plain reads
    // ------------------------------------------------------------------

    pub fn get(&self, id: &EntityId) -> Option<Record> {
        self.inner.storage.read().get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.inner.storage.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.storage.read().is_empty()
    }

    /// Number of committed writes so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get_untracked()
    }

    /// Plain-data form, tracked when read inside a reactive context.
    pub fn value(&self) -> Value {
        self.inner.generation.get();
        self.value_untracked()
    }

    pub fn value_untracked(&self) -> Value {
        Value::List(
            self.inner
                .storage
                .read()
                .values()
                .cloned()
                .map(Value::Record)
                .collect(),
        )
    }

    /// Whether two handles point at the same collection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollection")
            .field("path", &self.inner.path)
            .field("len", &self.len())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::default_selector;
    use crate::notify::{Change, PathPattern};
    use crate::record;
    use crate::reactive::Effect;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;

    fn users() -> EntityCollection {
        let (notifier, _scheduler) = PathNotifier::manual();
        notifier.set_batching_enabled(false);
        EntityCollection::new(
            Path::parse("users").unwrap(),
            default_selector(),
            IndexMap::new(),
            notifier,
            2,
        )
    }

    fn user(id: i64, name: &str) -> Record {
        record! { "id" => id, "name" => name }
    }

    #[test]
    fn add_and_read_back() {
        let users = users();
        let id = users.add_one(user(1, "Ada")).unwrap();
        assert_eq!(id, EntityId::from(1));
        assert_eq!(users.by_id(1).get(), Some(user(1, "Ada")));
        assert_eq!(users.count().get(), 1);
        assert_eq!(users.ids().get(), vec![EntityId::from(1)]);
    }

    #[test]
    fn duplicate_add_fails_without_change() {
        let users = users();
        users.add_one(user(1, "Ada")).unwrap();
        let generation = users.generation();

        let err = users.add_one(user(1, "Other")).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(users.count().get(), 1);
        assert_eq!(users.generation(), generation);
        assert_eq!(users.get(&EntityId::from(1)), Some(user(1, "Ada")));
    }

    #[test]
    fn missing_id_is_rejected() {
        let users = users();
        let err = users.add_one(record! { "name" => "anon" }).unwrap_err();
        assert!(matches!(err, Error::MissingId { operation: "add_one", .. }));
    }

    #[test]
    fn update_merges_shallowly() {
        let users = users();
        users
            .add_one(record! { "id" => 1, "name" => "Ada", "role" => "admin" })
            .unwrap();
        users.update_one(1, record! { "name" => "Grace" }).unwrap();
        assert_eq!(
            users.get(&EntityId::from(1)),
            Some(record! { "id" => 1, "name" => "Grace", "role" => "admin" })
        );
    }

    #[test]
    fn update_and_remove_missing_fail() {
        let users = users();
        assert!(users.update_one(9, record! {}).unwrap_err().is_not_found());
        assert!(users.remove_one(9).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_returns_entity() {
        let users = users();
        users.add_one(user(1, "Ada")).unwrap();
        let by_id = users.by_id(1);
        assert!(by_id.get().is_some());

        let removed = users.remove_one(1).unwrap();
        assert_eq!(removed, user(1, "Ada"));
        assert_eq!(by_id.get(), None);
        assert!(users.is_empty());
    }

    #[test]
    fn upsert_adds_then_updates() {
        let users = users();
        users.upsert_one(user(1, "Ada")).unwrap();
        users.upsert_one(user(1, "Grace")).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users.get(&EntityId::from(1)), Some(user(1, "Grace")));
    }

    #[test]
    fn intercept_blocks_update() {
        let users = users();
        users.add_one(user(1, "Ada")).unwrap();
        users.intercept_update(|_, changes, _| match changes.get("name") {
            Some(Value::Text(name)) if name.is_empty() => Verdict::block("name required"),
            _ => Verdict::Allow,
        });

        let err = users.update_one(1, record! { "name" => "" }).unwrap_err();
        assert!(err.is_blocked());
        assert_eq!(err.block_reason(), Some("name required"));
        assert_eq!(users.get(&EntityId::from(1)), Some(user(1, "Ada")));
    }

    #[test]
    fn intercept_transforms_add() {
        let users = users();
        users.intercept_add(|entity| {
            let mut entity = entity.clone();
            entity.insert("active".into(), Value::Bool(true));
            Verdict::Transform(entity)
        });
        users.add_one(user(1, "Ada")).unwrap();
        assert_eq!(
            users.get(&EntityId::from(1)).and_then(|e| e.get("active").cloned()),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn intercept_blocks_remove() {
        let users = users();
        users.add_one(user(1, "Ada")).unwrap();
        let hook = users.intercept_remove(|_, _| Verdict::Block(None));

        let err = users.remove_one(1).unwrap_err();
        assert!(err.is_blocked());
        assert_eq!(err.block_reason(), None);
        assert_eq!(users.len(), 1);

        assert!(users.remove_hook(hook));
        users.remove_one(1).unwrap();
        assert!(users.is_empty());
    }

    #[test]
    fn taps_observe_committed_mutations() {
        let users = users();
        let log = Arc::new(Mutex::new(Vec::new()));

        let added = log.clone();
        users.tap_add(move |id, _| added.lock().push(format!("add {id}")));
        let updated = log.clone();
        users.tap_update(move |id, new, old| {
            updated
                .lock()
                .push(format!("update {id} {:?}->{:?}", old["name"], new["name"]))
        });
        let removed = log.clone();
        users.tap_remove(move |id, _| removed.lock().push(format!("remove {id}")));

        users.add_one(user(1, "a")).unwrap();
        users.update_one(1, record! { "name" => "b" }).unwrap();
        users.remove_one(1).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "add 1".to_string(),
                "update 1 Text(\"a\")->Text(\"b\")".to_string(),
                "remove 1".to_string(),
            ]
        );
    }

    #[test]
    fn recursive_taps_are_capped() {
        let users = users();
        let calls = Arc::new(AtomicI32::new(0));

        let handle = users.clone();
        let counter = calls.clone();
        users.tap_add(move |id, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let EntityId::Num(n) = id {
                let _ = handle.add_one(user(n + 1, "child"));
            }
        });

        users.add_one(user(0, "root")).unwrap();
        // Depth 2: the first two taps run, the third add commits silently.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn batches_are_not_atomic() {
        let users = users();
        users.add_one(user(2, "existing")).unwrap();

        let err = users
            .add_many(vec![user(1, "a"), user(2, "dup"), user(3, "c")])
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(err.entity_id(), Some(&EntityId::from(2)));
        assert_eq!(users.ids().get(), vec![EntityId::from(2), EntityId::from(1)]);
    }

    #[test]
    fn predicate_batches() {
        let users = users();
        users
            .add_many(vec![user(1, "a"), user(2, "b"), user(3, "a")])
            .unwrap();

        let updated = users
            .update_where(|e| e["name"] == Value::from("a"), record! { "flag" => true })
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(users.where_(|e| e.contains_key("flag")).get().len(), 2);

        let removed = users.remove_where(|e| e.contains_key("flag")).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(users.ids().get(), vec![EntityId::from(2)]);
        assert_eq!(users.find(|e| e["name"] == Value::from("b")).get(), Some(user(2, "b")));
    }

    #[test]
    fn set_all_rejects_duplicates_without_change() {
        let users = users();
        users.add_one(user(1, "a")).unwrap();

        let err = users.set_all(vec![user(5, "x"), user(5, "y")]).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(users.ids().get(), vec![EntityId::from(1)]);

        users.set_all(vec![user(5, "x"), user(6, "y")]).unwrap();
        assert_eq!(users.ids().get(), vec![EntityId::from(5), EntityId::from(6)]);

        users.clear();
        assert_eq!(users.count().get(), 0);
    }

    #[test]
    fn publishes_at_entity_and_collection_paths() {
        let users = users();
        let seen: Arc<Mutex<Vec<Change>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = users
            .inner
            .notifier
            .subscribe(PathPattern::parse("users.**").unwrap(), move |c| {
                sink.lock().push(c.clone())
            });
        let whole = seen.clone();
        let _whole = users
            .inner
            .notifier
            .subscribe(PathPattern::parse("users").unwrap(), move |c| {
                whole.lock().push(c.clone())
            });

        users.add_one(user(1, "a")).unwrap();
        users.remove_one(1).unwrap();
        users.set_all(vec![user(2, "b")]).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].path.to_string(), "users.1");
        assert_eq!(seen[0].previous, None);
        assert_eq!(seen[1].value, None);
        assert_eq!(seen[1].previous, Some(Value::Record(user(1, "a"))));
        assert_eq!(seen[2].path.to_string(), "users");
    }

    #[test]
    fn views_drive_effects() {
        let users = users();
        let count = users.count();
        let observed = Arc::new(AtomicI32::new(-1));

        let sink = observed.clone();
        let _effect = Effect::new(move || {
            sink.store(count.get() as i32, Ordering::SeqCst);
        });
        assert_eq!(observed.load(Ordering::SeqCst), 0);

        users.add_one(user(1, "a")).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        users.add_one(user(2, "b")).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parse_rejects_non_record_items() {
        let path = Path::parse("users").unwrap();
        let selector = default_selector();
        let err = parse_entities(&path, &Value::List(vec![Value::Int(1)]), &selector, "build")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntity { .. }));
        assert!(parse_entities(&path, &Value::Int(1), &selector, "build").is_err());
    }

    #[test]
    fn numeric_and_text_ids_publish_separately() {
        let (notifier, scheduler) = PathNotifier::manual();
        let users = EntityCollection::new(
            Path::parse("users").unwrap(),
            default_selector(),
            IndexMap::new(),
            notifier.clone(),
            2,
        );
        let seen: Arc<Mutex<Vec<Change>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = notifier.subscribe(PathPattern::parse("users.*").unwrap(), move |c| {
            sink.lock().push(c.clone())
        });

        users.add_one(record! { "id" => 3, "name" => "num" }).unwrap();
        users.add_one(record! { "id" => "3", "name" => "text" }).unwrap();
        scheduler.run_pending();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].path, users.entity_path(&EntityId::from(3)));
        assert_eq!(seen[1].path, users.entity_path(&EntityId::from("3")));
        assert_ne!(seen[0].path, seen[1].path);
    }
}
