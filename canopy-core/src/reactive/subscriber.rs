//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that wants to hear about changes to a reactive
//! value: derived views, effects, or plain callbacks registered on a cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a subscriber.
///
/// Each subscriber (memo, effect, or callback) gets a unique ID when
/// created. This ID is used to deduplicate dependency registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A computation that can be invalidated when something it read changes.
///
/// Memos are lazy: they are only marked and recompute on their next read.
/// Effects are eager: they are scheduled and re-run immediately.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this reactive value as potentially needing update.
    fn mark_maybe_dirty(&self);

    /// Schedule this reactive value for execution (effects only).
    fn schedule(&self);

    /// Check if this reactive value is an effect (eager) or memo (lazy).
    fn is_eager(&self) -> bool;
}

/// The computations that read a reactive source.
///
/// Held weakly: a dropped memo or effect is pruned on the next
/// notification instead of being kept alive by what it once read.
#[derive(Default)]
pub(crate) struct Dependents {
    entries: Vec<(SubscriberId, Weak<dyn Reactive>)>,
}

impl Dependents {
    /// Register a dependent. Registering the same subscriber twice is a no-op.
    pub(crate) fn insert(&mut self, id: SubscriberId, reactive: Weak<dyn Reactive>) {
        if !self.entries.iter().any(|(existing, _)| *existing == id) {
            self.entries.push((id, reactive));
        }
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) {
        self.entries.retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Upgrade every live dependent, dropping the dead ones.
    pub(crate) fn collect_live(&mut self) -> Vec<Arc<dyn Reactive>> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|(_, weak)| match weak.upgrade() {
            Some(reactive) => {
                live.push(reactive);
                true
            }
            None => false,
        });
        live
    }
}

/// Invalidate the given dependents: every one is marked, eager ones are
/// then scheduled.
///
/// Callers must not hold any lock when calling this; scheduled effects run
/// synchronously and may read the source again.
pub(crate) fn propagate(dependents: Vec<Arc<dyn Reactive>>) {
    let mut eager = Vec::new();
    for dependent in dependents {
        dependent.mark_maybe_dirty();
        if dependent.is_eager() {
            eager.push(dependent);
        }
    }
    for effect in eager {
        effect.schedule();
    }
}

/// A plain callback subscribed to a reactive value.
///
/// Subscribers are notified when the value changes.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    /// The callback to invoke when the value changes.
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_id(SubscriberId::new(), notify)
    }

    /// Create a subscriber under an existing ID.
    pub fn with_id<F>(id: SubscriberId, notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id,
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that the value it watches changed.
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32};

    struct Tracker {
        id: SubscriberId,
        dirty: AtomicBool,
        scheduled: AtomicI32,
        eager: bool,
    }

    impl Tracker {
        fn new(eager: bool) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                dirty: AtomicBool::new(false),
                scheduled: AtomicI32::new(0),
                eager,
            })
        }
    }

    impl Reactive for Tracker {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn mark_maybe_dirty(&self) {
            self.dirty.store(true, Ordering::SeqCst);
        }

        fn schedule(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn is_eager(&self) -> bool {
            self.eager
        }
    }

    fn weak_of(tracker: &Arc<Tracker>) -> Weak<dyn Reactive> {
        let weak: Weak<dyn Reactive> = Arc::downgrade(tracker) as Weak<dyn Reactive>;
        weak
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let subscriber = Subscriber::new(move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert!(!called.load(Ordering::SeqCst));
        subscriber.notify();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn dependents_deduplicate_by_id() {
        let tracker = Tracker::new(false);
        let mut dependents = Dependents::default();

        dependents.insert(tracker.id, weak_of(&tracker));
        dependents.insert(tracker.id, weak_of(&tracker));
        assert_eq!(dependents.len(), 1);

        dependents.remove(tracker.id);
        assert_eq!(dependents.len(), 0);
    }

    #[test]
    fn dead_dependents_are_pruned() {
        let kept = Tracker::new(false);
        let dropped = Tracker::new(false);
        let mut dependents = Dependents::default();
        dependents.insert(kept.id, weak_of(&kept));
        dependents.insert(dropped.id, weak_of(&dropped));

        drop(dropped);

        assert_eq!(dependents.collect_live().len(), 1);
        assert_eq!(dependents.len(), 1);
    }

    #[test]
    fn propagate_marks_all_and_schedules_eager() {
        let memo = Tracker::new(false);
        let effect = Tracker::new(true);

        propagate(vec![
            memo.clone() as Arc<dyn Reactive>,
            effect.clone() as Arc<dyn Reactive>,
        ]);

        assert!(memo.dirty.load(Ordering::SeqCst));
        assert!(effect.dirty.load(Ordering::SeqCst));
        assert_eq!(memo.scheduled.load(Ordering::SeqCst), 0);
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }
}
