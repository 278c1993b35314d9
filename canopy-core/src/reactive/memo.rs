//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change. Entity collection query views are memos.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked "maybe dirty" and the
//!    invalidation is forwarded to whatever read the memo.
//!
//! 4. On next access, the memo recomputes.
//!
//! # Why This Matters
//!
//! A write to a cell with ten memos reading it costs ten flag flips. Only
//! the memos that are read again pay for a recomputation.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::subscriber::{propagate, Dependents, Reactive, SubscriberId};

/// Counter for generating unique memo IDs.
static MEMO_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique memo ID.
fn next_memo_id() -> u64 {
    MEMO_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound lets the memo tell whether a recomputation
/// actually produced a new value.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
}

struct MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Unique identifier for this memo.
    id: u64,

    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The computation function.
    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,

    /// Current dirty state.
    state: RwLock<MemoState>,

    /// Signal IDs read during the last computation.
    dependencies: RwLock<HashSet<u64>>,

    /// Computations that read this memo.
    dependents: Mutex<Dependents>,

    /// Number of times the computation ran.
    computations: AtomicU64,
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        {
            let mut state = self.state.write();
            if *state == MemoState::Clean {
                *state = MemoState::MaybeDirty;
            }
        }
        let dependents = self.dependents.lock().collect_live();
        propagate(dependents);
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MemoInner {
                id: next_memo_id(),
                subscriber_id: SubscriberId::new(),
                compute: Box::new(compute),
                value: RwLock::new(None),
                state: RwLock::new(MemoState::Dirty),
                dependencies: RwLock::new(HashSet::new()),
                dependents: Mutex::new(Dependents::default()),
                computations: AtomicU64::new(0),
            }),
        }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        if let Some((subscriber_id, reactive)) = ReactiveContext::current() {
            self.inner.dependents.lock().insert(subscriber_id, reactive);
        }

        if *self.inner.state.read() == MemoState::Clean {
            if let Some(value) = self.inner.value.read().as_ref() {
                return value.clone();
            }
        }
        self.recompute()
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.write() = MemoState::Dirty;
        let dependents = self.inner.dependents.lock().collect_live();
        propagate(dependents);
    }

    /// Recompute the memo's value inside its own tracking context.
    fn recompute(&self) -> T {
        let new_value = {
            let reactive: Weak<dyn Reactive> = Arc::downgrade(&self.inner) as Weak<dyn Reactive>;
            let _ctx = ReactiveContext::enter(self.inner.subscriber_id, reactive);
            let value = (self.inner.compute)();
            *self.inner.dependencies.write() =
                ReactiveContext::reads().into_iter().collect();
            value
        };
        self.inner.computations.fetch_add(1, Ordering::Relaxed);

        let previous = self.inner.value.write().replace(new_value.clone());
        *self.inner.state.write() = MemoState::Clean;

        if previous.as_ref() != Some(&new_value) {
            tracing::trace!(memo = self.inner.id, "memo value changed");
        }

        new_value
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().len()
    }

    /// Get the number of signals read by the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }

    /// Number of times the computation has run.
    pub fn computations(&self) -> u64 {
        self.inner.computations.load(Ordering::Relaxed)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!memo.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        let value = memo.get();
        assert_eq!(value, 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_recomputes_when_signal_changes() {
        let signal = Signal::new(3);
        let source = signal.clone();
        let memo = Memo::new(move || source.get() * 2);

        assert_eq!(memo.get(), 6);
        assert_eq!(memo.state(), MemoState::Clean);
        assert_eq!(memo.dependency_count(), 1);

        signal.set(5);
        assert_eq!(memo.state(), MemoState::MaybeDirty);
        assert_eq!(memo.get(), 10);
        assert_eq!(memo.computations(), 2);
    }

    #[test]
    fn equal_write_keeps_memo_clean() {
        let signal = Signal::new(3);
        let source = signal.clone();
        let memo = Memo::new(move || source.get() + 1);

        assert_eq!(memo.get(), 4);
        signal.set(3);
        assert_eq!(memo.state(), MemoState::Clean);
        assert_eq!(memo.computations(), 1);
    }

    #[test]
    fn invalidation_flows_through_memo_chains() {
        let base = Signal::new(1);
        let source = base.clone();
        let doubled = Memo::new(move || source.get() * 2);
        let upstream = doubled.clone();
        let plus_ten = Memo::new(move || upstream.get() + 10);

        assert_eq!(plus_ten.get(), 12);
        assert_eq!(doubled.dependent_count(), 1);

        base.set(4);
        assert_eq!(plus_ten.state(), MemoState::MaybeDirty);
        assert_eq!(plus_ten.get(), 18);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();
        assert_eq!(memo1.id(), memo2.id());
        assert!(memo2.has_value());
        assert_eq!(memo2.get(), 42);

        memo1.mark_dirty();
        assert_eq!(memo2.state(), MemoState::Dirty);
    }

    #[test]
    fn memo_state_transitions() {
        let memo = Memo::new(|| 42);

        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);

        memo.mark_maybe_dirty();
        assert_eq!(memo.state(), MemoState::MaybeDirty);

        memo.mark_dirty();
        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);
    }
}
