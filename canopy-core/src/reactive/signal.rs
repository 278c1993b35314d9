//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: the reactive cell every
//! leaf of a state tree is stored in. It holds a value and tracks which
//! computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a dependent.
//!
//! 2. When a signal is written with a value its equality function considers
//!    different, callback subscribers are notified and dependents are
//!    invalidated, synchronously.
//!
//! 3. Writing an equal value is a no-op: nothing is notified.
//!
//! # Thread Safety
//!
//! Signals are `Send + Sync`. The value sits behind a `parking_lot` lock and
//! no lock is held while subscribers or dependents run, so a callback may
//! read or write the signal that notified it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::subscriber::{propagate, Dependents, Subscriber, SubscriberId};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Equality function deciding whether a write is a change.
pub type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use canopy_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: u64,

    /// The current value.
    value: Arc<RwLock<T>>,

    /// Decides whether a write changes the value.
    equals: Equality<T>,

    /// Memos and effects that read this signal.
    dependents: Arc<Mutex<Dependents>>,

    /// Plain callbacks registered through [`Signal::subscribe`].
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new signal compared with `==`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with a custom equality function.
    pub fn with_equality(value: T, equals: Equality<T>) -> Self {
        Self {
            id: next_signal_id(),
            value: Arc::new(RwLock::new(value)),
            equals,
            dependents: Arc::new(Mutex::new(Dependents::default())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        if let Some((subscriber_id, reactive)) = ReactiveContext::current() {
            ReactiveContext::record_read(self.id);
            self.dependents.lock().insert(subscriber_id, reactive);
        }

        self.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value without cloning it or tracking.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Set a new value and notify subscribers if it differs.
    pub fn set(&self, value: T) {
        self.replace(value);
    }

    /// Set a new value, returning the previous one if the write was a change.
    ///
    /// Returns `None` when the equality function considers the values equal;
    /// in that case nothing is written and nobody is notified.
    pub fn replace(&self, value: T) -> Option<T> {
        let previous = {
            let mut guard = self.value.write();
            if (self.equals)(&*guard, &value) {
                return None;
            }
            std::mem::replace(&mut *guard, value)
        };

        self.notify();
        Some(previous)
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&*guard)
        };
        self.set(new_value);
    }

    /// Register a notification callback for a subscriber.
    ///
    /// The callback will be invoked when the signal's value changes.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, notify: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .push(Subscriber::with_id(subscriber_id, notify));
    }

    /// Remove a subscriber, callback or tracked dependent.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.subscribers
            .write()
            .retain(|subscriber| subscriber.id() != subscriber_id);
        self.dependents.lock().remove(subscriber_id);
    }

    /// Notify callbacks, then invalidate dependents.
    fn notify(&self) {
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber.notify();
        }

        let dependents = self.dependents.lock().collect_live();
        propagate(dependents);
    }

    /// Get the number of subscribers and tracked dependents.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len() + self.dependents.lock().len()
    }

    /// Whether two handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            equals: Arc::clone(&self.equals),
            dependents: Arc::clone(&self.dependents),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
