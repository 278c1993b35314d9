//! Path Notifier
//!
//! The central publish/subscribe bus of a tree. Every mutation site (cell
//! writes, structural replacements, collection operations) publishes a
//! [`Change`]; subscribers register for a [`PathPattern`] and hear about
//! matching changes when the notifier flushes.
//!
//! # Batching
//!
//! With batching enabled (the default), the first publish after a flush
//! hands exactly one flush task to the [`FlushScheduler`]. Later publishes
//! before that task runs are coalesced into it: one entry per path, in
//! first-touch order, with the newest value and the value the path had
//! before the first publish of the cycle.
//!
//! A flush delivers each pending change to every matching subscriber, then
//! runs the flush handlers, in registration order. Changes published while a
//! flush is running belong to the next flush.
//!
//! With batching disabled, every publish flushes synchronously.
//!
//! # Failure isolation
//!
//! A panicking handler is caught and logged with `tracing::error!`; the
//! remaining handlers still run and the pending bookkeeping is untouched,
//! since the flush took ownership of its changes before running anything.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::pattern::PathPattern;
use super::scheduler::{FlushScheduler, ManualScheduler};
use crate::tree::{Path, Value};

/// One published change.
///
/// `None` means "absent": `value` is `None` for removals and `previous` is
/// `None` for additions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub path: Path,
    pub value: Option<Value>,
    pub previous: Option<Value>,
}

type ChangeHandler = Arc<dyn Fn(&Change) + Send + Sync>;
type FlushHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct PatternEntry {
    id: u64,
    pattern: PathPattern,
    active: Arc<AtomicBool>,
    handler: ChangeHandler,
}

#[derive(Clone)]
struct FlushEntry {
    id: u64,
    active: Arc<AtomicBool>,
    handler: FlushHandler,
}

struct PendingState {
    pending: IndexMap<Path, Change>,
    /// A flush task has been handed to the scheduler and not run yet.
    scheduled: bool,
    batching: bool,
}

struct NotifierInner {
    state: Mutex<PendingState>,
    subscribers: RwLock<Vec<PatternEntry>>,
    flush_handlers: RwLock<Vec<FlushEntry>>,
    scheduler: Arc<dyn FlushScheduler>,
    next_id: AtomicU64,
    flush_count: AtomicU64,
}

/// Batched, path-addressed change bus. Cloning yields another handle to the
/// same bus.
#[derive(Clone)]
pub struct PathNotifier {
    inner: Arc<NotifierInner>,
}

impl PathNotifier {
    /// Create a notifier deferring flushes to `scheduler`.
    pub fn new(scheduler: Arc<dyn FlushScheduler>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                state: Mutex::new(PendingState {
                    pending: IndexMap::new(),
                    scheduled: false,
                    batching: true,
                }),
                subscribers: RwLock::new(Vec::new()),
                flush_handlers: RwLock::new(Vec::new()),
                scheduler,
                next_id: AtomicU64::new(0),
                flush_count: AtomicU64::new(0),
            }),
        }
    }

    /// Create a notifier with its own [`ManualScheduler`].
    pub fn manual() -> (Self, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        (Self::new(scheduler.clone()), scheduler)
    }

    /// Record a change at `path`.
    pub fn notify(&self, path: Path, value: Option<Value>, previous: Option<Value>) {
        tracing::trace!(path = %path, "notify");

        let (schedule, flush_now) = {
            let mut state = self.inner.state.lock();
            match state.pending.get_mut(&path) {
                Some(existing) => existing.value = value,
                None => {
                    state.pending.insert(
                        path.clone(),
                        Change {
                            path,
                            value,
                            previous,
                        },
                    );
                }
            }

            if !state.batching {
                (false, true)
            } else if !state.scheduled {
                state.scheduled = true;
                (true, false)
            } else {
                (false, false)
            }
        };

        if flush_now {
            self.flush_sync();
        } else if schedule {
            let weak: Weak<NotifierInner> = Arc::downgrade(&self.inner);
            self.inner.scheduler.schedule(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    PathNotifier { inner }.run_scheduled();
                }
            }));
        }
    }

    /// Entry point of a scheduled flush task.
    fn run_scheduled(&self) {
        // A flush_sync in the meantime already delivered everything.
        if !self.inner.state.lock().scheduled {
            return;
        }
        self.flush_sync();
    }

    /// Deliver everything pending now, bypassing the scheduler.
    ///
    /// Returns the number of changes delivered. Does nothing when nothing is
    /// pending.
    pub fn flush_sync(&self) -> usize {
        let changes: Vec<Change> = {
            let mut state = self.inner.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.pending).into_values().collect()
        };
        if changes.is_empty() {
            return 0;
        }

        let subscribers = self.inner.subscribers.read().clone();
        for change in &changes {
            for entry in &subscribers {
                if entry.active.load(Ordering::SeqCst) && entry.pattern.matches(&change.path) {
                    isolate("subscriber", &entry.pattern.to_string(), || {
                        (entry.handler)(change)
                    });
                }
            }
        }

        let flush_handlers = self.inner.flush_handlers.read().clone();
        for entry in &flush_handlers {
            if entry.active.load(Ordering::SeqCst) {
                isolate("flush handler", "", || (entry.handler)());
            }
        }

        self.inner.flush_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(changes = changes.len(), "flushed");
        changes.len()
    }

    /// Subscribe to changes matching `pattern`.
    ///
    /// The handler runs once per matching path per flush.
    pub fn subscribe<F>(&self, pattern: PathPattern, handler: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let active = Arc::new(AtomicBool::new(true));
        self.inner.subscribers.write().push(PatternEntry {
            id,
            pattern,
            active: active.clone(),
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            kind: SubscriptionKind::Pattern,
            active,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    /// Register a callback that runs at the end of every flush.
    pub fn on_flush<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        let active = Arc::new(AtomicBool::new(true));
        self.inner.flush_handlers.write().push(FlushEntry {
            id,
            active: active.clone(),
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            kind: SubscriptionKind::Flush,
            active,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    /// Turn batching on or off. Turning it off delivers anything pending.
    pub fn set_batching_enabled(&self, enabled: bool) {
        let had_pending = {
            let mut state = self.inner.state.lock();
            state.batching = enabled;
            !state.pending.is_empty()
        };
        if !enabled && had_pending {
            self.flush_sync();
        }
    }

    pub fn batching_enabled(&self) -> bool {
        self.inner.state.lock().batching
    }

    /// Number of distinct paths waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of flushes that delivered at least one change.
    pub fn flush_count(&self) -> u64 {
        self.inner.flush_count.load(Ordering::Relaxed)
    }

    /// Number of live pattern subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PathNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathNotifier")
            .field("pending", &self.pending_count())
            .field("subscribers", &self.subscriber_count())
            .field("flushes", &self.flush_count())
            .finish()
    }
}

fn isolate(kind: &str, pattern: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(kind, pattern, message = %message, "notification handler panicked");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionKind {
    Pattern,
    Flush,
}

/// Handle returned by [`PathNotifier::subscribe`] and
/// [`PathNotifier::on_flush`].
///
/// Dropping it unsubscribes. Use [`Subscription::detach`] to keep the
/// handler for the notifier's lifetime.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: u64,
    kind: SubscriptionKind,
    active: Arc<AtomicBool>,
    notifier: Weak<NotifierInner>,
}

impl Subscription {
    /// Stop receiving notifications, including in a flush already running.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the handler registered after this handle is dropped.
    pub fn detach(mut self) {
        self.notifier = Weak::new();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.notifier.upgrade() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        match self.kind {
            SubscriptionKind::Pattern => inner.subscribers.write().retain(|e| e.id != self.id),
            SubscriptionKind::Flush => inner.flush_handlers.write().retain(|e| e.id != self.id),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}
