//! Time Travel
//!
//! A [`TimeTravel`] keeps a bounded log of tree snapshots with a movable
//! cursor and restores the tree to any recorded entry.
//!
//! # How Recording Works
//!
//! 1. The log starts with one entry holding the tree's value at creation.
//!
//! 2. A commit snapshots the tree. A snapshot equal to the entry under the
//!    cursor records nothing. Otherwise everything after the cursor is
//!    discarded, the entry is appended, and the oldest entries are evicted
//!    past the bound.
//!
//! 3. With `auto_record`, a flush handler commits once per notifier flush,
//!    so a burst of writes coalesced into one flush becomes one entry.
//!
//! # How Restoring Works
//!
//! Undo, redo and jumps write the target snapshot back through the tree's
//! structural reconcile, so cells that survive keep their identity. The
//! writes are flushed synchronously while the manager is in the
//! [`TravelState::Restoring`] state; the auto-record handler sees that state
//! and records nothing.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::entry::HistoryEntry;
use crate::config::HistoryConfig;
use crate::notify::Subscription;
use crate::tree::{StateTree, Value};

/// What the manager is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelState {
    Idle,
    /// A commit is taking its snapshot.
    Recording,
    /// A snapshot is being written back to the tree.
    Restoring,
}

struct Log {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    max_entries: usize,
}

impl Log {
    fn seeded(entry: HistoryEntry, max_entries: usize) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(entry);
        Self {
            entries,
            cursor: 0,
            max_entries: max_entries.max(1),
        }
    }

    fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    /// Append after the cursor. Returns how many entries were evicted.
    fn push(&mut self, entry: HistoryEntry) -> usize {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(entry);

        let mut evicted = 0;
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
            evicted += 1;
        }
        self.cursor = self.entries.len() - 1;
        evicted
    }
}

struct TravelInner {
    tree: StateTree,
    config: HistoryConfig,
    log: Mutex<Log>,
    state: Mutex<TravelState>,
    next_label: Mutex<Option<String>>,
    /// The auto-record flush handler, unsubscribed when the manager drops.
    flush: Mutex<Option<Subscription>>,
}

/// Returns the manager to idle when an operation ends, panics included.
struct IdleOnDrop<'a>(&'a Mutex<TravelState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = TravelState::Idle;
    }
}

/// Snapshot-based undo/redo for one tree.
///
/// Cloning yields another handle to the same history.
///
/// # Example
///
/// ```rust
/// use canopy_core::history::TimeTravel;
/// use canopy_core::record;
/// use canopy_core::tree::{StateTree, Value};
///
/// let tree = StateTree::new(record! { "count" => 0 }).unwrap();
/// let history = TimeTravel::new(tree.clone());
///
/// tree.set("count", 1).unwrap();
/// history.commit("inc", None);
///
/// assert!(history.undo());
/// assert_eq!(tree.read("count").unwrap(), Value::Int(0));
/// assert!(history.redo());
/// assert_eq!(tree.read("count").unwrap(), Value::Int(1));
/// ```
#[derive(Clone)]
pub struct TimeTravel {
    inner: Arc<TravelInner>,
}

impl TimeTravel {
    /// Manage `tree` with default settings.
    pub fn new(tree: StateTree) -> Self {
        Self::with_config(tree, HistoryConfig::default())
    }

    pub fn with_config(tree: StateTree, config: HistoryConfig) -> Self {
        let base = HistoryEntry::new(tree.snapshot(), config.initial_label.clone(), None);
        let log = Log::seeded(base, config.max_entries);
        let auto_record = config.auto_record;

        let inner = Arc::new(TravelInner {
            tree,
            config,
            log: Mutex::new(log),
            state: Mutex::new(TravelState::Idle),
            next_label: Mutex::new(None),
            flush: Mutex::new(None),
        });

        if auto_record {
            let weak: Weak<TravelInner> = Arc::downgrade(&inner);
            let subscription = inner.tree.on_flush(move || {
                if let Some(inner) = weak.upgrade() {
                    TimeTravel { inner }.record_flush();
                }
            });
            *inner.flush.lock() = Some(subscription);
        }

        Self { inner }
    }

    pub fn tree(&self) -> &StateTree {
        &self.inner.tree
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.inner.config
    }

    pub fn state(&self) -> TravelState {
        *self.inner.state.lock()
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record the tree's current value.
    ///
    /// Returns false when nothing was recorded: the value equals the entry
    /// under the cursor, or the manager is busy restoring.
    pub fn commit(&self, label: impl Into<String>, payload: Option<Value>) -> bool {
        self.record(label.into(), payload)
    }

    /// Label the next auto-recorded entry.
    pub fn label_next(&self, label: impl Into<String>) {
        *self.inner.next_label.lock() = Some(label.into());
    }

    fn record_flush(&self) {
        if self.state() != TravelState::Idle {
            return;
        }
        let label = self
            .inner
            .next_label
            .lock()
            .take()
            .unwrap_or_else(|| self.inner.config.auto_label.clone());
        self.record(label, None);
    }

    fn record(&self, label: String, payload: Option<Value>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state != TravelState::Idle {
                tracing::trace!(state = ?*state, "commit skipped");
                return false;
            }
            *state = TravelState::Recording;
        }
        let _idle = IdleOnDrop(&self.inner.state);

        let snapshot = self.inner.tree.snapshot();
        let mut log = self.inner.log.lock();
        if log.current().is_some_and(|entry| entry.snapshot() == &snapshot) {
            tracing::trace!(label = %label, "state unchanged, nothing recorded");
            return false;
        }

        let evicted = log.push(HistoryEntry::new(snapshot, label, payload));
        tracing::debug!(
            index = log.cursor,
            len = log.entries.len(),
            evicted,
            "history recorded"
        );
        true
    }

    /// Discard every entry and start over from the tree's current value.
    pub fn reset_history(&self) {
        let base = HistoryEntry::new(
            self.inner.tree.snapshot(),
            self.inner.config.initial_label.clone(),
            None,
        );
        *self.inner.log.lock() = Log::seeded(base, self.inner.config.max_entries);
        tracing::debug!("history reset");
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Record writes still waiting for their flush, so navigation starts
    /// from the latest state instead of skipping over it.
    fn settle(&self) {
        if self.inner.config.auto_record
            && self.state() == TravelState::Idle
            && self.inner.tree.notifier().pending_count() > 0
        {
            self.inner.tree.flush_sync();
        }
    }

    /// Step back one entry. Returns false at the oldest entry.
    pub fn undo(&self) -> bool {
        self.settle();
        let target = {
            let log = self.inner.log.lock();
            match log.cursor.checked_sub(1) {
                Some(target) => target,
                None => return false,
            }
        };
        self.travel(target, "undo")
    }

    /// Step forward one entry. Returns false at the newest entry.
    pub fn redo(&self) -> bool {
        self.settle();
        let target = {
            let log = self.inner.log.lock();
            if log.cursor + 1 >= log.entries.len() {
                return false;
            }
            log.cursor + 1
        };
        self.travel(target, "redo")
    }

    /// Move to any entry. Returns false, changing nothing, when `index` is
    /// out of range.
    pub fn jump_to(&self, index: usize) -> bool {
        self.settle();
        if index >= self.len() {
            return false;
        }
        self.travel(index, "jump_to")
    }

    fn travel(&self, index: usize, operation: &'static str) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state != TravelState::Idle {
                return false;
            }
            *state = TravelState::Restoring;
        }
        let _idle = IdleOnDrop(&self.inner.state);

        let snapshot = self
            .inner
            .log
            .lock()
            .entries
            .get(index)
            .map(|entry| entry.snapshot().clone());
        let Some(snapshot) = snapshot else {
            return false;
        };

        if let Err(err) = self.inner.tree.restore(snapshot) {
            tracing::error!(operation, index, error = %err, "restore failed");
            return false;
        }
        self.inner.log.lock().cursor = index;
        self.inner.tree.flush_sync();

        tracing::debug!(operation, index, "history restored");
        true
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Copies of every entry, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.log.lock().entries.iter().cloned().collect()
    }

    /// The entry under the cursor.
    pub fn current(&self) -> Option<HistoryEntry> {
        self.inner.log.lock().current().cloned()
    }

    pub fn current_index(&self) -> usize {
        self.inner.log.lock().cursor
    }

    pub fn len(&self) -> usize {
        self.inner.log.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.log.lock().entries.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.current_index() > 0
    }

    pub fn can_redo(&self) -> bool {
        let log = self.inner.log.lock();
        log.cursor + 1 < log.entries.len()
    }
}

impl std::fmt::Debug for TimeTravel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeTravel")
            .field("len", &self.len())
            .field("current_index", &self.current_index())
            .field("state", &self.state())
            .finish()
    }
}
