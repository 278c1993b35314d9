//! Leaf cells.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::path::Path;
use super::value::Value;
use crate::notify::PathNotifier;
use crate::reactive::Signal;

/// Handle to the reactive cell behind one leaf of a tree.
///
/// A tree hands out clones of the same cell for a path until a structural
/// replacement removes it; [`Cell::ptr_eq`] tells whether two handles share
/// the underlying signal. Writes that change the value notify signal
/// dependents synchronously and publish `(path, new, previous)` to the
/// tree's notifier.
///
/// Once a replacement removes the cell from its tree the handle is
/// detached: it still reads and writes its own signal, but writes no longer
/// publish at its path, which now belongs to another node.
#[derive(Clone)]
pub struct Cell {
    path: Path,
    signal: Signal<Value>,
    notifier: PathNotifier,
    attached: Arc<AtomicBool>,
}

impl Cell {
    pub(crate) fn new(path: Path, signal: Signal<Value>, notifier: PathNotifier) -> Self {
        Self {
            path,
            signal,
            notifier,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the cell still belongs to its tree.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Read the value, tracking it inside a reactive context.
    pub fn get(&self) -> Value {
        self.signal.get()
    }

    pub fn get_untracked(&self) -> Value {
        self.signal.get_untracked()
    }

    /// Borrow the value without cloning or tracking.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.signal.with(f)
    }

    /// Write a value. Equal values (under the tree's equality function)
    /// are ignored. Detached cells update their signal only.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        if let Some(previous) = self.signal.replace(value.clone()) {
            if !self.is_attached() {
                tracing::trace!(path = %self.path, "detached cell set, not published");
                return;
            }
            tracing::trace!(path = %self.path, "cell set");
            self.notifier
                .notify(self.path.clone(), Some(value), Some(previous));
        }
    }

    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let next = self.signal.with(f);
        self.set(next);
    }

    /// The underlying signal.
    pub fn signal(&self) -> &Signal<Value> {
        &self.signal
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Cell) -> bool {
        self.signal.ptr_eq(&other.signal)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("path", &self.path)
            .field("value", &self.get_untracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Change, PathPattern};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn set_publishes_change_with_previous() {
        let (notifier, scheduler) = PathNotifier::manual();
        let seen: Arc<Mutex<Vec<Change>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = notifier.subscribe(PathPattern::All, move |c| sink.lock().push(c.clone()));

        let path = Path::parse("count").unwrap();
        let cell = Cell::new(path.clone(), Signal::new(Value::Int(0)), notifier);
        cell.set(1);
        cell.update(|v| Value::Int(v.as_i64().unwrap_or(0) + 1));
        scheduler.run_pending();

        assert_eq!(cell.get(), Value::Int(2));
        assert_eq!(
            *seen.lock(),
            vec![Change {
                path,
                value: Some(Value::Int(2)),
                previous: Some(Value::Int(0)),
            }]
        );
    }

    #[test]
    fn equal_write_publishes_nothing() {
        let (notifier, _scheduler) = PathNotifier::manual();
        let cell = Cell::new(
            Path::parse("flag").unwrap(),
            Signal::new(Value::Bool(true)),
            notifier.clone(),
        );
        cell.set(true);
        assert_eq!(notifier.pending_count(), 0);
    }

    #[test]
    fn detached_cell_keeps_its_value_but_stays_quiet() {
        let (notifier, _scheduler) = PathNotifier::manual();
        let cell = Cell::new(Path::parse("a").unwrap(), Signal::new(Value::Int(0)), notifier.clone());
        let handle = cell.clone();
        cell.detach();

        assert!(!handle.is_attached());
        handle.set(3);
        assert_eq!(handle.get_untracked(), Value::Int(3));
        assert_eq!(notifier.pending_count(), 0);
    }

    #[test]
    fn clones_share_the_signal() {
        let (notifier, _scheduler) = PathNotifier::manual();
        let cell = Cell::new(Path::parse("a").unwrap(), Signal::new(Value::Null), notifier.clone());
        let other = Cell::new(Path::parse("a").unwrap(), Signal::new(Value::Null), notifier);
        assert!(cell.ptr_eq(&cell.clone()));
        assert!(!cell.ptr_eq(&other));
    }
}
