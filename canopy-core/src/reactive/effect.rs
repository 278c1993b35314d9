//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. It is the reaction primitive integrations build on
//! (inspection panels, persistence writers, render glue).
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs synchronously.
//!
//! 3. Each run re-collects dependencies from scratch.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! An effect that writes a cell it reads does not re-enter itself: a
//! notification arriving while the effect is running is dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::subscriber::{Reactive, SubscriberId};

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect ID.
fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use canopy_core::reactive::{Effect, Signal};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let source = count.clone();
/// let sink = seen.clone();
/// let _effect = Effect::new(move || sink.store(source.get(), Ordering::SeqCst));
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

struct EffectInner {
    /// Unique identifier for this effect.
    id: u64,

    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// Handle to this effect, given to the cells it reads.
    this: Weak<EffectInner>,

    /// The effect function.
    run: Box<dyn Fn() + Send + Sync>,

    /// Signal IDs read during the last run.
    dependencies: RwLock<HashSet<u64>>,

    /// Whether the effect has been disposed.
    disposed: AtomicBool,

    /// Set while the function runs.
    running: AtomicBool,

    /// Number of times the effect has run.
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::trace!(effect = self.id, "effect already running, skipping nested run");
            return;
        }

        {
            let reactive: Weak<dyn Reactive> = self.this.clone() as Weak<dyn Reactive>;
            let _ctx = ReactiveContext::enter(self.subscriber_id, reactive);

            (self.run)();

            *self.dependencies.write() =
                ReactiveContext::reads().into_iter().collect();
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {}

    fn schedule(&self) {
        self.execute();
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It tracks nothing until [`Effect::execute`] is first called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| EffectInner {
            id: next_effect_id(),
            subscriber_id: SubscriberId::new(),
            this: this.clone(),
            run: Box::new(run),
            dependencies: RwLock::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Execute the effect function inside its tracking context.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Schedule the effect to re-run. Effects run synchronously.
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Memo, Signal};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_signal_changes() {
        let signal = Signal::new(1);
        let observed = Arc::new(AtomicI32::new(0));

        let source = signal.clone();
        let sink = observed.clone();
        let effect = Effect::new(move || {
            sink.store(source.get(), Ordering::SeqCst);
        });

        assert_eq!(effect.dependency_count(), 1);
        signal.set(9);
        assert_eq!(observed.load(Ordering::SeqCst), 9);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_reruns_through_memo() {
        let signal = Signal::new(2);
        let source = signal.clone();
        let squared = Memo::new(move || source.get() * source.get());

        let observed = Arc::new(AtomicI32::new(0));
        let sink = observed.clone();
        let view = squared.clone();
        let _effect = Effect::new(move || sink.store(view.get(), Ordering::SeqCst));

        assert_eq!(observed.load(Ordering::SeqCst), 4);
        signal.set(3);
        assert_eq!(observed.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn self_writing_effect_does_not_recurse() {
        let signal = Signal::new(0);
        let source = signal.clone();
        let effect = Effect::new(move || {
            let value = source.get();
            source.set(value + 1);
        });

        // One run on creation; its own write is dropped while running.
        assert_eq!(effect.run_count(), 1);
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert!(effect.is_disposed());

        effect.schedule();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());

        assert_eq!(effect1.run_count(), 1);
        effect1.execute();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
