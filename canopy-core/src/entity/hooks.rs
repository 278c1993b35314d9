//! Collection Hooks
//!
//! Intercepts run before a mutation commits and return a [`Verdict`].
//! Taps run after it committed and was published.
//!
//! Intercepts of one kind run in registration order. Each sees the value
//! the caller proposed. The first [`Verdict::Block`] stops the chain and
//! aborts the mutation; otherwise the last [`Verdict::Transform`] replaces
//! the proposed value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::id::EntityId;
use crate::tree::Record;

/// Decision returned by an intercept.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    /// Let the mutation through unchanged.
    Allow,
    /// Replace the proposed value.
    Transform(T),
    /// Abort the mutation, optionally saying why.
    Block(Option<String>),
}

impl<T> Verdict<T> {
    pub fn block(reason: impl Into<String>) -> Self {
        Verdict::Block(Some(reason.into()))
    }
}

/// Identifies a registered hook for [`remove_hook`].
///
/// [`remove_hook`]: super::EntityCollection::remove_hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl HookId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Sees a proposed entity. May transform the whole entity.
pub type AddIntercept = Arc<dyn Fn(&Record) -> Verdict<Record> + Send + Sync>;

/// Sees the id, the proposed changes and the stored entity. May transform
/// the changes.
pub type UpdateIntercept = Arc<dyn Fn(&EntityId, &Record, &Record) -> Verdict<Record> + Send + Sync>;

/// Sees the id and the entity about to be removed. A transform is treated
/// as [`Verdict::Allow`].
pub type RemoveIntercept = Arc<dyn Fn(&EntityId, &Record) -> Verdict<()> + Send + Sync>;

/// Sees the id and the added entity.
pub type AddTap = Arc<dyn Fn(&EntityId, &Record) + Send + Sync>;

/// Sees the id, the new entity and the previous entity.
pub type UpdateTap = Arc<dyn Fn(&EntityId, &Record, &Record) + Send + Sync>;

/// Sees the id and the removed entity.
pub type RemoveTap = Arc<dyn Fn(&EntityId, &Record) + Send + Sync>;

pub(crate) struct HookList<H> {
    entries: Vec<(HookId, H)>,
}

impl<H> Default for HookList<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: Clone> HookList<H> {
    pub(crate) fn push(&mut self, handler: H) -> HookId {
        let id = HookId::new();
        self.entries.push((id, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: HookId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Clone the handlers so they can run without the hook lock held.
    pub(crate) fn handlers(&self) -> Vec<H> {
        self.entries.iter().map(|(_, h)| h.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) add_intercepts: HookList<AddIntercept>,
    pub(crate) update_intercepts: HookList<UpdateIntercept>,
    pub(crate) remove_intercepts: HookList<RemoveIntercept>,
    pub(crate) add_taps: HookList<AddTap>,
    pub(crate) update_taps: HookList<UpdateTap>,
    pub(crate) remove_taps: HookList<RemoveTap>,
}

impl Hooks {
    pub(crate) fn remove(&mut self, id: HookId) -> bool {
        self.add_intercepts.remove(id)
            || self.update_intercepts.remove(id)
            || self.remove_intercepts.remove(id)
            || self.add_taps.remove(id)
            || self.update_taps.remove(id)
            || self.remove_taps.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.add_intercepts.len()
            + self.update_intercepts.len()
            + self.remove_intercepts.len()
            + self.add_taps.len()
            + self.update_taps.len()
            + self.remove_taps.len()
    }
}

/// Result of running an intercept chain.
#[derive(Debug, PartialEq)]
pub(crate) enum Outcome<T> {
    /// Commit, with the last transform if any.
    Proceed(Option<T>),
    Blocked(Option<String>),
}

/// Fold verdicts in order. Iteration stops at the first block, so lazily
/// mapped handlers after it never run.
pub(crate) fn resolve<T>(verdicts: impl IntoIterator<Item = Verdict<T>>) -> Outcome<T> {
    let mut transformed = None;
    for verdict in verdicts {
        match verdict {
            Verdict::Allow => {}
            Verdict::Transform(value) => transformed = Some(value),
            Verdict::Block(reason) => return Outcome::Blocked(reason),
        }
    }
    Outcome::Proceed(transformed)
}
