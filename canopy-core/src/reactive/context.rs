//! Dependency Tracking
//!
//! Memos and effects run their closures inside a [`ReactiveContext`]. A
//! thread-local stack of frames records which computation is running, so a
//! signal read during the run can register that computation as a dependent.
//!
//! Frames nest: a memo read from inside an effect pushes its own frame and
//! pops it before the effect continues.

use std::cell::RefCell;
use std::sync::Weak;

use super::subscriber::{Reactive, SubscriberId};

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    owner: SubscriberId,
    /// Invalidation handle handed to every source read in this frame.
    reactive: Weak<dyn Reactive>,
    reads: Vec<u64>,
}

/// Scope guard for one running computation. Dropping it pops the frame,
/// also on unwind.
pub struct ReactiveContext {
    owner: SubscriberId,
}

impl ReactiveContext {
    /// Push a frame for `owner`. Reads are attributed to it until the guard
    /// drops.
    pub fn enter(owner: SubscriberId, reactive: Weak<dyn Reactive>) -> Self {
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                owner,
                reactive,
                reads: Vec::new(),
            })
        });
        Self { owner }
    }

    pub fn is_active() -> bool {
        FRAMES.with(|frames| !frames.borrow().is_empty())
    }

    /// The computation reads are currently attributed to.
    pub fn current_subscriber() -> Option<SubscriberId> {
        FRAMES.with(|frames| frames.borrow().last().map(|frame| frame.owner))
    }

    pub(crate) fn current() -> Option<(SubscriberId, Weak<dyn Reactive>)> {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .last()
                .map(|frame| (frame.owner, frame.reactive.clone()))
        })
    }

    /// Note that the running computation read source `source`.
    pub fn record_read(source: u64) {
        FRAMES.with(|frames| {
            if let Some(frame) = frames.borrow_mut().last_mut() {
                frame.reads.push(source);
            }
        });
    }

    /// Sources read so far by the running computation, in read order.
    pub fn reads() -> Vec<u64> {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .last()
                .map(|frame| frame.reads.clone())
                .unwrap_or_default()
        })
    }

    /// Run `f` with no frame active, so nothing it reads is tracked.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let hidden = FRAMES.with(|frames| std::mem::take(&mut *frames.borrow_mut()));
        let _restore = Restore(Some(hidden));
        f()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = FRAMES.with(|frames| frames.borrow_mut().pop());
        if let Some(frame) = popped {
            debug_assert_eq!(frame.owner, self.owner, "reactive frames popped out of order");
        }
    }
}

struct Restore(Option<Vec<Frame>>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(hidden) = self.0.take() {
            FRAMES.with(|frames| *frames.borrow_mut() = hidden);
        }
    }
}
