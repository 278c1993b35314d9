//! Reactive Primitives
//!
//! This module implements the reactive primitives the state tree is built
//! from: signals (reactive cells), memos (derived views), and effects
//! (reactions).
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal
//! registers that context as a dependent. When the value changes, as decided
//! by the signal's equality function, all dependents are notified
//! synchronously.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes. Entity collection queries are memos.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies. Each source keeps weak handles to the memos and effects
//! that read it; there is no process-wide registry.

mod context;
mod effect;
mod memo;
mod signal;
mod subscriber;

pub use context::ReactiveContext;
pub use effect::Effect;
pub use memo::{Memo, MemoState};
pub use signal::{Equality, Signal};
pub use subscriber::{Reactive, Subscriber, SubscriberId};
