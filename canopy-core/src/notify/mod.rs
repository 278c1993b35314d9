//! Change Notification
//!
//! The path notifier is the single integration surface of a tree: renderers,
//! inspection bridges and the history manager all subscribe here instead of
//! reaching into storage.
//!
//! - [`PathNotifier`]: the batched publish/subscribe bus.
//! - [`PathPattern`]: exact and wildcard subscription patterns.
//! - [`FlushScheduler`]: decides when deferred flushes run.

mod notifier;
mod pattern;
mod scheduler;

pub use notifier::{Change, PathNotifier, Subscription};
pub use pattern::PathPattern;
pub use scheduler::{FlushScheduler, FlushTask, ManualScheduler, TokioScheduler};
