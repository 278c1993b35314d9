//! Undo/Redo History
//!
//! [`TimeTravel`] records snapshots of a [`StateTree`](crate::tree::StateTree)
//! on explicit commits or once per notifier flush, and writes them back on
//! undo, redo and jumps.

mod entry;
mod manager;

pub use entry::HistoryEntry;
pub use manager::{TimeTravel, TravelState};
