//! Canopy Core
//!
//! This crate provides a reactive store for nested application state.
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Lazily materialized state trees with referentially stable cells
//! - Batched path-based change notification
//! - Entity collections with query views and intercept/tap hooks
//! - Snapshot-based undo/redo
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `tree`: Plain values, paths, and the state tree built over them
//! - `notify`: The path notifier every mutation publishes to
//! - `entity`: Id-keyed collections living at declared tree paths
//! - `history`: Undo/redo over tree snapshots
//!
//! # Example
//!
//! ```rust
//! use canopy_core::record;
//! use canopy_core::reactive::Effect;
//! use canopy_core::tree::{StateTree, Value};
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! let tree = StateTree::new(record! {
//!     "user" => record! { "name" => "Ada", "visits" => 1 },
//! })
//! .unwrap();
//!
//! let visits = tree.cell("user.visits").unwrap();
//! let seen = Arc::new(AtomicI64::new(0));
//!
//! let observer = seen.clone();
//! let cell = visits.clone();
//! let _effect = Effect::new(move || {
//!     if let Some(n) = cell.get().as_i64() {
//!         observer.store(n, Ordering::SeqCst);
//!     }
//! });
//!
//! tree.set("user.visits", 2).unwrap();
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! assert!(visits.ptr_eq(&tree.cell("user.visits").unwrap()));
//! assert_eq!(tree.read("user.visits").unwrap(), Value::Int(2));
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod history;
pub mod notify;
pub mod reactive;
pub mod tree;

pub use config::{HistoryConfig, TreeConfig};
pub use entity::{EntityCollection, EntityId, Verdict};
pub use error::{Error, Result};
pub use history::{HistoryEntry, TimeTravel};
pub use notify::{Change, PathNotifier, Subscription};
pub use tree::{Cell, Path, Record, StateTree, Value};
