//! State Tree
//!
//! This module turns plain nested data into a tree of observable nodes.
//!
//! # Overview
//!
//! - [`Value`]: the closed set of plain data shapes a tree stores.
//! - [`Path`]: dot-delimited addresses, parsed once and cached.
//! - [`StateTree`]: the lazily materialized tree and its accessors.
//! - [`Cell`], [`ContainerView`], [`Node`]: handles returned by accessors.
//! - [`Snapshot`]: detached copies of a tree's value.
//! - [`TreeRegistry`]: an owned registry of named trees.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena indexed by id, with a second index by path.
//!    The path index is what gives accessors referential stability.
//!
//! 2. Only records are containers. Lists, maps, timestamps and every other
//!    value live in a single cell, so the variant of a value alone decides
//!    how it materializes.
//!
//! 3. Materialization happens on read. A tree built from a large document
//!    costs one root node until paths are resolved.

mod arena;
mod cell;
mod node;
mod path;
mod registry;
mod snapshot;
mod state;
mod value;
mod view;

pub use cell::Cell;
pub use node::{NodeId, NodeKind};
pub use path::{Path, PathRegistry, Segment};
pub use registry::TreeRegistry;
pub use snapshot::Snapshot;
pub use state::{StateTree, StateTreeBuilder};
pub use value::{Opaque, Record, Value};
pub use view::{ContainerView, Node};
