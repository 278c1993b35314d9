//! Entity Collections
//!
//! A path declared as a collection when a tree is built holds a list of
//! records in plain data and an [`EntityCollection`] once materialized:
//! id-keyed storage with CRUD operations, memoized query views, and
//! intercept/tap hooks.

mod collection;
mod hooks;
mod id;

pub use collection::EntityCollection;
pub use hooks::{
    AddIntercept, AddTap, HookId, RemoveIntercept, RemoveTap, UpdateIntercept, UpdateTap, Verdict,
};
pub use id::{default_selector, field_selector, EntityId, IdSelector};

pub(crate) use collection::parse_entities;
