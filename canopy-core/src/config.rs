//! Configuration for trees and history.
//!
//! Both structs deserialize from partial JSON: any missing field takes its
//! default. Behaviour that is not plain data (equality functions, id
//! selectors, flush schedulers) is configured on
//! [`StateTreeBuilder`](crate::tree::StateTreeBuilder) instead.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of parsed paths kept by a tree's path registry.
pub const DEFAULT_PATH_CACHE_CAPACITY: usize = 1024;

/// Default nesting limit for collection taps that mutate their collection.
pub const DEFAULT_MAX_TAP_DEPTH: usize = 8;

/// Default history bound.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Settings for a [`StateTree`](crate::tree::StateTree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Coalesce notifications into deferred flushes. When false every
    /// publish is delivered synchronously.
    pub batching: bool,

    /// Number of parsed paths memoized before the registry is cleared.
    pub path_cache_capacity: usize,

    /// How deep taps may nest when they mutate the collection that invoked
    /// them. Deeper mutations still commit but their taps are skipped.
    pub max_tap_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            batching: true,
            path_cache_capacity: DEFAULT_PATH_CACHE_CAPACITY,
            max_tap_depth: DEFAULT_MAX_TAP_DEPTH,
        }
    }
}

impl TreeConfig {
    /// Parse a (possibly partial) JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_path_cache_capacity(mut self, capacity: usize) -> Self {
        self.path_cache_capacity = capacity;
        self
    }

    pub fn with_max_tap_depth(mut self, depth: usize) -> Self {
        self.max_tap_depth = depth;
        self
    }
}

/// Settings for a [`TimeTravel`](crate::history::TimeTravel) manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of entries kept, the base entry included.
    pub max_entries: usize,

    /// Record one entry per notifier flush instead of waiting for explicit
    /// commits.
    pub auto_record: bool,

    /// Label of the entry seeded from the current tree value.
    pub initial_label: String,

    /// Label of auto-recorded entries when none was set with `label_next`.
    pub auto_label: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_HISTORY,
            auto_record: false,
            initial_label: "initial".to_string(),
            auto_label: "update".to_string(),
        }
    }
}

impl HistoryConfig {
    /// Parse a (possibly partial) JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the bound. Values below 1 are raised to 1 when the manager is built.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_auto_record(mut self, auto_record: bool) -> Self {
        self.auto_record = auto_record;
        self
    }

    pub fn with_initial_label(mut self, label: impl Into<String>) -> Self {
        self.initial_label = label.into();
        self
    }

    pub fn with_auto_label(mut self, label: impl Into<String>) -> Self {
        self.auto_label = label.into();
        self
    }
}
