//! History entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::Value;

/// One recorded state of a tree. Entries never change once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    snapshot: Value,
    timestamp: DateTime<Utc>,
    label: String,
    payload: Option<Value>,
}

impl HistoryEntry {
    pub(crate) fn new(snapshot: Value, label: String, payload: Option<Value>) -> Self {
        Self {
            snapshot,
            timestamp: Utc::now(),
            label,
            payload,
        }
    }

    /// The tree value, detached from any cell.
    pub fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Caller data attached at commit time.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}
