//! Plain-data snapshots.
//!
//! A snapshot is a detached copy of a tree's value plus the time it was
//! taken. The binary form is MessagePack with named fields, so snapshots
//! written by one build read back in another as long as [`Value`] keeps its
//! variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    value: Value,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Capture a value now.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            taken_at: Utc::now(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Encode as MessagePack.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// The value projected onto JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.value.to_json()
    }
}
