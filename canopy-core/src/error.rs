//! Error types for state tree operations.
//!
//! Every variant names where the failure happened (a tree path or a
//! collection path plus entity id) and, for mutations, which operation
//! failed.
//!
//! Navigation in the history manager (`undo`, `redo`, `jump_to`) does not
//! use this type: running out of history is an expected outcome reported
//! as `false`.

use thiserror::Error;

use crate::entity::EntityId;
use crate::tree::Path;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the state core.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// An entity with the same id already exists in the collection.
    #[error("Duplicate id in collection '{collection}' during {operation}: {id}")]
    DuplicateId {
        collection: Path,
        id: EntityId,
        operation: &'static str,
    },

    /// No entity with the given id exists in the collection.
    #[error("Entity not found in collection '{collection}' during {operation}: {id}")]
    NotFound {
        collection: Path,
        id: EntityId,
        operation: &'static str,
    },

    /// An intercept handler blocked the mutation.
    #[error("Mutation {operation} on '{collection}' blocked for {id}{}", reason_suffix(.reason))]
    Blocked {
        collection: Path,
        id: EntityId,
        operation: &'static str,
        reason: Option<String>,
    },

    /// The path is malformed, missing, or names the wrong kind of node.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The id selector produced no id for an entity.
    #[error("Entity in collection '{collection}' has no id during {operation}")]
    MissingId {
        collection: Path,
        operation: &'static str,
    },

    /// A value cannot be used as a collection of entities.
    #[error("Invalid entity data for collection '{collection}': {reason}")]
    InvalidEntity { collection: Path, reason: String },

    /// A tree is already registered under this name.
    #[error("Tree '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Encoding a snapshot failed.
    #[error("Snapshot encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Decoding a snapshot failed.
    #[error("Snapshot decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Converting between typed data and tree values failed.
    #[error("Value conversion failed: {0}")]
    Convert(#[from] serde_json::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl Error {
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error indicates a duplicate id.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateId { .. })
    }

    /// Check if an intercept handler blocked the mutation.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked { .. })
    }

    /// Check if this error concerns a path.
    pub fn is_invalid_path(&self) -> bool {
        matches!(self, Error::InvalidPath { .. })
    }

    /// The reason given by the blocking intercept, if any.
    pub fn block_reason(&self) -> Option<&str> {
        match self {
            Error::Blocked { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// The entity id involved, for entity errors.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Error::DuplicateId { id, .. } | Error::NotFound { id, .. } | Error::Blocked { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }

    /// The operation that failed, for entity errors.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::DuplicateId { operation, .. }
            | Error::NotFound { operation, .. }
            | Error::Blocked { operation, .. }
            | Error::MissingId { operation, .. } => Some(operation),
            _ => None,
        }
    }
}
