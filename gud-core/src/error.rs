//! Error types for gud
//!
//! Every fallible operation in the crate returns [`Result`]. Store corruption,
//! invariant violations and I/O faults are kept apart so callers can decide
//! which ones to surface and which ones are recoverable.

use crate::hash::ObjectHash;

/// Result type for gud operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gud engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectHash),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("Branch is corrupted: {0}")]
    CorruptBranch(String),

    #[error("Index format mismatch: found {found}, expected {expected}")]
    IndexFormat { found: u32, expected: u32 },

    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No gud project found at {0}")]
    ProjectNotFound(String),

    #[error("Path is not inside the project: {0}")]
    OutsideProject(String),

    #[error("Path is not tracked: {0}")]
    NotTracked(String),

    #[error("No changes to save")]
    NothingToSave,

    #[error("Cannot {0} while head is detached")]
    DetachedHead(&'static str),

    #[error("Uncommitted changes must be saved or cleaned first")]
    UncommittedChanges,

    #[error("Conflicts must be solved before saving")]
    UnresolvedConflicts,

    #[error("Merge conflicts in {} file(s): {}", .0.len(), .0.join(", "))]
    MergeConflicts(Vec<String>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means something the caller asked for does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound(_) | Error::BranchNotFound(_))
    }

    pub(crate) fn corrupt(what: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::CorruptStore(format!("{}: {}", what, err))
    }

    pub(crate) fn transfer(msg: impl Into<String>) -> Self {
        Error::InvalidTransfer(msg.into())
    }
}
