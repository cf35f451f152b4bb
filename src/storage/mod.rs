//! Operation persistence.
//!
//! Every write goes through [`OperationStorage::update_operation`], which is
//! atomic per record: it compares versions, bumps the version, advances
//! `updated_at` and refuses to touch a record that already reached a
//! terminal state.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use thiserror::Error;

use crate::operation::{Operation, OperationKind};

/// Errors returned by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("operation '{0}' not found")]
    NotFound(String),

    #[error("invalid operation id '{0}'")]
    InvalidId(String),

    #[error("operation '{0}' already exists")]
    AlreadyExists(String),

    #[error("version conflict for operation '{id}': expected {expected}, found {actual}")]
    Conflict { id: String, expected: i64, actual: i64 },

    #[error("operation '{0}' is in a terminal state and cannot be modified")]
    Terminal(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode operation record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait OperationStorage: Send + Sync {
    fn get_operation(&self, id: &str) -> Result<Operation, StorageError>;

    fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError>;

    /// Persist a mutated operation. Returns the stored record with its new
    /// version and timestamp.
    fn update_operation(&self, operation: Operation) -> Result<Operation, StorageError>;

    /// Operations not yet in a terminal state, optionally of one kind
    fn list_in_progress(&self, kind: Option<OperationKind>)
        -> Result<Vec<Operation>, StorageError>;
}

/// Shared precondition checks for `update_operation` implementations
pub(crate) fn check_update(stored: &Operation, incoming: &Operation) -> Result<(), StorageError> {
    if stored.is_terminal() {
        return Err(StorageError::Terminal(stored.id.clone()));
    }
    if stored.version != incoming.version {
        return Err(StorageError::Conflict {
            id: stored.id.clone(),
            expected: incoming.version,
            actual: stored.version,
        });
    }
    Ok(())
}
