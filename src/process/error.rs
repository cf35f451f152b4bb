use thiserror::Error;

use crate::operation::{OperationError, OperationKind};
use crate::storage::StorageError;

/// Failure of a call to an external service, classified for retry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// May succeed if retried (timeouts, 5xx, rate limiting)
    #[error("temporary error: {0}")]
    Temporary(String),

    /// Retrying will not help
    #[error("{0}")]
    Permanent(String),
}

impl ExternalError {
    pub fn temporary(message: impl Into<String>) -> Self {
        ExternalError::Temporary(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ExternalError::Permanent(message.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, ExternalError::Temporary(_))
    }
}

/// Errors surfaced by steps and the executor
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The operation was moved to the failed state with this description
    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("no steps registered for {0} operations")]
    NoSteps(OperationKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ExternalError::temporary("timeout").is_temporary());
        assert!(!ExternalError::permanent("bad request").is_temporary());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ExternalError::temporary("503").to_string(),
            "temporary error: 503"
        );
        assert_eq!(
            ProcessError::OperationFailed("cannot create DataTenant".to_string()).to_string(),
            "operation failed: cannot create DataTenant"
        );
        assert_eq!(
            ProcessError::from(ExternalError::permanent("gone")).to_string(),
            "gone"
        );
    }
}
