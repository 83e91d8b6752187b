//! Error types for data store access

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`DataStore`](super::DataStore)
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached; callers pause and retry
    #[error("lost connectivity to data store during {operation}: {reason}")]
    Connectivity { operation: String, reason: String },

    /// The store answered with a non-success status
    #[error("data store operation {operation} failed with status {status}: {detail}")]
    Status {
        operation: String,
        status: String,
        detail: String,
    },

    /// A referenced record does not exist
    #[error("{entity} {key} not found")]
    NotFound { entity: String, key: String },
}

impl StoreError {
    /// Create a connectivity error
    pub fn connectivity(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connectivity {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a failure-status error
    pub fn status(
        operation: impl Into<String>,
        status: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Status {
            operation: operation.into(),
            status: status.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    /// Check whether this is a transport-level connectivity failure
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StoreError::connectivity("ping", "refused").is_connectivity());
        assert!(!StoreError::status("claim", "GRACEFUL_FAILURE", "x").is_connectivity());
        assert!(!StoreError::not_found("work item", 4).is_connectivity());
    }

    #[test]
    fn test_display_includes_operation() {
        let err = StoreError::status("requeue_zombie_work_items", "UNEXPECTED_FAILURE", "boom");
        let text = err.to_string();
        assert!(text.contains("requeue_zombie_work_items"));
        assert!(text.contains("UNEXPECTED_FAILURE"));
    }
}
