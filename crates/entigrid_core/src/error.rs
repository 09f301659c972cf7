//! Error types for EntiGrid core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in EntiGrid core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Column store or lock service error.
    #[error("storage error: {0}")]
    Storage(#[from] entigrid_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entigrid_codec::CodecError),

    /// A precondition on ids, scopes or entities was violated.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A unique property value is already owned by another entity.
    #[error("unique value conflict: {entity_type}.{property} = {value} is owned by {owner}")]
    UniqueConflict {
        /// Entity type the property belongs to.
        entity_type: String,
        /// Property name.
        property: String,
        /// Rendered property value.
        value: String,
        /// Uuid of the current owner.
        owner: uuid::Uuid,
    },

    /// The entity changed since the writer read it, or another writer is in flight.
    #[error("optimistic conflict on {entity_id}: {reason}")]
    OptimisticConflict {
        /// The contended entity, rendered as `type:uuid`.
        entity_id: String,
        /// Which check failed.
        reason: String,
    },

    /// Entity not found.
    #[error("entity not found: {entity_id}")]
    EntityNotFound {
        /// The missing entity, rendered as `type:uuid`.
        entity_id: String,
    },

    /// Map value exceeds the configured size limit.
    #[error("object too large: {size} bytes exceeds limit of {limit} bytes")]
    ObjectTooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A spawned pipeline or background task panicked or was cancelled.
    #[error("task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the invalid operation.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an optimistic conflict error.
    pub fn optimistic_conflict(entity_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::OptimisticConflict {
            entity_id: entity_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an entity not found error.
    pub fn entity_not_found(entity_id: impl ToString) -> Self {
        Self::EntityNotFound {
            entity_id: entity_id.to_string(),
        }
    }

    /// Creates a task failed error.
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for uniqueness and optimistic conflicts.
    ///
    /// Conflicts are caller-visible outcomes of concurrent writes; the caller
    /// may re-read and retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::UniqueConflict { .. } | Self::OptimisticConflict { .. }
        )
    }

    /// Returns true if the same call may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::OptimisticConflict { .. } | Self::TaskFailed { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigrid_storage::StorageError;

    #[test]
    fn conflict_classification() {
        let unique = CoreError::UniqueConflict {
            entity_type: "user".into(),
            property: "email".into(),
            value: "\"a@x\"".into(),
            owner: uuid::Uuid::nil(),
        };
        assert!(unique.is_conflict());
        assert!(!unique.is_retryable());

        let optimistic = CoreError::optimistic_conflict("user:1", "head moved");
        assert!(optimistic.is_conflict());
        assert!(optimistic.is_retryable());

        assert!(!CoreError::validation("bad").is_conflict());
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = StorageError::Unavailable("down".into()).into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = CoreError::ObjectTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "object too large: 10 bytes exceeds limit of 5 bytes");
        let err = CoreError::entity_not_found("user:abc");
        assert_eq!(err.to_string(), "entity not found: user:abc");
    }
}
