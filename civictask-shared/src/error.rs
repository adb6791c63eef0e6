/// Error types for the CivicTask core
///
/// Every fallible operation in this crate returns [`CoreResult`]. Lower layers
/// wrap and return errors; only the outermost boundary decides what a caller
/// sees, using [`CoreError::status_code`] and [`CoreError::is_client_error`].
///
/// # Example
///
/// ```
/// use civictask_shared::error::CoreError;
///
/// let err = CoreError::NotFound("task".to_string());
/// assert_eq!(err.status_code(), 404);
/// assert!(err.is_client_error());
/// ```

use std::fmt;

use crate::db::geometry::GeometryError;
use crate::notifications::NotificationError;
use crate::services::media::MediaError;
use crate::storage::StorageError;

/// Result type alias used throughout the crate
pub type CoreResult<T> = Result<T, CoreError>;

/// Stage of a transaction that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStage::Begin => write!(f, "begin"),
            TransactionStage::Commit => write!(f, "commit"),
            TransactionStage::Rollback => write!(f, "rollback"),
        }
    }
}

/// Unified core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input: bad geometry, bad data URI, bad filter parameters
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No matching row
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation, connection failure, or any other store error
    #[error("Persistence error ({context}): {source}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// Caller could not be identified
    #[error("Unauthenticated: {0}")]
    Authentication(String),

    /// Caller is identified but not allowed (ownership or role mismatch)
    #[error("Forbidden: {0}")]
    Authorization(String),

    /// Unknown moderation action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Begin, commit, or rollback failed
    #[error("Transaction {stage} failed: {source}")]
    Transaction {
        stage: TransactionStage,
        #[source]
        source: sqlx::Error,
    },

    /// Object storage upload failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Outbound notification failed
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// The unit of work was cancelled or exceeded its deadline
    #[error("Operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Wraps a store error with context
    pub fn persistence(context: impl Into<String>, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => CoreError::NotFound(context.into()),
            source => CoreError::Persistence {
                context: context.into(),
                source,
            },
        }
    }

    /// Whether the error was caused by the caller's input or identity
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::NotFound(_)
                | CoreError::Authentication(_)
                | CoreError::Authorization(_)
                | CoreError::InvalidAction(_)
        )
    }

    /// HTTP-style status code for the outermost boundary
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) | CoreError::InvalidAction(_) => 400,
            CoreError::Authentication(_) => 401,
            CoreError::Authorization(_) => 403,
            CoreError::NotFound(_) => 404,
            CoreError::Persistence { source, .. } if is_unique_violation(source) => 409,
            CoreError::Cancelled => 499,
            CoreError::Persistence { .. }
            | CoreError::Transaction { .. }
            | CoreError::Storage(_)
            | CoreError::Notification(_) => 500,
        }
    }
}

/// Whether a store error is a unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::persistence("database operation", err)
    }
}

impl From<GeometryError> for CoreError {
    fn from(err: GeometryError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

impl From<MediaError> for CoreError {
    fn from(err: MediaError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Validation("latitude out of range".to_string());
        assert_eq!(err.to_string(), "Validation failed: latitude out of range");

        let err = CoreError::NotFound("task".to_string());
        assert_eq!(err.to_string(), "Not found: task");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CoreError::Validation("x".into()).status_code(), 400);
        assert_eq!(CoreError::InvalidAction("x".into()).status_code(), 400);
        assert_eq!(CoreError::Authentication("x".into()).status_code(), 401);
        assert_eq!(CoreError::Authorization("x".into()).status_code(), 403);
        assert_eq!(CoreError::Cancelled.status_code(), 499);

        let err = CoreError::Transaction {
            stage: TransactionStage::Commit,
            source: sqlx::Error::PoolClosed,
        };
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_transaction_error_display() {
        let err = CoreError::Transaction {
            stage: TransactionStage::Rollback,
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.to_string().starts_with("Transaction rollback failed"));
    }
}
