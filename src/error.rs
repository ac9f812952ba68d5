//! Error types for the transactional messaging crate.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store-adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for crate-wide messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;

/// Errors surfaced by the store adapter, classified by retryability.
///
/// Classification is driven by the Postgres SQLSTATE underlying the
/// `sqlx::Error`: serialization failures and deadlocks (`40001`, `40P01`)
/// are `Conflict`; connection-pool and I/O errors are `Transient`; anything
/// else (constraint violations against a broken schema, protocol errors) is
/// `Fatal` and should not be retried without operator intervention.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization or deadlock conflict; safe to retry immediately.
    #[error("storage conflict: {0}")]
    Conflict(#[source] sqlx::Error),

    /// Connection or I/O failure; retried by the next poll cycle.
    #[error("transient storage error: {0}")]
    Transient(#[source] sqlx::Error),

    /// Schema mismatch or unrecoverable driver error; worker should exit.
    #[error("fatal storage error: {0}")]
    Fatal(#[source] sqlx::Error),
}

impl StoreError {
    /// Classify a raw `sqlx::Error` per spec §7's storage taxonomy.
    pub fn classify(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => return StoreError::Conflict(err),
                _ => {}
            }
        }
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Transient(err)
            }
            other => StoreError::Fatal(other),
        }
    }

    /// Whether this error should trigger a retry on the next work cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::classify(err)
    }
}

/// Crate-wide error type covering outbox, inbox, and broker operations.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Underlying store-adapter failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Row not found where one was expected (e.g. marking an unknown id).
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// Broker publish failed for the whole batch.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Caller-supplied payload bytes did not parse as a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON (de)serialization failure outside of payload validation.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context, for collaborator failures (broker client
    /// construction, consumer-group session errors, etc).
    #[error("messaging error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        MessagingError::Store(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pool_closed_as_transient() {
        let err = sqlx::Error::PoolClosed;
        assert!(matches!(StoreError::from(err), StoreError::Transient(_)));
    }

    #[test]
    fn retryable_matches_conflict_and_transient_only() {
        assert!(StoreError::Conflict(sqlx::Error::PoolClosed).is_retryable());
        assert!(StoreError::Transient(sqlx::Error::PoolClosed).is_retryable());
        assert!(!StoreError::Fatal(sqlx::Error::PoolClosed).is_retryable());
    }
}
