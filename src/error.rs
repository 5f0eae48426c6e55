use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error taxonomy for the store/coordinator surface.
///
/// Handler failures and lease loss are deliberately *not* variants here: a
/// handler failure is reported as an [`crate::executor::ExecutionResult`]
/// and lease loss as a plain `bool` returned by [`crate::lease::LeaseCoordinator`],
/// not exceptional control flow. This enum only carries the kinds that
/// actually interrupt a caller's happy path.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Opaque wrapper around the backing store's native error type.
///
/// Kept separate from [`QueueError`] so the Postgres backend can carry a
/// `sqlx::Error` without leaking that dependency into builds without the
/// `postgres` feature.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StorageError(pub String);

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(StorageError::from(err))
    }
}
