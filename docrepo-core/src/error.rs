use thiserror::Error;

/// Errors raised by the object store and its collaborators.
///
/// Domain errors are raised synchronously at the point of detection and are
/// never retried by the store. Persistence I/O failures surface as
/// [`StoreError::Storage`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name constraint violation: {0}")]
    NameConstraintViolation(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
