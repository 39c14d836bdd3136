use thiserror::Error;

/// Store outcomes callers need to tell apart from plain I/O failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
}

/// True when `err` (or anything in its context chain) is `StoreError::NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_)))
}

/// True when `err` (or anything in its context chain) is `StoreError::AlreadyExists`.
pub fn is_already_exists(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::AlreadyExists(_))
    )
}
