//! Task-set registry error types.

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskSetError {
    #[error("pool not registered: {0}")]
    UnknownPool(String),

    #[error("pool {0} is serving traffic and cannot change its instance set")]
    ConflictingRegistration(String),

    #[error("pool already terminated: {0}")]
    AlreadyTerminated(String),
}

pub type TaskSetResult<T> = Result<T, TaskSetError>;
