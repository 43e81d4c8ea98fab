//! Service error taxonomy.

use crate::guard::DirectoryError;
use crate::message::MessageId;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The uniform failure classification every service operation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing fields; the caller can correct them.
    InvalidInput,
    /// The actor may not perform the operation.
    Forbidden,
    /// The target is absent or soft-deleted.
    NotFound,
    /// A referenced entity is missing from the expected scope.
    InvalidReference,
    /// Persistence or lookup failure.
    Storage,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidReference => "invalid_reference",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`MessageService`](crate::service::MessageService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::Forbidden => ErrorKind::Forbidden,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidReference(_) => ErrorKind::InvalidReference,
            ServiceError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ServiceError::InvalidInput(reason.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) | StoreError::Tombstoned(id) => ServiceError::NotFound(id),
            other => ServiceError::Storage(other.to_string()),
        }
    }
}

impl From<DirectoryError> for ServiceError {
    fn from(e: DirectoryError) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
