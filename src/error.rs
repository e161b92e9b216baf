//! Crate-level error type.

use std::io;

use thiserror::Error;

use crate::query::errors::DomainError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, OrmError>;

/// Failure of an engine operation.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("flush of {model}.{field} failed: {source}")]
    Flush {
        model: String,
        field: String,
        #[source]
        source: Box<OrmError>,
    },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OrmError {
    /// True when the underlying storage error is a constraint violation
    /// (NOT NULL, UNIQUE, FOREIGN KEY, CHECK).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            OrmError::Storage(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            OrmError::Flush { source, .. } => source.is_constraint_violation(),
            _ => false,
        }
    }

    /// Returns the domain error when this failure happened before any SQL ran.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            OrmError::Domain(err) => Some(err),
            _ => None,
        }
    }
}
