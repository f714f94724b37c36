use crate::session::SessionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Invalid argument '{name}': {reason}")]
    Argument { name: &'static str, reason: String },

    #[error("Current context already set")]
    AlreadyActive,

    #[error("No current context set")]
    NotSet,

    #[error("{0} is in use by another worker")]
    SessionBusy(SessionId),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl PersistenceError {
    pub fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    /// Returns the storage failure carried by this error, if any.
    pub fn as_storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

/// Failures raised by a storage engine.
///
/// The core never wraps or rewrites these; they reach the caller as
/// `PersistenceError::Storage` after the session has been released.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("Row {key} not found in table '{table}'")]
    RowNotFound { table: String, key: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Unknown relation '{relation}' on table '{table}'")]
    UnknownRelation { table: String, relation: String },

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl<T> From<std::sync::PoisonError<T>> for PersistenceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}
