//! Settlement error types

use thiserror::Error;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] clearhub_ledger::Error),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not legal in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration failure
    #[error("Config error: {0}")]
    Config(String),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Settlement result type
pub type Result<T> = std::result::Result<T, Error>;
