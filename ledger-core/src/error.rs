//! Error types for the ledger

use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Business rejections (net debit cap, fulfilment mismatch) are not errors:
/// they are recorded as ABORTED state changes and returned as outcomes.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unbalanced transfer input, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transfer id already exists; callers treat this as an idempotent no-op
    #[error("Duplicate transfer: {0}")]
    DuplicateTransfer(Uuid),

    /// Referenced participant absent
    #[error("Participant not found: {0}")]
    ParticipantNotFound(u64),

    /// Referenced participant-currency account absent
    #[error("Participant currency not found: {0}")]
    ParticipantCurrencyNotFound(u64),

    /// Referenced transfer absent
    #[error("Transfer not found: {0}")]
    TransferNotFound(Uuid),

    /// Referenced settlement window absent
    #[error("Settlement window not found: {0}")]
    WindowNotFound(u64),

    /// Operation not legal in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No settlement window is open to receive commits
    #[error("No open settlement window")]
    NoOpenWindow,

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Actor mailbox closed or response dropped
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
