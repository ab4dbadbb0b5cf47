//! Record store error types
//!
//! Defines all errors that can occur in the persistence layer.

use thiserror::Error;

/// Errors that can occur in the record store and flag store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O operation failed (creating the data directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another writer changed the flag row since it was read
    #[error("Write conflict on {flag_type}: {reason}")]
    Conflict { flag_type: String, reason: String },

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corruption(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// True for optimistic-concurrency failures that a re-read can resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
