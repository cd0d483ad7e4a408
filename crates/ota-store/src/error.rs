//! Error types for the device state store

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The store has been closed.
    ///
    /// Using a closed store is a programming error, not a recoverable
    /// runtime condition: the store is only closed on shutdown, so any
    /// access after that point indicates a sequencing bug in the caller.
    #[error("Store is closed (programming error)")]
    Closed,

    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}
