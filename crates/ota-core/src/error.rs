//! Error types for the device context

use thiserror::Error;

/// Errors that can occur while loading or committing device context data
#[derive(Debug, Error)]
pub enum ContextError {
    /// Input could not be parsed at all (malformed JSON, malformed
    /// device_type file)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input parsed but had an unacceptable value (e.g. trailing content
    /// in the device_type file)
    #[error("Value error: {0}")]
    Value(String),

    /// Input parsed but had the wrong JSON type (e.g. a non-string
    /// provides value)
    #[error("Type error: {0}")]
    Type(String),

    /// Error from the underlying state store
    #[error("Store error: {0}")]
    Store(#[from] ota_store::StoreError),

    /// Filesystem error (missing device_type file, unreadable config)
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration file could not be decoded
    #[error("Config error: {0}")]
    Config(String),
}
