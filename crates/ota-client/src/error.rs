//! Error types for deployment API operations

use thiserror::Error;

/// Result type alias for deployment API operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the deployment server
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed at the transport level
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid server URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server answered with an unexpected status
    #[error("Got unexpected response {status}: {message}")]
    BadResponse { status: u16, message: String },

    /// Failed to parse a response body
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The device state is not sufficient to perform the request
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Error from the device context
    #[error(transparent)]
    Context(#[from] ota_core::ContextError),
}
