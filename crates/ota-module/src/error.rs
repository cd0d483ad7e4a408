//! Error types for update-module execution

use thiserror::Error;

/// Errors that can occur while driving an update module
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module process exited with a non-zero status
    #[error("Update module exited with status {0}")]
    NonZeroExit(i32),

    /// The module process was terminated by a signal
    #[error("Update module was terminated by a signal")]
    Terminated,

    /// The module closed a stream before the driver was done with it, or
    /// abandoned the download handshake
    #[error("Update module broke the download stream")]
    BrokenPipe,

    /// The module did not finish within the configured timeout
    #[error("Update module timed out")]
    TimedOut,

    /// The module printed something the driver cannot interpret
    #[error("Unexpected update module output: {0:?}")]
    UnexpectedOutput(String),

    /// Error from the device context (file tree inputs)
    #[error(transparent)]
    Context(#[from] ota_core::ContextError),

    /// Error from the state store (file tree inputs)
    #[error(transparent)]
    Store(#[from] ota_store::StoreError),

    /// Filesystem or process I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    /// Map a process exit status to an error. Must only be called for
    /// unsuccessful statuses.
    pub(crate) fn from_exit_status(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ModuleError::NonZeroExit(code),
            None => ModuleError::Terminated,
        }
    }
}
