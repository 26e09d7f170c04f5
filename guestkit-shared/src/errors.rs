//! Error type for guestkit operations.

use thiserror::Error;

/// Result alias used throughout guestkit.
pub type GuestkitResult<T> = Result<T, GuestkitError>;

#[derive(Error, Debug)]
pub enum GuestkitError {
    /// Caller-supplied configuration was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// The handle is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No appliance subprocess is associated with the handle.
    #[error("{0}")]
    NoSubprocess(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Os(#[from] nix::Error),
}

impl GuestkitError {
    /// True for errors caused by caller-supplied configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, GuestkitError::Config(_))
    }
}
