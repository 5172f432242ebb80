//! Error types for POP3 sessions.

use std::io;

/// Result type alias for POP3 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// POP3 error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A command line exceeded the length limit.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Mail store or directory failure.
    #[error("Store error: {0}")]
    Store(#[from] mailhold_core::Error),
}
