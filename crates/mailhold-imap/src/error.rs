//! Error types for IMAP sessions.

use thiserror::Error;

/// Errors that can occur while serving an IMAP connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command line could not be tokenized or parsed.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Protocol violation or unexpected data from the client.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Mail store or directory failure.
    #[error("Store error: {0}")]
    Store(#[from] mailhold_core::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
