//! Error types for SMTP sessions.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Command arguments could not be parsed.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// AUTH named a mechanism the server does not offer.
    #[error("Unsupported authentication mechanism: {0}")]
    UnsupportedMechanism(String),

    /// A command line exceeded the length limit.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Base64 payload could not be decoded.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Protocol error (unexpected client behaviour).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Mail store or directory failure.
    #[error("Store error: {0}")]
    Store(#[from] mailhold_core::Error),
}

impl Error {
    /// Creates a syntax error.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }
}
