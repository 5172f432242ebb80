//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be parsed.
    #[error("MIME error: {0}")]
    Mime(#[from] mailhold_mime::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A user, mailbox or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The target mailbox is at or over quota.
    #[error("Quota exceeded for mailbox {0}")]
    QuotaExceeded(String),

    /// Input was rejected.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// A unique value is already taken.
    #[error("Already exists: {0}")]
    Conflict(String),

    /// Password hashing failed.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// A blocking task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns true if this is a [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a [`Error::QuotaExceeded`].
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
