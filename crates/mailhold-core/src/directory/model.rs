//! Identity types.

use serde::{Deserialize, Serialize};

use crate::store::{User, UserId};

/// An authenticated principal. Carries no password material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id.
    pub user_id: UserId,
    /// Primary address.
    pub email: String,
    /// Login name.
    pub username: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

/// Why an authentication attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No user with that username or email.
    UnknownUser,
    /// The password did not match.
    BadPassword,
    /// Too many recent failures.
    Locked,
    /// The account is not active.
    Disabled,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UnknownUser => "unknown user",
            Self::BadPassword => "bad password",
            Self::Locked => "account locked",
            Self::Disabled => "account disabled",
        })
    }
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted.
    Authenticated(Identity),
    /// Credentials refused.
    Failed(AuthFailure),
}

impl AuthOutcome {
    /// Returns the identity if authentication succeeded.
    #[must_use]
    pub fn identity(self) -> Option<Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Failed(_) => None,
        }
    }
}

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Primary address.
    pub email: String,
    /// Login name.
    pub username: String,
    /// Plaintext password, hashed before storage.
    pub password: String,
    /// Display name.
    pub full_name: String,
}
