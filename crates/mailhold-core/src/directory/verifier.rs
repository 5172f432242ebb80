//! Identity verification over the mail store's user table.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::model::{AuthFailure, AuthOutcome, Identity, NewUser};
use super::password::{hash_password, verify_dummy, verify_password};
use crate::store::{MailStore, User, UserStatus};
use crate::{Error, Result};

/// Consecutive failures that lock an account.
pub const MAX_FAILED_LOGINS: u32 = 5;

/// How long a lockout lasts.
pub const LOCKOUT_MINUTES: i64 = 30;

/// Authenticates users and answers address-ownership questions.
///
/// Password hashing and verification run on the blocking pool.
#[derive(Debug, Clone)]
pub struct Directory {
    store: MailStore,
}

impl Directory {
    /// Create a directory backed by the given store.
    #[must_use]
    pub const fn new(store: MailStore) -> Self {
        Self { store }
    }

    /// Authenticate by username or email.
    ///
    /// Failures are counted; reaching [`MAX_FAILED_LOGINS`] locks the account
    /// for [`LOCKOUT_MINUTES`]. A success resets the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. Bad credentials are not errors.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<AuthOutcome> {
        let record = self.store.credentials_by_login(login).await?;
        let password = password.to_string();

        let Some(record) = record else {
            tokio::task::spawn_blocking(move || verify_dummy(&password)).await?;
            warn!("Authentication failed for {login}: unknown user");
            return Ok(AuthOutcome::Failed(AuthFailure::UnknownUser));
        };
        let user = record.user;

        if user.status != UserStatus::Active {
            warn!("Authentication refused for {}: status {}", user.email, user.status);
            return Ok(AuthOutcome::Failed(AuthFailure::Disabled));
        }
        if user.is_locked(Utc::now()) {
            warn!("Authentication refused for {}: locked", user.email);
            return Ok(AuthOutcome::Failed(AuthFailure::Locked));
        }

        let hash = record.password_hash;
        let valid =
            tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                .await?;

        if !valid {
            let lock_until = Utc::now() + Duration::minutes(LOCKOUT_MINUTES);
            let failures = self
                .store
                .record_failed_login(user.id, MAX_FAILED_LOGINS, lock_until)
                .await?;
            if failures >= MAX_FAILED_LOGINS {
                warn!("Locked {} after {failures} failed logins", user.email);
            } else {
                warn!("Authentication failed for {}: bad password", user.email);
            }
            return Ok(AuthOutcome::Failed(AuthFailure::BadPassword));
        }

        if user.failed_login_attempts > 0 || user.locked_until.is_some() {
            self.store.clear_failed_logins(user.id).await?;
        }
        info!("Authenticated {}", user.email);
        Ok(AuthOutcome::Authenticated(Identity::from(&user)))
    }

    /// Returns true if `identity` may use `address` as an envelope sender.
    #[must_use]
    pub fn can_send_from(&self, identity: &Identity, address: &str) -> bool {
        identity.email.eq_ignore_ascii_case(address.trim())
    }

    /// Returns true if `address` belongs to a local user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn is_local_address(&self, address: &str) -> Result<bool> {
        Ok(self.store.user_by_email(address.trim()).await?.is_some())
    }

    /// Resolve an address to an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn user_by_email(&self, address: &str) -> Result<Option<Identity>> {
        Ok(self
            .store
            .user_by_email(address.trim())
            .await?
            .as_ref()
            .map(Identity::from))
    }

    /// Create a user with a hashed password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the email or username is taken.
    pub async fn create_user(&self, new_user: NewUser) -> Result<Identity> {
        if !new_user.email.contains('@') {
            return Err(Error::Invalid(format!("email address {}", new_user.email)));
        }
        let password = new_user.password;
        let hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

        let user = self
            .store
            .insert_user(&new_user.email, &new_user.username, &hash, &new_user.full_name)
            .await?;
        info!("Created user {} ({})", user.email, user.username);
        Ok(Identity::from(&user))
    }

    /// Replace a user's password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no user has that address.
    pub async fn set_password(&self, email: &str, password: &str) -> Result<()> {
        let user = self.require(email).await?;
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        self.store.update_password_hash(user.id, &hash).await?;
        info!("Password changed for {}", user.email);
        Ok(())
    }

    /// List all users.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.store.list_users().await
    }

    /// Lock an account for `minutes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no user has that address.
    pub async fn lock_user(&self, email: &str, minutes: i64) -> Result<()> {
        let user = self.require(email).await?;
        let until = Utc::now() + Duration::minutes(minutes);
        self.store.set_locked_until(user.id, Some(until)).await?;
        info!("Locked {} until {until}", user.email);
        Ok(())
    }

    /// Clear a lock and the failure counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no user has that address.
    pub async fn unlock_user(&self, email: &str) -> Result<()> {
        let user = self.require(email).await?;
        self.store.clear_failed_logins(user.id).await?;
        info!("Unlocked {}", user.email);
        Ok(())
    }

    /// Change the account status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no user has that address.
    pub async fn set_status(&self, email: &str, status: UserStatus) -> Result<()> {
        let user = self.require(email).await?;
        self.store.set_user_status(user.id, status).await?;
        info!("Status of {} set to {status}", user.email);
        Ok(())
    }

    async fn require(&self, email: &str) -> Result<User> {
        self.store
            .user_by_email(email.trim())
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {email}")))
    }
}
