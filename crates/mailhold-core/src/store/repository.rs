//! SQLite-backed mail store.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row};
use tracing::debug;

use super::model::{
    Email, EmailId, FlagUpdate, Mailbox, MailboxId, MailboxKind, MessageFlag, MessageFlags,
    StoredAttachment, User, UserId, UserRecord, UserStatus,
};
use super::tx::StoreTx;
use crate::{Error, Result};

const SCHEMA: [&str; 5] = [
    r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL COLLATE NOCASE UNIQUE,
        username TEXT NOT NULL COLLATE NOCASE UNIQUE,
        password_hash TEXT NOT NULL,
        full_name TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        failed_login_attempts INTEGER NOT NULL DEFAULT 0,
        locked_until TEXT,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS mailboxes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        quota_bytes INTEGER NOT NULL,
        used_bytes INTEGER NOT NULL DEFAULT 0,
        uid_next INTEGER NOT NULL DEFAULT 1,
        uid_validity INTEGER NOT NULL,
        is_subscribed INTEGER NOT NULL DEFAULT 1,
        is_selectable INTEGER NOT NULL DEFAULT 1,
        is_read_only INTEGER NOT NULL DEFAULT 0,
        UNIQUE(owner_user_id, name)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS emails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mailbox_id INTEGER NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
        uid INTEGER NOT NULL,
        message_id TEXT,
        in_reply_to TEXT,
        references_header TEXT,
        subject TEXT,
        from_address TEXT,
        to_addresses TEXT NOT NULL DEFAULT '[]',
        cc_addresses TEXT NOT NULL DEFAULT '[]',
        bcc_addresses TEXT NOT NULL DEFAULT '[]',
        text_body TEXT,
        html_body TEXT,
        raw_message BLOB NOT NULL,
        size_bytes INTEGER NOT NULL,
        flags INTEGER NOT NULL DEFAULT 0,
        internal_date TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE(mailbox_id, uid)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        content_disposition TEXT NOT NULL,
        content_id TEXT,
        size_bytes INTEGER NOT NULL,
        content BLOB NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_attachments_email ON attachments(email_id)
    ",
];

const USER_COLUMNS: &str = "id, email, username, password_hash, full_name, status, \
    failed_login_attempts, locked_until, created_at";

const MAILBOX_COLUMNS: &str = "id, owner_user_id, name, kind, quota_bytes, used_bytes, \
    uid_next, uid_validity, is_subscribed, is_selectable, is_read_only";

const EMAIL_COLUMNS: &str = "id, mailbox_id, uid, message_id, in_reply_to, references_header, \
    subject, from_address, to_addresses, cc_addresses, bcc_addresses, text_body, html_body, \
    raw_message, size_bytes, flags, internal_date, is_deleted";

/// Persistent store for users, mailboxes, messages and attachments.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct MailStore {
    pool: SqlitePool,
}

impl MailStore {
    /// Open (or create) the store at the given database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Start a transaction for composing delivery steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub async fn begin(&self) -> Result<StoreTx> {
        Ok(StoreTx::new(self.pool.begin().await?))
    }

    // ---- users ----

    pub(crate) async fn insert_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        full_name: &str,
    ) -> Result<User> {
        let result = sqlx::query(
            r"
            INSERT INTO users (email, username, password_hash, full_name, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .bind(full_name)
        .bind(UserStatus::Active.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, &format!("user {email} or {username}")))?;

        let id = UserId(result.last_insert_rowid());
        debug!("Created user {id} <{email}>");
        self.user_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    /// Look up a user by email address, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    /// Look up a user and password hash by username or email.
    pub(crate) async fn credentials_by_login(&self, login: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {USER_COLUMNS} FROM users
            WHERE email = ? OR username = ?
            ORDER BY email = ? DESC
            LIMIT 1
            "
        ))
        .bind(login)
        .bind(login)
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserRecord {
            user: row_to_user(&row),
            password_hash: row.get("password_hash"),
        }))
    }

    /// List all users ordered by email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY email ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    pub(crate) async fn update_password_hash(&self, id: UserId, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count a failed login, locking the account once `threshold` consecutive
    /// failures are reached. Returns the new failure count.
    pub(crate) async fn record_failed_login(
        &self,
        id: UserId,
        threshold: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<u32> {
        let row = sqlx::query(
            r"
            UPDATE users SET
                failed_login_attempts = failed_login_attempts + 1,
                locked_until = CASE
                    WHEN failed_login_attempts + 1 >= ? THEN ?
                    ELSE locked_until
                END
            WHERE id = ?
            RETURNING failed_login_attempts
            ",
        )
        .bind(threshold)
        .bind(lock_until.to_rfc3339())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.get::<u32, _>("failed_login_attempts"))
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    pub(crate) async fn clear_failed_logins(&self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn set_locked_until(
        &self,
        id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET locked_until = ? WHERE id = ?")
            .bind(until.map(|t| t.to_rfc3339()))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<()> {
        sqlx::query("UPDATE users SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- mailboxes ----

    /// Get a mailbox, creating it with the given kind and quota if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_or_create_mailbox(
        &self,
        owner: UserId,
        name: &str,
        kind: MailboxKind,
        quota_bytes: i64,
    ) -> Result<Mailbox> {
        let name = canonical_name(name);
        sqlx::query(
            r"
            INSERT INTO mailboxes (owner_user_id, name, kind, quota_bytes, uid_validity)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner_user_id, name) DO NOTHING
            ",
        )
        .bind(owner.0)
        .bind(name)
        .bind(kind.as_str())
        .bind(quota_bytes)
        .bind(new_uid_validity())
        .execute(&self.pool)
        .await?;

        self.get_mailbox(owner, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mailbox {name}")))
    }

    /// Create a custom mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the owner already has a mailbox with
    /// that name.
    pub async fn create_mailbox(
        &self,
        owner: UserId,
        name: &str,
        quota_bytes: i64,
    ) -> Result<Mailbox> {
        let name = canonical_name(name);
        let result = sqlx::query(
            r"
            INSERT INTO mailboxes (owner_user_id, name, kind, quota_bytes, uid_validity)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(owner.0)
        .bind(name)
        .bind(MailboxKind::Custom.as_str())
        .bind(quota_bytes)
        .bind(new_uid_validity())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, &format!("mailbox {name}")))?;

        self.get_mailbox_by_id(MailboxId(result.last_insert_rowid()))
            .await?
            .ok_or_else(|| Error::NotFound(format!("mailbox {name}")))
    }

    /// Create every standard mailbox the user does not have yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn provision_mailboxes(&self, owner: UserId, quota_bytes: i64) -> Result<Vec<Mailbox>> {
        let mut mailboxes = Vec::with_capacity(MailboxKind::STANDARD.len());
        for (name, kind) in MailboxKind::STANDARD {
            mailboxes.push(
                self.get_or_create_mailbox(owner, name, kind, quota_bytes)
                    .await?,
            );
        }
        Ok(mailboxes)
    }

    /// List a user's mailboxes in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_mailboxes(&self, owner: UserId) -> Result<Vec<Mailbox>> {
        let rows = sqlx::query(&format!(
            "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE owner_user_id = ? ORDER BY id ASC"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_mailbox).collect())
    }

    /// Get a mailbox by name. `INBOX` matches in any case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_mailbox(&self, owner: UserId, name: &str) -> Result<Option<Mailbox>> {
        let row = sqlx::query(&format!(
            "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE owner_user_id = ? AND name = ?"
        ))
        .bind(owner.0)
        .bind(canonical_name(name))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_mailbox))
    }

    /// Get a mailbox by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_mailbox_by_id(&self, id: MailboxId) -> Result<Option<Mailbox>> {
        let row = sqlx::query(&format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mailbox))
    }

    /// Set the subscription flag of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_subscribed(&self, id: MailboxId, subscribed: bool) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET is_subscribed = ? WHERE id = ?")
            .bind(subscribed)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the quota of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_quota(&self, id: MailboxId, quota_bytes: i64) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET quota_bytes = ? WHERE id = ?")
            .bind(quota_bytes)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically allocate the next UID of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the mailbox does not exist.
    pub async fn next_uid(&self, id: MailboxId) -> Result<u32> {
        allocate_uid(&self.pool, id).await
    }

    // ---- emails ----

    /// List all messages in a mailbox by ascending UID, including those
    /// marked deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_emails(&self, mailbox: MailboxId) -> Result<Vec<Email>> {
        let rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE mailbox_id = ? ORDER BY uid ASC"
        ))
        .bind(mailbox.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_email).collect())
    }

    /// List messages not marked deleted, by ascending UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_live_emails(&self, mailbox: MailboxId) -> Result<Vec<Email>> {
        let rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE mailbox_id = ? AND is_deleted = 0 \
             ORDER BY uid ASC"
        ))
        .bind(mailbox.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_email).collect())
    }

    /// Get a message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_email(&self, id: EmailId) -> Result<Option<Email>> {
        let row = sqlx::query(&format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_email))
    }

    /// Get a message by UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_email_by_uid(&self, mailbox: MailboxId, uid: u32) -> Result<Option<Email>> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE mailbox_id = ? AND uid = ?"
        ))
        .bind(mailbox.0)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_email))
    }

    /// Update the flags of a message, returning the resulting set.
    ///
    /// `is_deleted` follows the `\Deleted` flag, and the mailbox usage is
    /// adjusted in the same transaction when it changes. `\Recent` belongs to
    /// the server, so a replace keeps whatever it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message does not exist.
    pub async fn update_flags(
        &self,
        id: EmailId,
        mode: FlagUpdate,
        flags: MessageFlags,
    ) -> Result<MessageFlags> {
        let recent = MessageFlags::RECENT_BIT;
        let next = match mode {
            FlagUpdate::Replace => format!("((? & ~{recent}) | (flags & {recent}))"),
            FlagUpdate::Add => "(flags | ?)".to_string(),
            FlagUpdate::Remove => "(flags & ~?)".to_string(),
        };
        let deleted = MessageFlags::DELETED_BIT;
        let bits = flags.bits();

        let mut tx = self.pool.begin().await?;

        // Usage first: the write takes the lock before anything is read
        sqlx::query(&format!(
            r"
            UPDATE mailboxes SET used_bytes = used_bytes + COALESCE((
                SELECT CASE
                    WHEN is_deleted = 0 AND ({next} & {deleted}) != 0 THEN -size_bytes
                    WHEN is_deleted = 1 AND ({next} & {deleted}) = 0 THEN size_bytes
                    ELSE 0
                END
                FROM emails WHERE id = ?
            ), 0)
            WHERE id = (SELECT mailbox_id FROM emails WHERE id = ?)
            "
        ))
        .bind(bits)
        .bind(bits)
        .bind(id.0)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            r"
            UPDATE emails SET flags = {next}, is_deleted = ({next} & {deleted}) != 0
            WHERE id = ?
            RETURNING flags
            "
        ))
        .bind(bits)
        .bind(bits)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(Error::NotFound(format!("email {id}")));
        };
        tx.commit().await?;

        Ok(MessageFlags::from_bits(row.get::<u8, _>("flags")))
    }

    /// Clear `\Recent` on every message in a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_recent(&self, mailbox: MailboxId) -> Result<u64> {
        let recent = MessageFlags::empty().with(MessageFlag::Recent).bits();
        let result = sqlx::query(
            "UPDATE emails SET flags = flags & ~? WHERE mailbox_id = ? AND (flags & ?) != 0",
        )
        .bind(recent)
        .bind(mailbox.0)
        .bind(recent)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Permanently remove messages marked deleted, with their attachments.
    /// Returns the removed UIDs in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn expunge(&self, mailbox: MailboxId) -> Result<Vec<u32>> {
        let rows = sqlx::query("DELETE FROM emails WHERE mailbox_id = ? AND is_deleted = 1 RETURNING uid")
            .bind(mailbox.0)
            .fetch_all(&self.pool)
            .await?;

        let mut uids: Vec<u32> = rows.iter().map(|row| row.get::<u32, _>("uid")).collect();
        uids.sort_unstable();
        debug!("Expunged {} messages from mailbox {mailbox}", uids.len());
        Ok(uids)
    }

    /// Permanently remove the given messages in one transaction, releasing
    /// their usage. Returns the number of messages removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails; nothing is removed then.
    pub async fn delete_emails(&self, ids: &[EmailId]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for id in ids {
            sqlx::query(
                r"
                UPDATE mailboxes SET used_bytes = used_bytes - COALESCE((
                    SELECT CASE WHEN is_deleted = 0 THEN size_bytes ELSE 0 END
                    FROM emails WHERE id = ?
                ), 0)
                WHERE id = (SELECT mailbox_id FROM emails WHERE id = ?)
                ",
            )
            .bind(id.0)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

            removed += sqlx::query("DELETE FROM emails WHERE id = ?")
                .bind(id.0)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// List the attachments of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachments(&self, email: EmailId) -> Result<Vec<StoredAttachment>> {
        let rows = sqlx::query(
            r"
            SELECT id, email_id, filename, content_type, content_disposition, content_id,
                   size_bytes, content
            FROM attachments
            WHERE email_id = ?
            ORDER BY id ASC
            ",
        )
        .bind(email.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredAttachment {
                id: row.get("id"),
                email_id: EmailId(row.get("email_id")),
                filename: row.get("filename"),
                content_type: row.get("content_type"),
                content_disposition: row.get("content_disposition"),
                content_id: row.get("content_id"),
                size_bytes: row.get("size_bytes"),
                content: row.get("content"),
            })
            .collect())
    }
}

/// Bump the UID counter of a mailbox and return the value it held.
pub(super) async fn allocate_uid<'e, E>(executor: E, id: MailboxId) -> Result<u32>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "UPDATE mailboxes SET uid_next = uid_next + 1 WHERE id = ? RETURNING uid_next - 1 AS uid",
    )
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    row.map(|row| row.get::<u32, _>("uid"))
        .ok_or_else(|| Error::NotFound(format!("mailbox {id}")))
}

fn canonical_name(name: &str) -> &str {
    if name.eq_ignore_ascii_case("INBOX") {
        "INBOX"
    } else {
        name
    }
}

fn new_uid_validity() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(1)
}

fn conflict_or(err: sqlx::Error, what: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(what.to_string()),
        _ => Error::Database(err),
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_list(value: &str) -> Vec<String> {
    serde_json::from_str(value).unwrap_or_default()
}

fn row_to_user(row: &SqliteRow) -> User {
    User {
        id: UserId(row.get("id")),
        email: row.get("email"),
        username: row.get("username"),
        full_name: row.get("full_name"),
        status: UserStatus::parse(row.get("status")),
        failed_login_attempts: row.get::<u32, _>("failed_login_attempts"),
        locked_until: row
            .get::<Option<String>, _>("locked_until")
            .as_deref()
            .map(parse_timestamp),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

fn row_to_mailbox(row: &SqliteRow) -> Mailbox {
    Mailbox {
        id: MailboxId(row.get("id")),
        owner: UserId(row.get("owner_user_id")),
        name: row.get("name"),
        kind: MailboxKind::parse(row.get("kind")),
        quota_bytes: row.get("quota_bytes"),
        used_bytes: row.get("used_bytes"),
        uid_next: row.get::<u32, _>("uid_next"),
        uid_validity: row.get::<u32, _>("uid_validity"),
        is_subscribed: row.get::<bool, _>("is_subscribed"),
        is_selectable: row.get::<bool, _>("is_selectable"),
        is_read_only: row.get::<bool, _>("is_read_only"),
    }
}

fn row_to_email(row: &SqliteRow) -> Email {
    Email {
        id: EmailId(row.get("id")),
        mailbox_id: MailboxId(row.get("mailbox_id")),
        uid: row.get::<u32, _>("uid"),
        message_id: row.get("message_id"),
        in_reply_to: row.get("in_reply_to"),
        references: row.get("references_header"),
        subject: row.get("subject"),
        from_address: row.get("from_address"),
        to: parse_list(row.get("to_addresses")),
        cc: parse_list(row.get("cc_addresses")),
        bcc: parse_list(row.get("bcc_addresses")),
        text_body: row.get("text_body"),
        html_body: row.get("html_body"),
        raw_message: row.get("raw_message"),
        size_bytes: row.get("size_bytes"),
        flags: MessageFlags::from_bits(row.get::<u8, _>("flags")),
        internal_date: parse_timestamp(row.get("internal_date")),
        is_deleted: row.get::<bool, _>("is_deleted"),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::store::model::NewEmail;

    async fn store_with_user() -> (MailStore, User) {
        let store = MailStore::in_memory().await.unwrap();
        let user = store
            .insert_user("bob@example.com", "bob", "hash", "Bob")
            .await
            .unwrap();
        (store, user)
    }

    async fn deliver_raw(store: &MailStore, mailbox: MailboxId, raw: &[u8]) -> EmailId {
        let mut tx = store.begin().await.unwrap();
        let uid = tx.next_uid(mailbox).await.unwrap();
        let email = NewEmail {
            mailbox_id: mailbox,
            uid,
            message_id: None,
            in_reply_to: None,
            references: None,
            subject: Some("test"),
            from_address: Some("alice@example.com"),
            to: &["bob@example.com".to_string()],
            cc: &[],
            bcc: &[],
            text_body: Some("hi"),
            html_body: None,
            raw_message: raw,
            flags: MessageFlags::empty().with(MessageFlag::Recent),
            internal_date: Utc::now(),
        };
        let id = tx.insert_email(&email).await.unwrap();
        tx.update_mailbox_usage(mailbox, i64::try_from(raw.len()).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_user_lookup_ignores_case() {
        let (store, user) = store_with_user().await;

        let found = store.user_by_email("BOB@Example.COM").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.status, UserStatus::Active);

        let record = store.credentials_by_login("bob").await.unwrap().unwrap();
        assert_eq!(record.user.email, "bob@example.com");
        assert_eq!(record.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_duplicate_user_is_conflict() {
        let (store, _) = store_with_user().await;
        let err = store
            .insert_user("Bob@example.com", "robert", "hash", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_login_locks_at_threshold() {
        let (store, user) = store_with_user().await;
        let until = Utc::now() + chrono::Duration::minutes(30);

        for expected in 1..=2 {
            let count = store.record_failed_login(user.id, 3, until).await.unwrap();
            assert_eq!(count, expected);
        }
        assert!(store.user_by_id(user.id).await.unwrap().unwrap().locked_until.is_none());

        store.record_failed_login(user.id, 3, until).await.unwrap();
        let locked = store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(locked.is_locked(Utc::now()));

        store.clear_failed_logins(user.id).await.unwrap();
        let cleared = store.user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(cleared.failed_login_attempts, 0);
        assert!(!cleared.is_locked(Utc::now()));
    }

    #[tokio::test]
    async fn test_get_or_create_mailbox_is_idempotent() {
        let (store, user) = store_with_user().await;

        let first = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let second = store
            .get_or_create_mailbox(user.id, "inbox", MailboxKind::Inbox, 5)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "INBOX");
        assert_eq!(second.quota_bytes, 1000);
        assert_eq!(second.uid_next, 1);
    }

    #[tokio::test]
    async fn test_create_mailbox_conflict_and_case_sensitivity() {
        let (store, user) = store_with_user().await;

        store.create_mailbox(user.id, "Projects", 1000).await.unwrap();
        let err = store.create_mailbox(user.id, "Projects", 1000).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Names other than INBOX are case-sensitive
        store.create_mailbox(user.id, "projects", 1000).await.unwrap();
        assert!(store.get_mailbox(user.id, "PROJECTS").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_creates_standard_set() {
        let (store, user) = store_with_user().await;
        store.provision_mailboxes(user.id, 1000).await.unwrap();
        store.provision_mailboxes(user.id, 1000).await.unwrap();

        let names: Vec<String> = store
            .list_mailboxes(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["INBOX", "Sent", "Drafts", "Trash", "Spam", "Archive"]);
    }

    #[tokio::test]
    async fn test_next_uid_is_monotonic() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();

        assert_eq!(store.next_uid(inbox.id).await.unwrap(), 1);
        assert_eq!(store.next_uid(inbox.id).await.unwrap(), 2);
        assert!(store.next_uid(MailboxId(999)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_flags_track_deleted_and_usage() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let id = deliver_raw(&store, inbox.id, b"0123456789").await;
        deliver_raw(&store, inbox.id, b"01234").await;

        let flags = store
            .update_flags(id, FlagUpdate::Add, MessageFlags::empty().with(MessageFlag::Deleted))
            .await
            .unwrap();
        assert!(flags.contains(MessageFlag::Deleted));
        assert!(flags.contains(MessageFlag::Recent));

        let email = store.get_email(id).await.unwrap().unwrap();
        assert!(email.is_deleted);
        let mailbox = store.get_mailbox_by_id(inbox.id).await.unwrap().unwrap();
        assert_eq!(mailbox.used_bytes, 5);

        // Adding it twice does not subtract twice
        store
            .update_flags(id, FlagUpdate::Add, MessageFlags::empty().with(MessageFlag::Deleted))
            .await
            .unwrap();
        let mailbox = store.get_mailbox_by_id(inbox.id).await.unwrap().unwrap();
        assert_eq!(mailbox.used_bytes, 5);

        store
            .update_flags(id, FlagUpdate::Remove, MessageFlags::empty().with(MessageFlag::Deleted))
            .await
            .unwrap();
        let mailbox = store.get_mailbox_by_id(inbox.id).await.unwrap().unwrap();
        assert_eq!(mailbox.used_bytes, 15);

        let flags = store
            .update_flags(id, FlagUpdate::Replace, MessageFlags::empty().with(MessageFlag::Seen))
            .await
            .unwrap();
        assert!(flags.contains(MessageFlag::Seen));
        assert!(!flags.contains(MessageFlag::Deleted));

        let err = store
            .update_flags(EmailId(999), FlagUpdate::Add, MessageFlags::empty())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expunge_removes_deleted_and_attachments() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let keep = deliver_raw(&store, inbox.id, b"keep").await;
        let gone = deliver_raw(&store, inbox.id, b"gone").await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_attachment(
            gone,
            &mailhold_mime::Attachment {
                filename: "a.txt".to_string(),
                content_type: "text/plain".to_string(),
                disposition: "attachment".to_string(),
                content_id: None,
                content: b"abc".to_vec(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.attachments(gone).await.unwrap().len(), 1);

        store
            .update_flags(gone, FlagUpdate::Add, MessageFlags::empty().with(MessageFlag::Deleted))
            .await
            .unwrap();
        assert_eq!(store.list_emails(inbox.id).await.unwrap().len(), 2);
        assert_eq!(store.list_live_emails(inbox.id).await.unwrap().len(), 1);

        let removed = store.expunge(inbox.id).await.unwrap();
        assert_eq!(removed, vec![2]);
        assert!(store.get_email(gone).await.unwrap().is_none());
        assert!(store.attachments(gone).await.unwrap().is_empty());
        assert!(store.get_email(keep).await.unwrap().is_some());

        let mailbox = store.get_mailbox_by_id(inbox.id).await.unwrap().unwrap();
        assert_eq!(mailbox.used_bytes, 4);
    }

    #[tokio::test]
    async fn test_delete_emails_releases_usage() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let a = deliver_raw(&store, inbox.id, b"aaaa").await;
        let b = deliver_raw(&store, inbox.id, b"bbbbbb").await;

        let removed = store.delete_emails(&[a, EmailId(999)]).await.unwrap();
        assert_eq!(removed, 1);

        let mailbox = store.get_mailbox_by_id(inbox.id).await.unwrap().unwrap();
        assert_eq!(mailbox.used_bytes, 6);
        assert!(store.get_email(b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_keeps_recent() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let id = deliver_raw(&store, inbox.id, b"hello").await;

        let flags = store
            .update_flags(id, FlagUpdate::Replace, MessageFlags::empty().with(MessageFlag::Seen))
            .await
            .unwrap();
        assert!(flags.contains(MessageFlag::Seen));
        assert!(flags.contains(MessageFlag::Recent));

        // A replace cannot set it either
        store.clear_recent(inbox.id).await.unwrap();
        let flags = store
            .update_flags(
                id,
                FlagUpdate::Replace,
                MessageFlags::empty().with(MessageFlag::Recent).with(MessageFlag::Flagged),
            )
            .await
            .unwrap();
        assert!(flags.contains(MessageFlag::Flagged));
        assert!(!flags.contains(MessageFlag::Recent));
    }

    #[tokio::test]
    async fn test_clear_recent() {
        let (store, user) = store_with_user().await;
        let inbox = store
            .get_or_create_mailbox(user.id, "INBOX", MailboxKind::Inbox, 1000)
            .await
            .unwrap();
        let id = deliver_raw(&store, inbox.id, b"x").await;

        assert_eq!(store.clear_recent(inbox.id).await.unwrap(), 1);
        assert_eq!(store.clear_recent(inbox.id).await.unwrap(), 0);
        let email = store.get_email(id).await.unwrap().unwrap();
        assert!(!email.flags.contains(MessageFlag::Recent));
    }
}
