//! Transaction handle for composing delivery steps atomically.

use sqlx::Row;
use sqlx::{Sqlite, Transaction};

use super::model::{EmailId, MailboxId, MessageFlag, NewEmail};
use super::repository::allocate_uid;
use crate::{Error, Result};

/// An open store transaction.
///
/// Dropping the handle without calling [`StoreTx::commit`] rolls back every
/// step, including UID allocation.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    pub(super) const fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Allocate the next UID of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the mailbox does not exist.
    pub async fn next_uid(&mut self, mailbox: MailboxId) -> Result<u32> {
        allocate_uid(&mut *self.tx, mailbox).await
    }

    /// Read `(used_bytes, quota_bytes)` of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the mailbox does not exist.
    pub async fn mailbox_usage(&mut self, mailbox: MailboxId) -> Result<(i64, i64)> {
        let row = sqlx::query("SELECT used_bytes, quota_bytes FROM mailboxes WHERE id = ?")
            .bind(mailbox.0)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mailbox {mailbox}")))?;
        Ok((row.get("used_bytes"), row.get("quota_bytes")))
    }

    /// Insert a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, e.g. on a duplicate UID.
    pub async fn insert_email(&mut self, email: &NewEmail<'_>) -> Result<EmailId> {
        let size = i64::try_from(email.raw_message.len()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r"
            INSERT INTO emails (
                mailbox_id, uid, message_id, in_reply_to, references_header, subject,
                from_address, to_addresses, cc_addresses, bcc_addresses, text_body, html_body,
                raw_message, size_bytes, flags, internal_date, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(email.mailbox_id.0)
        .bind(email.uid)
        .bind(email.message_id)
        .bind(email.in_reply_to)
        .bind(email.references)
        .bind(email.subject)
        .bind(email.from_address)
        .bind(serde_json::to_string(email.to)?)
        .bind(serde_json::to_string(email.cc)?)
        .bind(serde_json::to_string(email.bcc)?)
        .bind(email.text_body)
        .bind(email.html_body)
        .bind(email.raw_message)
        .bind(size)
        .bind(email.flags.bits())
        .bind(email.internal_date.to_rfc3339())
        .bind(email.flags.contains(MessageFlag::Deleted))
        .execute(&mut *self.tx)
        .await?;

        Ok(EmailId(result.last_insert_rowid()))
    }

    /// Insert an attachment of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_attachment(
        &mut self,
        email: EmailId,
        attachment: &mailhold_mime::Attachment,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO attachments (
                email_id, filename, content_type, content_disposition, content_id,
                size_bytes, content
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(email.0)
        .bind(&attachment.filename)
        .bind(&attachment.content_type)
        .bind(&attachment.disposition)
        .bind(attachment.content_id.as_deref())
        .bind(i64::try_from(attachment.content.len()).unwrap_or(i64::MAX))
        .bind(attachment.content.as_slice())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Add `delta` bytes (possibly negative) to a mailbox's usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_mailbox_usage(&mut self, mailbox: MailboxId, delta: i64) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET used_bytes = used_bytes + ? WHERE id = ?")
            .bind(delta)
            .bind(mailbox.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Commit every step.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back every step.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
