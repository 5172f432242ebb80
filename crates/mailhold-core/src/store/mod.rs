//! Mail store.
//!
//! Users own mailboxes, mailboxes hold messages, messages carry attachments.
//! Deleting a row removes everything beneath it.

mod model;
mod repository;
mod tx;

pub use model::{
    Email, EmailId, FlagUpdate, Mailbox, MailboxId, MailboxKind, MessageFlag, MessageFlags,
    NewEmail, StoredAttachment, User, UserId, UserStatus,
};
pub(crate) use model::UserRecord;
pub use repository::MailStore;
pub use tx::StoreTx;
