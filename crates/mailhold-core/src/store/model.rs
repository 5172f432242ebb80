//! Mail store data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Unique identifier for a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxId(pub i64);

/// Unique identifier for a stored email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for MailboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account status. Only active accounts may authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Normal account.
    #[default]
    Active,
    /// Disabled by an administrator.
    Inactive,
    /// Suspended, e.g. for abuse.
    Suspended,
}

impl UserStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Parses the storage representation. Unknown values are treated as
    /// inactive.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Inactive,
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account, without password material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique identifier.
    pub id: UserId,
    /// Primary address, unique ignoring case.
    pub email: String,
    /// Login name.
    pub username: String,
    /// Display name.
    pub full_name: String,
    /// Account status.
    pub status: UserStatus,
    /// Consecutive failed logins since the last success.
    pub failed_login_attempts: u32,
    /// Logins are refused until this instant.
    pub locked_until: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Returns true if the account is locked at `now`.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// A user together with its stored password hash.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub user: User,
    pub password_hash: String,
}

/// Kind of mailbox. Standard kinds map to IMAP special-use attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxKind {
    /// The delivery target.
    Inbox,
    /// Sent messages.
    Sent,
    /// Drafts.
    Drafts,
    /// Deleted messages.
    Trash,
    /// Junk mail.
    Spam,
    /// Archived messages.
    Archive,
    /// User-created mailbox.
    Custom,
}

impl MailboxKind {
    /// The mailbox set every new account receives, with canonical names.
    pub const STANDARD: [(&'static str, Self); 6] = [
        ("INBOX", Self::Inbox),
        ("Sent", Self::Sent),
        ("Drafts", Self::Drafts),
        ("Trash", Self::Trash),
        ("Spam", Self::Spam),
        ("Archive", Self::Archive),
    ];

    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Spam => "spam",
            Self::Archive => "archive",
            Self::Custom => "custom",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "inbox" => Self::Inbox,
            "sent" => Self::Sent,
            "drafts" => Self::Drafts,
            "trash" => Self::Trash,
            "spam" => Self::Spam,
            "archive" => Self::Archive,
            _ => Self::Custom,
        }
    }

    /// RFC 6154 special-use attribute, if any.
    #[must_use]
    pub const fn special_use(&self) -> Option<&'static str> {
        match self {
            Self::Sent => Some("\\Sent"),
            Self::Drafts => Some("\\Drafts"),
            Self::Trash => Some("\\Trash"),
            Self::Spam => Some("\\Junk"),
            Self::Archive => Some("\\Archive"),
            Self::Inbox | Self::Custom => None,
        }
    }
}

/// A mailbox owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Unique identifier.
    pub id: MailboxId,
    /// Owning user.
    pub owner: UserId,
    /// Name, case-sensitive except for `INBOX`.
    pub name: String,
    /// Mailbox kind.
    pub kind: MailboxKind,
    /// Quota in bytes.
    pub quota_bytes: i64,
    /// Bytes used by messages not marked deleted.
    pub used_bytes: i64,
    /// UID the next delivered message will receive.
    pub uid_next: u32,
    /// UID validity value.
    pub uid_validity: u32,
    /// Whether the mailbox is subscribed.
    pub is_subscribed: bool,
    /// Whether the mailbox can be selected.
    pub is_selectable: bool,
    /// Whether modifications are refused.
    pub is_read_only: bool,
}

impl Mailbox {
    /// Returns true if no further message may be delivered.
    #[must_use]
    pub const fn is_over_quota(&self) -> bool {
        self.used_bytes >= self.quota_bytes
    }
}

/// A system message flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFlag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for attention.
    Flagged,
    /// Message is marked for removal.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message arrived since the mailbox was last selected.
    Recent,
}

impl MessageFlag {
    /// Every flag, in display order.
    pub const ALL: [Self; 6] = [
        Self::Answered,
        Self::Flagged,
        Self::Deleted,
        Self::Seen,
        Self::Draft,
        Self::Recent,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::Seen => 1,
            Self::Answered => 1 << 1,
            Self::Deleted => 1 << 2,
            Self::Flagged => 1 << 3,
            Self::Draft => 1 << 4,
            Self::Recent => 1 << 5,
        }
    }

    /// IMAP wire name, e.g. `\Seen`.
    #[must_use]
    pub const fn as_imap(&self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
        }
    }

    /// Parses an IMAP system flag name, ignoring case.
    #[must_use]
    pub fn from_imap(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_imap().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_imap())
    }
}

/// A set of [`MessageFlag`]s, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// Bit used for [`MessageFlag::Deleted`] in storage.
    pub const DELETED_BIT: u8 = MessageFlag::Deleted.bit();

    /// Bit used for [`MessageFlag::Recent`] in storage.
    pub const RECENT_BIT: u8 = MessageFlag::Recent.bit();

    const MASK: u8 = 0b0011_1111;

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a set from stored bits, ignoring unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns true if `flag` is in the set.
    #[must_use]
    pub const fn contains(&self, flag: MessageFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Adds a flag.
    pub const fn insert(&mut self, flag: MessageFlag) {
        self.0 |= flag.bit();
    }

    /// Removes a flag.
    pub const fn remove(&mut self, flag: MessageFlag) {
        self.0 &= !flag.bit();
    }

    /// Returns a copy with `flag` added.
    #[must_use]
    pub const fn with(mut self, flag: MessageFlag) -> Self {
        self.insert(flag);
        self
    }

    /// Iterates the flags in display order.
    pub fn iter(&self) -> impl Iterator<Item = MessageFlag> + '_ {
        MessageFlag::ALL.into_iter().filter(|flag| self.contains(*flag))
    }
}

impl FromIterator<MessageFlag> for MessageFlags {
    fn from_iter<I: IntoIterator<Item = MessageFlag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// How a flag update combines with the flags already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
    /// Replace the stored flags.
    Replace,
    /// Add to the stored flags.
    Add,
    /// Remove from the stored flags.
    Remove,
}

/// A stored message.
#[derive(Debug, Clone)]
pub struct Email {
    /// Unique identifier.
    pub id: EmailId,
    /// Containing mailbox.
    pub mailbox_id: MailboxId,
    /// Per-mailbox UID.
    pub uid: u32,
    /// Message-ID header.
    pub message_id: Option<String>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// References header.
    pub references: Option<String>,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Sender address.
    pub from_address: Option<String>,
    /// To addresses.
    pub to: Vec<String>,
    /// Cc addresses.
    pub cc: Vec<String>,
    /// Bcc addresses.
    pub bcc: Vec<String>,
    /// Primary text body.
    pub text_body: Option<String>,
    /// Primary HTML body.
    pub html_body: Option<String>,
    /// The message exactly as received.
    pub raw_message: Vec<u8>,
    /// Length of `raw_message`.
    pub size_bytes: i64,
    /// Flags.
    pub flags: MessageFlags,
    /// Arrival time.
    pub internal_date: DateTime<Utc>,
    /// Marked `\Deleted` but not yet expunged.
    pub is_deleted: bool,
}

impl Email {
    /// Returns true if the message has been read.
    #[must_use]
    pub const fn is_seen(&self) -> bool {
        self.flags.contains(MessageFlag::Seen)
    }
}

/// Fields of a message about to be inserted.
#[derive(Debug, Clone)]
pub struct NewEmail<'a> {
    /// Target mailbox.
    pub mailbox_id: MailboxId,
    /// Allocated UID.
    pub uid: u32,
    /// Message-ID header.
    pub message_id: Option<&'a str>,
    /// In-Reply-To header.
    pub in_reply_to: Option<&'a str>,
    /// References header.
    pub references: Option<&'a str>,
    /// Decoded subject.
    pub subject: Option<&'a str>,
    /// Sender address.
    pub from_address: Option<&'a str>,
    /// To addresses.
    pub to: &'a [String],
    /// Cc addresses.
    pub cc: &'a [String],
    /// Bcc addresses.
    pub bcc: &'a [String],
    /// Primary text body.
    pub text_body: Option<&'a str>,
    /// Primary HTML body.
    pub html_body: Option<&'a str>,
    /// Raw message.
    pub raw_message: &'a [u8],
    /// Initial flags.
    pub flags: MessageFlags,
    /// Arrival time.
    pub internal_date: DateTime<Utc>,
}

/// An attachment stored with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// Row identifier.
    pub id: i64,
    /// Owning message.
    pub email_id: EmailId,
    /// Filename.
    pub filename: String,
    /// `type/subtype`.
    pub content_type: String,
    /// Disposition type.
    pub content_disposition: String,
    /// Content-ID for inline parts.
    pub content_id: Option<String>,
    /// Length of `content`.
    pub size_bytes: i64,
    /// Decoded payload.
    pub content: Vec<u8>,
}
