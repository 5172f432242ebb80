//! Command-related type definitions.

use chrono::NaiveDate;

use crate::types::UidSet;

/// STATUS attributes to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAttribute {
    /// Number of messages.
    Messages,
    /// Number of recent messages.
    Recent,
    /// Next UID.
    UidNext,
    /// UIDVALIDITY.
    UidValidity,
    /// Number of unseen messages.
    Unseen,
}

impl StatusAttribute {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MESSAGES" => Some(Self::Messages),
            "RECENT" => Some(Self::Recent),
            "UIDNEXT" => Some(Self::UidNext),
            "UIDVALIDITY" => Some(Self::UidValidity),
            "UNSEEN" => Some(Self::Unseen),
            _ => None,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
        }
    }
}

/// Part of a message named by `BODY[...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// The whole message (`BODY[]`).
    Full,
    /// The header block including the blank line that ends it.
    Header,
    /// Everything after the header block.
    Text,
}

impl Section {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "",
            Self::Header => "HEADER",
            Self::Text => "TEXT",
        }
    }
}

/// Individual FETCH attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message flags.
    Flags,
    /// UID.
    Uid,
    /// Internal date.
    InternalDate,
    /// RFC822 size.
    Rfc822Size,
    /// RFC822 (full message).
    Rfc822,
    /// RFC822.HEADER.
    Rfc822Header,
    /// RFC822.TEXT.
    Rfc822Text,
    /// Body section.
    Body {
        /// Section specifier.
        section: Section,
        /// Peek (don't set \Seen).
        peek: bool,
    },
}

impl FetchAttribute {
    /// The FAST macro: FLAGS INTERNALDATE RFC822.SIZE.
    pub const FAST: [Self; 3] = [Self::Flags, Self::InternalDate, Self::Rfc822Size];

    /// Returns true if fetching this item marks the message `\Seen`.
    #[must_use]
    pub const fn sets_seen(self) -> bool {
        matches!(
            self,
            Self::Rfc822 | Self::Rfc822Text | Self::Body { peek: false, .. }
        )
    }
}

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// All messages.
    All,
    /// Messages with \Answered flag.
    Answered,
    /// Messages with \Deleted flag.
    Deleted,
    /// Messages with \Draft flag.
    Draft,
    /// Messages with \Flagged flag.
    Flagged,
    /// Recent and not seen.
    New,
    /// Not recent.
    Old,
    /// Messages with \Recent flag.
    Recent,
    /// Messages with \Seen flag.
    Seen,
    /// Messages without \Answered flag.
    Unanswered,
    /// Messages without \Deleted flag.
    Undeleted,
    /// Messages without \Draft flag.
    Undraft,
    /// Messages without \Flagged flag.
    Unflagged,
    /// Messages without \Seen flag.
    Unseen,
    /// UID set (also used for bare sequence sets).
    Uid(UidSet),
    /// From contains text.
    From(String),
    /// To contains text.
    To(String),
    /// Cc contains text.
    Cc(String),
    /// Bcc contains text.
    Bcc(String),
    /// Subject contains text.
    Subject(String),
    /// Body contains text.
    Body(String),
    /// Text in header or body.
    Text(String),
    /// Internal date before the day.
    Before(NaiveDate),
    /// Internal date on the day.
    On(NaiveDate),
    /// Internal date on or after the day.
    Since(NaiveDate),
    /// Larger than size.
    Larger(u32),
    /// Smaller than size.
    Smaller(u32),
    /// AND of criteria.
    And(Vec<Self>),
    /// OR of criteria.
    Or(Box<Self>, Box<Self>),
    /// NOT of criteria.
    Not(Box<Self>),
}

impl SearchKey {
    /// Returns true if the key asks for deleted messages anywhere inside it.
    #[must_use]
    pub fn mentions_deleted(&self) -> bool {
        match self {
            Self::Deleted => true,
            Self::And(keys) => keys.iter().any(Self::mentions_deleted),
            Self::Or(a, b) => a.mentions_deleted() || b.mentions_deleted(),
            Self::Not(key) => key.mentions_deleted(),
            _ => false,
        }
    }
}
