//! IMAP commands as received from the client.
//!
//! Commands are produced by [`crate::parser::parse_request`]. Message
//! identifiers are UIDs throughout, so the `UID` prefix maps onto the same
//! variants as the bare commands.

mod types;

use mailhold_core::{FlagUpdate, MessageFlags};

use crate::types::UidSet;

pub use types::{FetchAttribute, SearchKey, Section, StatusAttribute};

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Any State Commands
    /// CAPABILITY command.
    Capability,
    /// NOOP command.
    Noop,
    /// LOGOUT command.
    Logout,

    // Not Authenticated State Commands
    /// LOGIN command.
    Login {
        /// Username or email address.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// Authentication mechanism.
        mechanism: String,
    },

    // Authenticated State Commands
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: String,
    },
    /// EXAMINE command (read-only SELECT).
    Examine {
        /// Mailbox to examine.
        mailbox: String,
    },
    /// CREATE command.
    Create {
        /// Mailbox to create.
        mailbox: String,
    },
    /// SUBSCRIBE command.
    Subscribe {
        /// Mailbox to subscribe.
        mailbox: String,
    },
    /// UNSUBSCRIBE command.
    Unsubscribe {
        /// Mailbox to unsubscribe.
        mailbox: String,
    },
    /// LIST command.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// LSUB command.
    Lsub {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// STATUS command.
    Status {
        /// Mailbox name.
        mailbox: String,
        /// Status items to report.
        items: Vec<StatusAttribute>,
    },

    // Selected State Commands
    /// CHECK command.
    Check,
    /// CLOSE command.
    Close,
    /// EXPUNGE command.
    Expunge,
    /// FETCH or UID FETCH.
    Fetch {
        /// Messages to fetch.
        set: UidSet,
        /// Items to return.
        items: Vec<FetchAttribute>,
    },
    /// SEARCH or UID SEARCH. The keys are ANDed.
    Search {
        /// Search keys.
        criteria: Vec<SearchKey>,
    },
    /// STORE or UID STORE.
    Store {
        /// Messages to change.
        set: UidSet,
        /// Replace, add or remove.
        mode: FlagUpdate,
        /// Flags named by the command.
        flags: MessageFlags,
        /// `.SILENT`: no untagged FETCH responses.
        silent: bool,
    },

    /// Any verb the server does not know.
    Unrecognized(String),
}

impl Command {
    /// The command verb, for logging and completion replies.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::Create { .. } => "CREATE",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Unsubscribe { .. } => "UNSUBSCRIBE",
            Self::List { .. } => "LIST",
            Self::Lsub { .. } => "LSUB",
            Self::Status { .. } => "STATUS",
            Self::Check => "CHECK",
            Self::Close => "CLOSE",
            Self::Expunge => "EXPUNGE",
            Self::Fetch { .. } => "FETCH",
            Self::Search { .. } => "SEARCH",
            Self::Store { .. } => "STORE",
            Self::Unrecognized(_) => "?",
        }
    }
}
