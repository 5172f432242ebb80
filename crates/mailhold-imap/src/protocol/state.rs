//! Protocol state types.
//!
//! This module defines the states an IMAP session moves through,
//! following RFC 3501 section 3.

use mailhold_core::{Identity, Mailbox};

/// Protocol state as defined by RFC 3501.
///
/// The IMAP protocol has four states:
/// - `NotAuthenticated`: Initial state, only authentication commands allowed
/// - `Authenticated`: User is authenticated, can select mailboxes
/// - `Selected`: A mailbox is selected, can manipulate messages
/// - `Logout`: Connection is being closed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// Not authenticated - waiting for credentials.
    #[default]
    NotAuthenticated,

    /// Authenticated - user has logged in.
    Authenticated(Identity),

    /// Selected - a mailbox is currently open.
    Selected(Identity, SelectedState),

    /// Logout - connection is being closed.
    Logout,
}

impl ProtocolState {
    /// Returns `true` if we're authenticated (authenticated or selected).
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::Selected(..))
    }

    /// Returns `true` if a mailbox is selected.
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        matches!(self, Self::Selected(..))
    }

    /// Returns the logged-in identity, if any.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) | Self::Selected(identity, _) => Some(identity),
            Self::NotAuthenticated | Self::Logout => None,
        }
    }

    /// Returns the selection, if any.
    #[must_use]
    pub const fn selected(&self) -> Option<&SelectedState> {
        match self {
            Self::Selected(_, state) => Some(state),
            _ => None,
        }
    }

    /// Opens a mailbox. Has no effect unless authenticated.
    pub fn select(&mut self, selected: SelectedState) {
        *self = match std::mem::take(self) {
            Self::Authenticated(identity) | Self::Selected(identity, _) => {
                Self::Selected(identity, selected)
            }
            other => other,
        };
    }

    /// Leaves the Selected state, keeping the login.
    pub fn deselect(&mut self) {
        *self = match std::mem::take(self) {
            Self::Selected(identity, _) => Self::Authenticated(identity),
            other => other,
        };
    }
}

/// State information when a mailbox is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedState {
    /// The selected mailbox as it was when selected.
    pub mailbox: Mailbox,
    /// Whether the mailbox is read-only (EXAMINE, or a read-only mailbox).
    pub read_only: bool,
}
