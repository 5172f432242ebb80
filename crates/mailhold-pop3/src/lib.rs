//! # mailhold-pop3
//!
//! POP3 (RFC 1939) mailbox access for the `mailhold` server.
//!
//! ## Features
//!
//! - **Session machine**: USER/PASS login, then STAT, LIST, RETR, DELE,
//!   RSET, UIDL, TOP and NOOP over a snapshot of the user's INBOX
//! - **Deferred deletion**: DELE only marks; marked messages are removed
//!   from the mail store on QUIT and restored by RSET
//! - **CAPA**: advertises USER, TOP and UIDL
//!
//! ## Session States
//!
//! ```text
//! Authorization ── USER/PASS ──→ Transaction ── QUIT ──→ Update
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Command parsing
//! - [`connection`]: Stream and session handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;

pub use command::{Command, Rejection};
pub use connection::{Pop3Server, Pop3Settings};
pub use error::{Error, Result};
