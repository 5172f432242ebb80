//! # mailhold-imap
//!
//! The IMAP4rev1 (RFC 3501) server side of `mailhold`.
//!
//! ## Features
//!
//! - **Request parser**: tags, atoms, quoted strings and literals, both
//!   synchronizing (`{n}`) and non-synchronizing (`{n+}`)
//! - **Session machine**: LOGIN, LIST/LSUB, SELECT/EXAMINE, FETCH, SEARCH,
//!   STORE, EXPUNGE, CLOSE, STATUS, CREATE and (UN)SUBSCRIBE over the core
//!   mail store
//! - **UID addressing**: message sets name UIDs; `UID FETCH`, `UID SEARCH`
//!   and `UID STORE` behave the same as the bare commands
//! - **Search**: flag, header, body, date and size criteria with `NOT`/`OR`
//!
//! ## Example
//!
//! ```
//! use mailhold_imap::{Command, parse_request};
//!
//! let request = parse_request(b"a1 LOGIN alice secret\r\n").unwrap();
//! assert_eq!(request.tag, "a1");
//! assert!(matches!(request.command, Command::Login { .. }));
//! ```
//!
//! ## Session States
//!
//! ```text
//! ┌─────────────────────┐
//! │   NotAuthenticated  │ ─── LOGIN ───→ Authenticated
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── SELECT/EXAMINE ───→ Selected
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │      Selected       │ ─── CLOSE ───→ Authenticated
//! └─────────────────────┘
//! ```
//!
//! LOGOUT leaves from any state.
//!
//! ## Modules
//!
//! - [`command`]: Commands as received from clients
//! - [`connection`]: Framed I/O and the session state machine
//! - [`parser`]: Lexer and request parser
//! - [`protocol`]: Session state, response formatting and search evaluation
//! - [`types`]: UID sets and flag helpers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod protocol;
pub mod types;

pub use command::{Command, FetchAttribute, SearchKey, Section, StatusAttribute};
pub use connection::{
    FramedStream, ImapServer, ImapSettings, MAX_COMMAND_SIZE, MAX_LINE_LENGTH, MAX_LITERAL_SIZE,
};
pub use error::{Error, Result};
pub use parser::{Rejection, Request, parse_request};
pub use protocol::{ProtocolState, SelectedState};
pub use types::UidSet;
