//! IMAP command parser.
//!
//! The parser is split into two main components:
//!
//! - **Lexer**: Tokenizes raw bytes into IMAP tokens (atoms, strings, numbers, etc.)
//! - **Request parser**: Builds a tagged [`Command`](crate::Command) from tokens
//!
//! # Example
//!
//! ```
//! use mailhold_imap::Command;
//! use mailhold_imap::parser::parse_request;
//!
//! let request = parse_request(b"a1 SELECT INBOX\r\n").unwrap();
//! assert_eq!(request.tag, "a1");
//! assert!(matches!(request.command, Command::Select { .. }));
//! ```

pub mod lexer;
mod request;

pub use lexer::{Lexer, Token};
pub use request::{Rejection, Request, parse_request};
