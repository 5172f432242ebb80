//! Connection handling for the IMAP server.
//!
//! - Framed I/O: command lines, literal continuation and buffered replies
//! - The per-connection session state machine

mod framed;
mod session;

pub use framed::{FramedStream, MAX_COMMAND_SIZE, MAX_LINE_LENGTH, MAX_LITERAL_SIZE};
pub use session::{ImapServer, ImapSettings};
