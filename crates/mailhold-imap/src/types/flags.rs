//! Message flags on the wire.

use mailhold_core::{MessageFlag, MessageFlags};

/// Flags a client may set, in the order FLAGS and PERMANENTFLAGS list them.
pub const PERMANENT_FLAGS: &str = "(\\Answered \\Flagged \\Deleted \\Seen \\Draft)";

/// Parses a flag named in a STORE command.
///
/// Only system flags are stored. `\Recent` is maintained by the server and
/// keywords are not kept, so both are rejected.
#[must_use]
pub fn parse_store_flag(s: &str) -> Option<MessageFlag> {
    MessageFlag::from_imap(s).filter(|flag| *flag != MessageFlag::Recent)
}

/// Formats a flag set as a parenthesised list, e.g. `(\Seen \Recent)`.
#[must_use]
pub fn flag_list(flags: MessageFlags) -> String {
    let names: Vec<&str> = flags.iter().map(|flag| flag.as_imap()).collect();
    format!("({})", names.join(" "))
}
