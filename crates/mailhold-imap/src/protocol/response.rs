//! Response formatting.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use mailhold_core::{Mailbox, MessageFlags};

use crate::types::flag_list;

/// Capabilities announced by CAPABILITY.
pub const CAPABILITIES: &str = "IMAP4rev1 AUTH=PLAIN AUTH=LOGIN";

/// Formats a timestamp for the greeting, e.g. `01-Feb-2024 12:00:00`.
#[must_use]
pub fn greeting_timestamp(now: DateTime<Utc>) -> String {
    now.format("%d-%b-%Y %H:%M:%S").to_string()
}

/// Formats an INTERNALDATE value, quoted.
#[must_use]
pub fn internal_date(date: DateTime<Utc>) -> String {
    date.format("\"%d-%b-%Y %H:%M:%S +0000\"").to_string()
}

/// Quotes a string for the wire.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Formats one LIST or LSUB line for a mailbox, without CRLF.
#[must_use]
pub fn list_line(verb: &str, mailbox: &Mailbox) -> String {
    let mut attributes = vec!["\\HasNoChildren"];
    if !mailbox.is_selectable {
        attributes.push("\\Noselect");
    }
    if mailbox.is_subscribed {
        attributes.push("\\Subscribed");
    }
    if let Some(special) = mailbox.kind.special_use() {
        attributes.push(special);
    }
    format!(
        "* {verb} ({}) \"/\" {}",
        attributes.join(" "),
        quote(&mailbox.name)
    )
}

/// Splits a raw message after the blank line that ends the header block.
///
/// The header part keeps the blank line. A message without one is all
/// header.
#[must_use]
pub fn split_header(raw: &[u8]) -> (&[u8], &[u8]) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2))
        .unwrap_or(raw.len());
    raw.split_at(end)
}

/// Builder for one `* <seq> FETCH (...)` response.
#[derive(Debug)]
pub struct FetchResponse {
    buf: BytesMut,
}

impl FetchResponse {
    /// Starts a response for the message at `seq` with the given UID.
    ///
    /// UID always comes first.
    #[must_use]
    pub fn new(seq: usize, uid: u32) -> Self {
        let mut buf = BytesMut::new();
        buf.put_slice(format!("* {seq} FETCH (UID {uid}").as_bytes());
        Self { buf }
    }

    /// Adds `NAME value`.
    pub fn item(&mut self, name: &str, value: &str) {
        self.buf.put_u8(b' ');
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u8(b' ');
        self.buf.put_slice(value.as_bytes());
    }

    /// Adds `FLAGS (...)`.
    pub fn flags(&mut self, flags: MessageFlags) {
        self.item("FLAGS", &flag_list(flags));
    }

    /// Adds `NAME {n}` followed by the bytes as a literal.
    pub fn literal(&mut self, name: &str, data: &[u8]) {
        self.buf
            .put_slice(format!(" {name} {{{}}}\r\n", data.len()).as_bytes());
        self.buf.put_slice(data);
    }

    /// Closes the list and returns the wire bytes, CRLF included.
    #[must_use]
    pub fn finish(mut self) -> BytesMut {
        self.buf.put_slice(b")\r\n");
        self.buf
    }
}
