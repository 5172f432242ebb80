//! Header section handling.

use crate::encoding::decode_rfc2047;

/// Collection of message headers, kept in their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Gets the first value for a header (case-insensitive name).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header, in order of appearance.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Gets the first value for a header with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Returns an iterator over all headers as `(name, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses an unfolded header section.
    ///
    /// Folded continuation lines (starting with space or tab) are joined to
    /// the previous field with a single space. Lines without a colon that are
    /// not continuations are skipped. Parsing stops at the first empty line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(' ') {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        headers
    }
}

/// Splits a raw message at the first blank line.
///
/// Returns `(header_section, body)`. The header section includes the
/// terminating blank line, so `header_section.len() + body.len()` equals the
/// input length. A message without a blank line is all header; a message
/// that starts with a blank line has an empty header section apart from
/// that line.
#[must_use]
pub fn split_header(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return raw.split_at(2);
    }
    if raw.starts_with(b"\n") {
        return raw.split_at(1);
    }

    let mut pos = 0;
    while let Some(offset) = raw[pos..].iter().position(|&b| b == b'\n') {
        let next = pos + offset + 1;
        if raw[next..].starts_with(b"\r\n") {
            return raw.split_at(next + 2);
        }
        if raw[next..].starts_with(b"\n") {
            return raw.split_at(next + 1);
        }
        pos = next;
    }

    (raw, &[])
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_get_all_keeps_order() {
        let mut headers = Headers::new();
        headers.add("Received", "from a");
        headers.add("Subject", "x");
        headers.add("Received", "from b");
        assert_eq!(headers.get_all("received"), vec!["from a", "from b"]);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Not-A-Header: body text\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(headers.get("Not-A-Header"), None);
    }

    #[test]
    fn test_headers_parse_skips_garbage_lines() {
        let headers = Headers::parse("garbage line\r\nSubject: ok\r\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("ok"));
    }

    #[test]
    fn test_headers_decoded_subject() {
        let headers = Headers::parse("Subject: =?utf-8?Q?caf=C3=A9?=\r\n");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("café"));
    }

    #[test]
    fn test_split_header_crlf() {
        let raw = b"Subject: hi\r\n\r\nbody\r\n";
        let (header, body) = split_header(raw);
        assert_eq!(header, b"Subject: hi\r\n\r\n");
        assert_eq!(body, b"body\r\n");
    }

    #[test]
    fn test_split_header_bare_lf() {
        let (header, body) = split_header(b"Subject: hi\n\nbody");
        assert_eq!(header, b"Subject: hi\n\n");
        assert_eq!(body, b"body");
    }

    #[test]
    fn test_split_header_no_body() {
        let (header, body) = split_header(b"Subject: hi\r\n");
        assert_eq!(header, b"Subject: hi\r\n");
        assert!(body.is_empty());
    }

    #[test]
    fn test_split_header_leading_blank_line() {
        let (header, body) = split_header(b"\r\nonly body");
        assert_eq!(header, b"\r\n");
        assert_eq!(body, b"only body");
    }

    proptest! {
        #[test]
        fn split_header_preserves_length(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
            let (header, body) = split_header(&raw);
            prop_assert_eq!(header.len() + body.len(), raw.len());
        }

        #[test]
        fn parse_never_panics(text in "\\PC{0,256}") {
            let _ = Headers::parse(&text);
        }
    }
}
