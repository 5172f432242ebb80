//! MIME message structure and parsing.

use crate::address::parse_address_list;
use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::{Headers, split_header};
use std::fmt;

/// Maximum multipart nesting the parser follows before giving up.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A leaf MIME part (never `multipart/*`).
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body, still transfer-encoded.
    pub body: Vec<u8>,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Parses a part from its raw bytes (headers, blank line, body).
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (header, body) = split_header(raw);
        Self {
            headers: Headers::parse(&String::from_utf8_lossy(header)),
            body: body.to_vec(),
        }
    }

    /// Gets the content type, falling back to `text/plain` when absent or
    /// unparseable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Gets the content disposition, if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Gets the Content-ID without angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        self.headers
            .get("content-id")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|id| !id.is_empty())
    }

    /// Gets the filename from the disposition, else the content type `name`.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition()
            .and_then(|d| d.filename().map(str::to_string))
            .or_else(|| self.content_type().name().map(str::to_string))
            .filter(|name| !name.trim().is_empty())
    }

    /// Returns true if this part should be stored as an attachment.
    ///
    /// A part qualifies when it carries a filename, is explicitly marked
    /// `attachment`, or is a non-text inline part referenced by Content-ID.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if self.filename().is_some() {
            return true;
        }
        if self.disposition().is_some_and(|d| d.is_attachment()) {
            return true;
        }
        self.content_id().is_some() && self.content_type().main_type != "text"
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if Base64 decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(&self.body)),
            _ => Ok(self.body.clone()),
        }
    }

    /// Decodes the body to text using the declared charset. Undecodable
    /// transfer encodings fall back to the raw bytes.
    #[must_use]
    pub fn body_text(&self) -> String {
        let bytes = self.decode_body().unwrap_or_else(|_| self.body.clone());
        decode_charset(&bytes, self.content_type().charset())
    }

    /// Converts this part to an attachment record.
    #[must_use]
    pub fn to_attachment(&self) -> Attachment {
        let disposition = self
            .disposition()
            .map(|d| d.kind)
            .filter(|kind| !kind.is_empty())
            .unwrap_or_else(|| "attachment".to_string());
        Attachment {
            filename: self.filename().unwrap_or_else(|| "unnamed".to_string()),
            content_type: self.content_type().essence(),
            disposition,
            content_id: self.content_id(),
            content: self.decode_body().unwrap_or_else(|_| self.body.clone()),
        }
    }
}

/// An attachment extracted from a message, with its content decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename (`unnamed` when the part had none).
    pub filename: String,
    /// `type/subtype`.
    pub content_type: String,
    /// Disposition type, `attachment` unless the part said otherwise.
    pub disposition: String,
    /// Content-ID for inline parts.
    pub content_id: Option<String>,
    /// Decoded payload.
    pub content: Vec<u8>,
}

/// A parsed MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Top-level headers.
    pub headers: Headers,
    /// Leaf parts in document order. A single-part message has exactly one
    /// leaf carrying the top-level headers.
    pub parts: Vec<Part>,
}

impl Message {
    /// Parses a raw RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for empty input and [`Error::TooDeep`] for
    /// pathological multipart nesting.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Empty);
        }

        let root = Part::parse(raw);
        let headers = root.headers.clone();
        let mut parts = Vec::new();
        collect_leaves(root, 0, &mut parts)?;
        Ok(Self { headers, parts })
    }

    /// Gets the decoded Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers.get_decoded("subject")
    }

    /// Gets the first address of the From header.
    #[must_use]
    pub fn from_address(&self) -> Option<String> {
        self.headers
            .get("from")
            .and_then(|v| parse_address_list(v).into_iter().next())
    }

    /// Gets all addresses across every To header.
    #[must_use]
    pub fn to_addresses(&self) -> Vec<String> {
        self.address_list("to")
    }

    /// Gets all addresses across every Cc header.
    #[must_use]
    pub fn cc_addresses(&self) -> Vec<String> {
        self.address_list("cc")
    }

    /// Gets all addresses across every Bcc header.
    #[must_use]
    pub fn bcc_addresses(&self) -> Vec<String> {
        self.address_list("bcc")
    }

    fn address_list(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .into_iter()
            .flat_map(parse_address_list)
            .collect()
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id")
    }

    /// Gets the In-Reply-To header.
    #[must_use]
    pub fn in_reply_to(&self) -> Option<&str> {
        self.headers.get("in-reply-to")
    }

    /// Gets the References header.
    #[must_use]
    pub fn references(&self) -> Option<&str> {
        self.headers.get("references")
    }

    /// Returns the first `text/plain` body that is not an attachment.
    #[must_use]
    pub fn text_body(&self) -> Option<String> {
        self.first_body("plain")
    }

    /// Returns the first `text/html` body that is not an attachment.
    #[must_use]
    pub fn html_body(&self) -> Option<String> {
        self.first_body("html")
    }

    fn first_body(&self, sub_type: &str) -> Option<String> {
        self.parts
            .iter()
            .find(|p| p.content_type().is_text(sub_type) && !p.is_attachment())
            .map(Part::body_text)
    }

    /// Returns every attachment, inline or not, in document order.
    #[must_use]
    pub fn attachments(&self) -> Vec<Attachment> {
        self.parts
            .iter()
            .filter(|p| p.is_attachment())
            .map(Part::to_attachment)
            .collect()
    }
}

/// Walks a part tree, pushing leaves in document order.
fn collect_leaves(part: Part, depth: usize, out: &mut Vec<Part>) -> Result<()> {
    let content_type = part.content_type();
    let boundary = content_type
        .boundary()
        .filter(|_| content_type.is_multipart())
        .map(str::to_string);

    let Some(boundary) = boundary else {
        out.push(part);
        return Ok(());
    };
    if depth >= MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }

    let children = split_multipart(&part.body, &boundary);
    if children.is_empty() {
        // Boundary never appears; keep the body as an opaque leaf
        out.push(part);
        return Ok(());
    }
    for child in children {
        collect_leaves(Part::parse(child), depth + 1, out)?;
    }
    Ok(())
}

/// Splits a multipart body into the raw bytes of each body part.
///
/// The line break before each delimiter belongs to the delimiter. A missing
/// close delimiter ends the last part at the end of input.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |offset| pos + offset);
        let next = (line_end + 1).min(body.len());
        let line = trim_line_end(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(s) = start {
                    parts.push(strip_final_newline(&body[s..pos]));
                }
                if closing {
                    return parts;
                }
                start = Some(next);
            }
        }
        pos = next;
    }

    if let Some(s) = start {
        if s < body.len() {
            parts.push(&body[s..]);
        }
    }
    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn strip_final_newline(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
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

    const MULTIPART: &str = concat!(
        "From: \"Alice A.\" <alice@example.com>\r\n",
        "To: bob@example.com, Carol <carol@example.com>\r\n",
        "Cc: dave@example.com\r\n",
        "Subject: =?utf-8?Q?Quarterly_r=C3=A9sum=C3=A9?=\r\n",
        "Message-ID: <m1@example.com>\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "This is a multi-part message in MIME format.\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=inner\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "Caf=C3=A9 at noon.\r\n",
        "--inner\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>Caf\u{e9} at noon.</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0xLjQK\r\n",
        "--outer\r\n",
        "Content-Type: image/png\r\n",
        "Content-Disposition: inline\r\n",
        "Content-ID: <logo@example.com>\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "iVBORw==\r\n",
        "--outer--\r\n",
        "epilogue\r\n",
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_single_part_message() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hi\r\n\r\nHello Bob\r\n";
        let message = Message::parse(raw).unwrap();

        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.subject().as_deref(), Some("Hi"));
        assert_eq!(message.from_address().as_deref(), Some("alice@example.com"));
        assert_eq!(message.text_body().as_deref(), Some("Hello Bob\r\n"));
        assert_eq!(message.html_body(), None);
        assert!(message.attachments().is_empty());
    }

    #[test]
    fn test_nested_multipart() {
        let message = Message::parse(MULTIPART.as_bytes()).unwrap();

        assert_eq!(message.parts.len(), 4);
        assert_eq!(message.subject().as_deref(), Some("Quarterly résumé"));
        assert_eq!(message.message_id(), Some("<m1@example.com>"));
        assert_eq!(message.from_address().as_deref(), Some("alice@example.com"));
        assert_eq!(
            message.to_addresses(),
            vec!["bob@example.com".to_string(), "carol@example.com".to_string()]
        );
        assert_eq!(message.cc_addresses(), vec!["dave@example.com".to_string()]);
        assert_eq!(message.text_body().as_deref(), Some("Café at noon."));
        assert_eq!(message.html_body().as_deref(), Some("<p>Café at noon.</p>"));
    }

    #[test]
    fn test_attachments_extracted() {
        let message = Message::parse(MULTIPART.as_bytes()).unwrap();
        let attachments = message.attachments();

        assert_eq!(attachments.len(), 2);

        assert_eq!(attachments[0].filename, "report.pdf");
        assert_eq!(attachments[0].content_type, "application/pdf");
        assert_eq!(attachments[0].disposition, "attachment");
        assert_eq!(attachments[0].content, b"%PDF-1.4\n");

        assert_eq!(attachments[1].filename, "unnamed");
        assert_eq!(attachments[1].disposition, "inline");
        assert_eq!(attachments[1].content_id.as_deref(), Some("logo@example.com"));
        assert_eq!(attachments[1].content, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_missing_close_delimiter() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b\r\n",
            "\r\n",
            "--b\r\n",
            "\r\n",
            "first\r\n",
            "--b\r\n",
            "\r\n",
            "second, truncated"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.parts[0].body, b"first");
        assert_eq!(message.parts[1].body, b"second, truncated");
    }

    #[test]
    fn test_boundary_never_present_is_opaque_leaf() {
        let raw = b"Content-Type: multipart/mixed; boundary=zzz\r\n\r\nno parts here\r\n";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.parts[0].body, b"no parts here\r\n");
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(matches!(Message::parse(b""), Err(Error::Empty)));
        assert!(matches!(Message::parse(b"\r\n\r\n"), Err(Error::Empty)));
    }

    #[test]
    fn test_bad_base64_falls_back_to_raw() {
        let raw = b"Content-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\n%%%";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.text_body().as_deref(), Some("%%%"));
    }

    #[test]
    fn test_too_deep_nesting() {
        let mut raw = String::new();
        for depth in 0..=MAX_DEPTH {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=b{depth}\r\n\r\n--b{depth}\r\n"
            ));
        }
        raw.push_str("\r\nleaf\r\n");
        assert!(matches!(
            Message::parse(raw.as_bytes()),
            Err(Error::TooDeep(_))
        ));
    }

    proptest! {
        #[test]
        fn parse_never_panics(raw in proptest::collection::vec(any::<u8>(), 1..1024)) {
            let _ = Message::parse(&raw);
        }
    }
}
