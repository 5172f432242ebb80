//! Argument parsers for SMTP command lines and SASL payloads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Parameters that may follow `MAIL FROM:<path>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParams {
    /// Declared message size.
    pub size: Option<usize>,
    /// BODY parameter (7BIT, 8BITMIME).
    pub body: Option<String>,
}

/// Splits `FROM:<path> params` (or `TO:<path>`) into the path and the rest.
///
/// The keyword is matched case-insensitively and a single space after the
/// colon is tolerated.
///
/// # Errors
///
/// Returns a syntax error if the keyword or the angle brackets are missing.
pub fn parse_path<'a>(args: &'a str, keyword: &str) -> Result<(&'a str, &'a str)> {
    let prefix = args
        .get(..keyword.len())
        .filter(|p| p.eq_ignore_ascii_case(keyword))
        .ok_or_else(|| Error::syntax(format!("expected {keyword}")))?;
    let rest = args[prefix.len()..].trim_start();

    let rest = rest
        .strip_prefix('<')
        .ok_or_else(|| Error::syntax("path must be enclosed in <>"))?;
    let end = rest
        .find('>')
        .ok_or_else(|| Error::syntax("unterminated path"))?;

    let mut path = &rest[..end];
    // Source routes (`@a,@b:user@c`) are ignored
    if path.starts_with('@')
        && let Some((_, mailbox)) = path.split_once(':')
    {
        path = mailbox;
    }
    Ok((path, rest[end + 1..].trim()))
}

/// Parses `KEY=VALUE` parameters after `MAIL FROM`.
///
/// Unknown parameters are ignored.
///
/// # Errors
///
/// Returns a syntax error if `SIZE` is not a number.
pub fn parse_mail_params(params: &str) -> Result<MailParams> {
    let mut parsed = MailParams::default();
    for param in params.split_ascii_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if key.eq_ignore_ascii_case("SIZE") {
            let size = value
                .parse()
                .map_err(|_| Error::syntax(format!("invalid SIZE: {value}")))?;
            parsed.size = Some(size);
        } else if key.eq_ignore_ascii_case("BODY") {
            parsed.body = Some(value.to_ascii_uppercase());
        }
    }
    Ok(parsed)
}

/// Decodes a base64 SASL line into text. `=` stands for an empty response.
///
/// # Errors
///
/// Returns an error if the line is not valid base64 or not UTF-8.
pub fn decode_sasl(line: &str) -> Result<String> {
    let line = line.trim();
    if line == "=" {
        return Ok(String::new());
    }
    let bytes = STANDARD.decode(line)?;
    String::from_utf8(bytes).map_err(|_| Error::syntax("SASL response is not UTF-8"))
}

/// Splits a decoded PLAIN response into `(username, password)`.
///
/// The authorization identity is ignored. Returns `None` unless the
/// response has exactly three NUL-separated fields.
#[must_use]
pub fn split_plain(decoded: &str) -> Option<(&str, &str)> {
    let mut fields = decoded.split('\0');
    let _authzid = fields.next()?;
    let username = fields.next()?;
    let password = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some((username, password))
}

/// Encodes a SASL challenge.
#[must_use]
pub fn encode_challenge(text: &str) -> String {
    STANDARD.encode(text)
}
