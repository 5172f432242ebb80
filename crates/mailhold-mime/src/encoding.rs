//! MIME decoding utilities.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 encoded words, and the
//! handful of charsets a delivery agent needs to turn bodies into text.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Malformed escape sequences are passed through unchanged.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        if data.get(i + 1..i + 3) == Some(b"\r\n".as_slice()) {
            i += 3;
            continue;
        }
        if data.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }

        match data.get(i + 1..i + 3).and_then(hex_pair) {
            Some(decoded) => {
                result.push(decoded);
                i += 3;
            }
            None => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let s = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(s, 16).ok()
}

/// Converts bytes in the named charset to a string.
///
/// UTF-8 and US-ASCII are decoded lossily; ISO-8859-1 and Windows-1252 map
/// each byte to the code point of the same value. Unknown charsets fall back
/// to lossy UTF-8.
#[must_use]
pub fn decode_charset(data: &[u8], charset: Option<&str>) -> String {
    let charset = charset.unwrap_or("utf-8").to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" | "cp1252" => {
            data.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Decodes a single RFC 2047 encoded word.
///
/// Format: `=?charset?encoding?encoded-text?=`
///
/// # Errors
///
/// Returns an error if the word is not valid RFC 2047 format.
pub fn decode_encoded_word(word: &str) -> Result<String> {
    let inner = word
        .strip_prefix("=?")
        .and_then(|w| w.strip_suffix("?="))
        .ok_or_else(|| Error::InvalidEncoding(format!("Not an encoded word: {word}")))?;

    let parts: Vec<&str> = inner.splitn(3, '?').collect();
    let [charset, encoding, text] = parts.as_slice() else {
        return Err(Error::InvalidEncoding(
            "Invalid RFC 2047 format".to_string(),
        ));
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(text.as_bytes())?,
        "Q" => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        other => {
            return Err(Error::InvalidEncoding(format!("Unknown encoding: {other}")));
        }
    };

    Ok(decode_charset(&bytes, Some(charset)))
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Plain text between words is kept; whitespace that only separates two
/// adjacent encoded words is dropped, as RFC 2047 section 6.2 requires.
/// Words that fail to decode are left as they appeared.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut last_was_word = false;

    while let Some(start) = rest.find("=?") {
        let Some(end) = find_word_end(&rest[start..]) else {
            break;
        };
        let before = &rest[..start];
        let word = &rest[start..start + end];

        let decoded = decode_encoded_word(word);
        // Whitespace between two encoded words is not part of the text
        if !(last_was_word && before.trim().is_empty() && decoded.is_ok()) {
            result.push_str(before);
        }

        match decoded {
            Ok(decoded) => {
                result.push_str(&decoded);
                last_was_word = true;
            }
            Err(_) => {
                result.push_str(word);
                last_was_word = false;
            }
        }
        rest = &rest[start + end..];
    }

    result.push_str(rest);
    result
}

/// Finds the byte length of the encoded word at the start of `s`.
fn find_word_end(s: &str) -> Option<usize> {
    // =?charset?X?text?= : skip past the charset and encoding markers first
    let after_charset = s[2..].find('?')? + 2;
    let after_encoding = s[after_charset + 1..].find('?')? + after_charset + 1;
    let close = s[after_encoding + 1..].find("?=")? + after_encoding + 1;
    Some(close + 2)
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

    #[test]
    fn test_base64_decode_with_line_breaks() {
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==\r\n").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_invalid() {
        assert!(decode_base64(b"!!!not base64!!!").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        let decoded = decode_quoted_printable(b"H=C3=A9llo, W=C3=B8rld!");
        assert_eq!(String::from_utf8(decoded).unwrap(), "Héllo, Wørld!");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode_quoted_printable(b"Hello, =\r\nWorld!");
        assert_eq!(decoded, b"Hello, World!");

        let decoded = decode_quoted_printable(b"Hello, =\nWorld!");
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_quoted_printable_malformed_escape_kept() {
        let decoded = decode_quoted_printable(b"100=ZZ sure=");
        assert_eq!(decoded, b"100=ZZ sure=");
    }

    #[test]
    fn test_decode_charset_latin1() {
        assert_eq!(decode_charset(&[0x63, 0x61, 0x66, 0xE9], Some("ISO-8859-1")), "café");
        assert_eq!(decode_charset(b"plain", None), "plain");
    }

    #[test]
    fn test_rfc2047_decode_base64_word() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable_word() {
        assert_eq!(decode_rfc2047("=?UTF-8?Q?H=C3=A9llo_World?="), "Héllo World");
    }

    #[test]
    fn test_rfc2047_mixed_text() {
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?Q?caf=C3=A9?= tomorrow"),
            "Re: café tomorrow"
        );
    }

    #[test]
    fn test_rfc2047_adjacent_words_join() {
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?one?= =?utf-8?Q?two?="),
            "onetwo"
        );
    }

    #[test]
    fn test_rfc2047_plain_passthrough() {
        assert_eq!(decode_rfc2047("Just a subject"), "Just a subject");
    }

    #[test]
    fn test_rfc2047_bad_word_left_alone() {
        assert_eq!(decode_rfc2047("=?utf-8?X?abc?= tail"), "=?utf-8?X?abc?= tail");
    }
}
