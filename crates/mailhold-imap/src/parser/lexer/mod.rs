//! IMAP lexer for tokenizing client command lines.
//!
//! This module implements a lexer for the command side of the IMAP grammar
//! (RFC 3501). It breaks a framed command line, literals included, into
//! tokens the request parser can process.

#![allow(clippy::missing_errors_doc)]

mod token;

pub use token::Token;

use crate::{Error, Result};

/// IMAP lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns true if only an optional trailing CRLF is left.
    #[must_use]
    pub fn at_end(&self) -> bool {
        matches!(self.remaining(), b"" | b"\r\n" | b"\n")
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        match byte {
            b'\r' => {
                if self.peek_at(1) == Some(b'\n') {
                    self.skip(2);
                    Ok(Token::Crlf)
                } else {
                    Err(self.error("Expected LF after CR"))
                }
            }
            // Some clients end lines with a bare LF
            b'\n' => {
                self.advance();
                Ok(Token::Crlf)
            }

            b' ' => {
                self.advance();
                Ok(Token::Space)
            }

            b'(' => {
                self.advance();
                Ok(Token::LParen)
            }
            b')' => {
                self.advance();
                Ok(Token::RParen)
            }
            b'[' => {
                self.advance();
                Ok(Token::LBracket)
            }
            b']' => {
                self.advance();
                Ok(Token::RBracket)
            }

            b'"' => self.read_quoted_string(),

            b'{' => self.read_literal_prefix(),

            b'0'..=b'9' => self.read_number_or_atom(),

            _ if is_atom_char(byte) => {
                let s = self.read_raw_atom()?;
                Ok(Token::Atom(s))
            }

            _ => Err(self.error(&format!("Unexpected character: {byte:#04x}"))),
        }
    }

    /// Reads a quoted string token.
    fn read_quoted_string(&mut self) -> Result<Token<'a>> {
        self.advance(); // Skip opening quote

        let mut result = Vec::new();

        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => result.push(b'"'),
                    Some(b'\\') => result.push(b'\\'),
                    Some(c) => {
                        // Only " and \ can be escaped
                        return Err(self.error(&format!("Invalid escape: \\{}", char::from(c))));
                    }
                    None => return Err(self.error("Unexpected EOF in quoted string")),
                },
                Some(b'\r' | b'\n') => {
                    return Err(self.error("Line break in quoted string"));
                }
                Some(c) => result.push(c),
                None => return Err(self.error("Unexpected EOF in quoted string")),
            }
        }

        let s =
            String::from_utf8(result).map_err(|_| self.error("Invalid UTF-8 in quoted string"))?;

        Ok(Token::QuotedString(s))
    }

    /// Reads a literal `{n}` followed by CRLF and n bytes of data.
    ///
    /// The framing layer has already collected the data and answered the
    /// continuation request, so the bytes are expected in the input.
    fn read_literal_prefix(&mut self) -> Result<Token<'a>> {
        self.advance(); // Skip {

        let start = self.pos;
        while let Some(b'0'..=b'9') = self.peek() {
            self.advance();
        }
        let digits = &self.input[start..self.pos];

        // Non-synchronizing form {n+}
        if self.peek() == Some(b'+') {
            self.advance();
        }

        if self.advance() != Some(b'}') {
            return Err(self.error("Expected } after literal size"));
        }

        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("Invalid literal size"))?;

        match (self.advance(), self.peek()) {
            (Some(b'\r'), Some(b'\n')) => self.skip(1),
            (Some(b'\n'), _) => {}
            _ => return Err(self.error("Expected CRLF after literal size")),
        }

        if size > self.input.len() - self.pos {
            return Err(self.error("Incomplete literal data"));
        }

        let data = self.input[self.pos..self.pos + size].to_vec();
        self.skip(size);

        Ok(Token::Literal(data))
    }

    /// Reads a number or atom starting with a digit.
    fn read_number_or_atom(&mut self) -> Result<Token<'a>> {
        let s = self.read_raw_atom()?;

        if s.bytes().all(|b| b.is_ascii_digit()) {
            let n: u32 = s.parse().map_err(|_| self.error("Number too large"))?;
            Ok(Token::Number(n))
        } else {
            Ok(Token::Atom(s))
        }
    }

    /// Reads a run of atom characters without interpreting it.
    fn read_raw_atom(&mut self) -> Result<&'a str> {
        let start = self.pos;

        while let Some(b) = self.peek() {
            if is_atom_char(b) {
                self.advance();
            } else {
                break;
            }
        }

        if start == self.pos {
            return Err(self.error("Expected atom"));
        }

        std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid UTF-8 in atom"))
    }

    /// Creates a parse error at the current position.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::Space => Ok(()),
            token => Err(self.error(&format!("Expected space, got {token:?}"))),
        }
    }

    /// Reads an astring (atom or string).
    ///
    /// Digits are kept as written, so a mailbox called `007` survives.
    pub fn read_astring(&mut self) -> Result<String> {
        match self.peek() {
            Some(b) if is_atom_char(b) => Ok(self.read_raw_atom()?.to_string()),
            _ => match self.next_token()? {
                Token::QuotedString(s) => Ok(s),
                Token::Literal(data) => {
                    String::from_utf8(data).map_err(|_| self.error("Invalid UTF-8 in literal"))
                }
                token => Err(self.error(&format!("Expected astring, got {token:?}"))),
            },
        }
    }

    /// Reads a number.
    pub fn read_number(&mut self) -> Result<u32> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {token:?}"))),
        }
    }

    /// Reads an atom, keeping digits as text.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.peek() {
            Some(b) if is_atom_char(b) => self.read_raw_atom(),
            _ => {
                let token = self.next_token()?;
                Err(self.error(&format!("Expected atom, got {token:?}")))
            }
        }
    }
}

/// Returns true if the byte may appear in an atom of a command line.
///
/// This is wider than RFC 3501 `ATOM-CHAR`: `\` is included so flags like
/// `\Seen` lex as one token, and the list wildcards `%` and `*` are included
/// so sequence sets and LIST patterns do too.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b, 0x21..=0x7E) && !matches!(b, b'(' | b')' | b'{' | b'}' | b'"' | b'[' | b']')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tagged_command() {
        let mut lexer = Lexer::new(b"A001 LOGIN alice secret\r\n");

        assert_eq!(lexer.next_token().unwrap(), Token::Atom("A001"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("LOGIN"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("alice"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("secret"));
        assert_eq!(lexer.next_token().unwrap(), Token::Crlf);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_numbers_and_sets() {
        let mut lexer = Lexer::new(b"123 1:* 2,4:7 *");

        assert_eq!(lexer.next_token().unwrap(), Token::Number(123));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("1:*"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("2,4:7"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("*"));
        assert!(lexer.at_end());
    }

    #[test]
    fn test_number_too_large() {
        let mut lexer = Lexer::new(b"99999999999");
        assert!(matches!(lexer.next_token(), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_quoted_string() {
        let mut lexer = Lexer::new(b"\"Sent Items\" \"a \\\"b\\\" \\\\\"");

        assert_eq!(
            lexer.next_token().unwrap(),
            Token::QuotedString("Sent Items".to_string())
        );
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::QuotedString("a \"b\" \\".to_string())
        );
    }

    #[test]
    fn test_quoted_string_errors() {
        assert!(Lexer::new(b"\"open").next_token().is_err());
        assert!(Lexer::new(b"\"bad \\n escape\"").next_token().is_err());
    }

    #[test]
    fn test_fetch_items() {
        let mut lexer = Lexer::new(b"(FLAGS BODY.PEEK[HEADER])");

        assert_eq!(lexer.next_token().unwrap(), Token::LParen);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("FLAGS"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("BODY.PEEK"));
        assert_eq!(lexer.next_token().unwrap(), Token::LBracket);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("HEADER"));
        assert_eq!(lexer.next_token().unwrap(), Token::RBracket);
        assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn test_flags() {
        let mut lexer = Lexer::new(b"+FLAGS.SILENT (\\Seen \\Deleted)");

        assert_eq!(lexer.next_token().unwrap(), Token::Atom("+FLAGS.SILENT"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::LParen);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("\\Seen"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("\\Deleted"));
        assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn test_literal() {
        let mut lexer = Lexer::new(b"{5}\r\nhello {2+}\r\nhi");

        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"hi".to_vec()));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_incomplete_literal() {
        assert!(Lexer::new(b"{10}\r\nshort").next_token().is_err());
        assert!(Lexer::new(b"{x}\r\n").next_token().is_err());
    }

    #[test]
    fn test_astring_keeps_digits() {
        let mut lexer = Lexer::new(b"007 \"Sent\" {4}\r\nJunk");

        assert_eq!(lexer.read_astring().unwrap(), "007");
        lexer.expect_space().unwrap();
        assert_eq!(lexer.read_astring().unwrap(), "Sent");
        lexer.expect_space().unwrap();
        assert_eq!(lexer.read_astring().unwrap(), "Junk");
        assert!(lexer.at_end());
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new(b"\x01");
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, Error::Parse { position: 0, .. }));
    }

    #[test]
    fn test_is_atom_char() {
        assert!(is_atom_char(b'A'));
        assert!(is_atom_char(b'0'));
        assert!(is_atom_char(b':'));
        assert!(is_atom_char(b'\\'));
        assert!(is_atom_char(b'*'));
        assert!(is_atom_char(b'%'));
        assert!(!is_atom_char(b' '));
        assert!(!is_atom_char(b'('));
        assert!(!is_atom_char(b'['));
        assert!(!is_atom_char(b']'));
        assert!(!is_atom_char(b'{'));
        assert!(!is_atom_char(0x7F));
    }

    proptest! {
        #[test]
        fn lexer_never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut lexer = Lexer::new(&input);
            for _ in 0..=input.len() {
                match lexer.next_token() {
                    Ok(Token::Eof) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }

        #[test]
        fn literal_round_trips(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut input = format!("{{{}}}\r\n", data.len()).into_bytes();
            input.extend_from_slice(&data);
            let mut lexer = Lexer::new(&input);
            prop_assert_eq!(lexer.next_token().unwrap(), Token::Literal(data));
        }
    }
}
