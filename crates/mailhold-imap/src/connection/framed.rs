//! Framed I/O for IMAP protocol.
//!
//! IMAP uses CRLF-terminated lines with support for literals.
//! This module provides buffered reading of client commands, answering
//! synchronizing literals with a continuation request, and buffered writing
//! of responses.

#![allow(clippy::missing_errors_doc)]

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum literal size to prevent memory exhaustion.
pub const MAX_LITERAL_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of one command with all of its literals.
pub const MAX_COMMAND_SIZE: usize = MAX_LITERAL_SIZE + 4 * MAX_LINE_LENGTH;

/// Continuation request sent before reading a synchronizing literal.
const CONTINUATION: &[u8] = b"+ Ready for literal data\r\n";

/// Framed server connection for IMAP protocol.
///
/// Handles command reading with literal support and buffered writing.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads a complete command, including any embedded literals.
    ///
    /// A line ending in `{n}` gets a continuation request, then `n` bytes
    /// are read and the command continues on the following line. The
    /// non-synchronizing form `{n+}` is read without a continuation.
    ///
    /// Returns `None` when the client closes the connection.
    pub async fn read_command(&mut self) -> Result<Option<Vec<u8>>> {
        let mut command = Vec::new();

        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            check_command_size(command.len(), line.len())?;
            command.extend_from_slice(&line);

            let Some((literal_len, synchronizing)) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }
            check_command_size(command.len(), literal_len)?;
            if synchronizing {
                self.write_raw(CONTINUATION).await?;
            }

            let mut literal = vec![0u8; literal_len];
            if self.reader.read_exact(&mut literal).await.is_err() {
                return Ok(None);
            }
            command.extend_from_slice(&literal);
        }

        Ok(Some(command))
    }

    /// Reads a single LF-terminated line, keeping the line ending.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let limit = MAX_LINE_LENGTH as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;

        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") {
            if n >= MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
            // Closed in the middle of a line
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Queues a response line; CRLF is appended.
    pub fn queue_line(&mut self, line: &str) {
        self.write_buffer.put_slice(line.as_bytes());
        self.write_buffer.put_slice(b"\r\n");
    }

    /// Queues raw bytes, such as a FETCH response carrying literals.
    pub fn queue_bytes(&mut self, data: &[u8]) {
        self.write_buffer.put_slice(data);
    }

    /// Writes everything queued so far.
    pub async fn flush(&mut self) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        self.write_buffer.clear();
        Ok(())
    }

    /// Writes raw data to the stream immediately, ahead of anything queued.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Fails once a command would grow past [`MAX_COMMAND_SIZE`].
fn check_command_size(current: usize, additional: usize) -> Result<()> {
    if current.saturating_add(additional) > MAX_COMMAND_SIZE {
        return Err(Error::Protocol(format!(
            "command too large (max {MAX_COMMAND_SIZE} bytes)"
        )));
    }
    Ok(())
}

/// Parses a literal length from the end of a line.
///
/// Matches patterns like `{123}\r\n` or `{123+}\r\n` (non-synchronizing) and
/// returns the length and whether a continuation request is needed.
fn parse_literal_length(line: &[u8]) -> Option<(usize, bool)> {
    let line = line
        .strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))?;
    let line = line.strip_suffix(b"}")?;

    let (line, synchronizing) = match line.strip_suffix(b"+") {
        Some(rest) => (rest, false),
        None => (line, true),
    };

    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let len = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some((len, synchronizing))
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
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"a LOGIN {5}\r\n"), Some((5, true)));
        assert_eq!(parse_literal_length(b"a LOGIN {12+}\r\n"), Some((12, false)));
        assert_eq!(parse_literal_length(b"a LOGIN {0}\n"), Some((0, true)));
        assert_eq!(parse_literal_length(b"a NOOP\r\n"), None);
        assert_eq!(parse_literal_length(b"a {x}\r\n"), None);
        assert_eq!(parse_literal_length(b"a {}\r\n"), None);
        assert_eq!(parse_literal_length(b"a {5}"), None);
        assert_eq!(parse_literal_length(b"a {99999999999999999999999}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_plain_commands() {
        let mock = Builder::new().read(b"a1 NOOP\r\na2 LOGOUT\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_command().await.unwrap().unwrap(), b"a1 NOOP\r\n");
        assert_eq!(framed.read_command().await.unwrap().unwrap(), b"a2 LOGOUT\r\n");
        assert_eq!(framed.read_command().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_synchronizing_literal() {
        let mock = Builder::new()
            .read(b"a1 LOGIN {5}\r\n")
            .write(CONTINUATION)
            .read(b"alice secret\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(
            framed.read_command().await.unwrap().unwrap(),
            b"a1 LOGIN {5}\r\nalice secret\r\n"
        );
    }

    #[tokio::test]
    async fn test_non_synchronizing_literal() {
        let mock = Builder::new().read(b"a1 LOGIN {5+}\r\nalice bob\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(
            framed.read_command().await.unwrap().unwrap(),
            b"a1 LOGIN {5+}\r\nalice bob\r\n"
        );
    }

    #[tokio::test]
    async fn test_literal_too_large() {
        let line = format!("a1 LOGIN {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        assert!(matches!(
            framed.read_command().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_command_size_is_bounded_across_literals() {
        let half = MAX_LITERAL_SIZE / 2;
        let header = format!("a1 APPEND INBOX {{{half}+}}\r\n");
        let first = vec![b'x'; half];
        let mut second = format!(" {{{half}+}}\r\n").into_bytes();
        second.extend(std::iter::repeat_n(b'y', half));
        let third = format!(" {{{half}+}}\r\n");
        let mock = Builder::new()
            .read(header.as_bytes())
            .read(&first)
            .read(&second)
            .read(third.as_bytes())
            .build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_command().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.starts_with("command too large")));
    }

    #[test]
    fn test_check_command_size() {
        assert!(check_command_size(0, MAX_COMMAND_SIZE).is_ok());
        assert!(check_command_size(1, MAX_COMMAND_SIZE).is_err());
        assert!(check_command_size(usize::MAX, 1).is_err());
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let long = vec![b'a'; MAX_LINE_LENGTH];
        let mock = Builder::new().read(&long).build();
        let mut framed = FramedStream::new(mock);

        assert!(matches!(
            framed.read_command().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_and_flush() {
        let mock = Builder::new()
            .write(b"* OK hello\r\nliteral a1 OK done\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        framed.queue_line("* OK hello");
        framed.queue_bytes(b"literal ");
        framed.queue_line("a1 OK done");
        framed.flush().await.unwrap();
    }
}
