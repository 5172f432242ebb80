//! Buffered POP3 stream: command lines in, status lines and dot-stuffed
//! multi-line responses out.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

/// Longest command line accepted, including CRLF.
pub const MAX_LINE: usize = 1024;

/// Buffered server side of a POP3 connection.
#[derive(Debug)]
pub struct Pop3Stream<S> {
    inner: BufReader<S>,
}

impl<S> Pop3Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Reads a command line, without its line ending.
    ///
    /// Returns `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the line exceeds [`MAX_LINE`].
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !buf.ends_with(b"\n") {
            if n >= MAX_LINE {
                return Err(Error::LineTooLong(MAX_LINE));
            }
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Writes one status line and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut out = Vec::with_capacity(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.write_all(&out).await
    }

    /// Writes a status line followed by `body`, dot-stuffed and terminated
    /// by a `.` line.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_multiline(&mut self, status: &str, body: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(status.len() + body.len() + 16);
        out.extend_from_slice(status.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&dot_stuff(body));
        out.extend_from_slice(b".\r\n");
        self.write_all(&out).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Doubles a leading `.` on every line and makes sure the data ends with a
/// line break, so the terminator always sits on its own line.
#[must_use]
pub fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    let mut at_line_start = true;
    for &byte in body {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }
    if !body.is_empty() && !at_line_start {
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_dot_stuff() {
        assert_eq!(dot_stuff(b"a\r\n.b\r\n..c\r\n"), b"a\r\n..b\r\n...c\r\n");
        assert_eq!(dot_stuff(b".\r\n"), b"..\r\n");
        assert_eq!(dot_stuff(b"no newline"), b"no newline\r\n");
        assert_eq!(dot_stuff(b""), b"");
        assert_eq!(dot_stuff(b"x.y\n.z\n"), b"x.y\n..z\n");
    }

    #[tokio::test]
    async fn test_read_lines() {
        let mock = Builder::new().read(b"USER alice\r\nSTAT\n").build();
        let mut stream = Pop3Stream::new(mock);

        assert_eq!(stream.read_line().await.unwrap().unwrap(), "USER alice");
        assert_eq!(stream.read_line().await.unwrap().unwrap(), "STAT");
        assert_eq!(stream.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let long = vec![b'A'; MAX_LINE];
        let mock = Builder::new().read(&long).build();
        let mut stream = Pop3Stream::new(mock);

        assert!(matches!(
            stream.read_line().await,
            Err(Error::LineTooLong(MAX_LINE))
        ));
    }

    #[tokio::test]
    async fn test_write_multiline() {
        let mock = Builder::new()
            .write(b"+OK 9 octets\r\nhi\r\n..dot\r\n.\r\n")
            .build();
        let mut stream = Pop3Stream::new(mock);
        stream
            .write_multiline("+OK 9 octets", b"hi\r\n.dot\r\n")
            .await
            .unwrap();
    }

    proptest! {
        #[test]
        fn unstuffing_restores_body(lines in proptest::collection::vec("[.a-z]{0,6}", 0..8)) {
            let body: String = lines.iter().map(|l| format!("{l}\r\n")).collect();
            let stuffed = dot_stuff(body.as_bytes());
            let restored: String = String::from_utf8(stuffed)
                .unwrap()
                .split_inclusive("\r\n")
                .map(|line| line.strip_prefix('.').unwrap_or(line))
                .collect();
            prop_assert_eq!(restored, body);
        }
    }
}
