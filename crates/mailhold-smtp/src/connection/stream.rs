//! Low-level SMTP stream handling.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};
use crate::types::Reply;

/// Longest command line accepted, including CRLF.
pub const MAX_LINE: usize = 4096;

/// Outcome of reading a DATA section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBody {
    /// The message, dot-unstuffed, without the terminating `.` line.
    Message(Vec<u8>),
    /// The terminator was reached but the message exceeded the limit.
    TooLarge,
    /// The client went away before the terminator.
    Closed,
}

/// Buffered server side of an SMTP connection.
#[derive(Debug)]
pub struct SmtpStream<S> {
    inner: BufReader<S>,
}

impl<S> SmtpStream<S>
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
            // EOF in the middle of a line
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Returns true if the client has sent bytes that have not been read yet.
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        !self.inner.buffer().is_empty()
    }

    /// Drops every buffered byte the client sent ahead of our reply.
    pub fn discard_pending_input(&mut self) {
        let pending = self.inner.buffer().len();
        self.inner.consume(pending);
    }

    /// Reads a DATA section up to the `.` line, undoing dot-stuffing.
    ///
    /// The section ends only at `.` CRLF directly after a CRLF. A bare LF
    /// never ends a line for this purpose, so `.` LF is message content.
    /// Once more than `max_size` bytes have arrived the rest of the section is
    /// read and thrown away, so the connection stays in sync.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub async fn read_data(&mut self, max_size: usize) -> Result<DataBody> {
        let mut message = Vec::new();
        let mut chunk = Vec::new();
        let mut too_large = false;
        // Whether the previous chunk ended a line, and whether it ended in CRLF
        let mut line_start = true;
        let mut after_crlf = true;
        let limit = u64::try_from(max_size)
            .unwrap_or(u64::MAX)
            .saturating_add(3);

        loop {
            chunk.clear();
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut chunk)
                .await?;
            if n == 0 {
                return Ok(DataBody::Closed);
            }
            let complete = chunk.ends_with(b"\n");
            if !complete && (n as u64) < limit {
                return Ok(DataBody::Closed);
            }
            if after_crlf && chunk == b".\r\n" {
                break;
            }

            let content = if line_start && is_stuffed(&chunk) {
                &chunk[1..]
            } else {
                &chunk[..]
            };
            line_start = complete;
            after_crlf = chunk.ends_with(b"\r\n");

            if too_large {
                continue;
            }
            if message.len() + content.len() > max_size {
                too_large = true;
                message = Vec::new();
                continue;
            }
            message.extend_from_slice(content);
        }

        Ok(if too_large {
            DataBody::TooLarge
        } else {
            DataBody::Message(message)
        })
    }

    /// Writes a reply and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(reply.to_wire().as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// A line starting with `.` that carries more than the dot and its line
/// ending has had a dot added by the client.
fn is_stuffed(line: &[u8]) -> bool {
    match line.strip_prefix(b".") {
        Some(rest) => !matches!(rest, b"\n" | b"\r\n"),
        None => false,
    }
}
