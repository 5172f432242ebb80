//! SMTP reply types.

use std::fmt::Write as _;

/// SMTP reply sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply message lines.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Creates a single-line reply.
    #[must_use]
    pub fn single(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::new(code, vec![text.into()])
    }

    /// `250 OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::single(ReplyCode::OK, "OK")
    }

    /// Renders the reply for the wire.
    ///
    /// Every line but the last uses the `-` continuation separator:
    /// `250-First\r\n250 Last\r\n`.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        let last = self.message.len().saturating_sub(1);
        if self.message.is_empty() {
            let _ = write!(out, "{}\r\n", self.code);
        }
        for (ix, line) in self.message.iter().enumerate() {
            let sep = if ix == last { ' ' } else { '-' };
            let _ = write!(out, "{}{sep}{line}\r\n", self.code);
        }
        out
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Reply codes used by the session
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 252 Cannot verify user, will attempt delivery
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 454 TLS not available
    pub const TLS_UNAVAILABLE: Self = Self(454);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(ReplyCode::EXCEEDED_STORAGE.to_string(), "552");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn single_line_wire() {
            let reply = Reply::single(ReplyCode::CLOSING, "Bye");
            assert_eq!(reply.to_wire(), "221 Bye\r\n");
        }

        #[test]
        fn multi_line_wire() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec![
                    "mx.example.com".to_string(),
                    "8BITMIME".to_string(),
                    "STARTTLS".to_string(),
                ],
            );
            assert_eq!(
                reply.to_wire(),
                "250-mx.example.com\r\n250-8BITMIME\r\n250 STARTTLS\r\n"
            );
        }

        #[test]
        fn empty_text_keeps_separator() {
            let reply = Reply::single(ReplyCode::AUTH_CONTINUE, "");
            assert_eq!(reply.to_wire(), "334 \r\n");
        }

        #[test]
        fn no_lines() {
            let reply = Reply::new(ReplyCode::OK, vec![]);
            assert_eq!(reply.to_wire(), "250\r\n");
        }

        #[test]
        fn ok_shortcut() {
            assert_eq!(Reply::ok().code, ReplyCode::OK);
            assert_eq!(Reply::ok().to_wire(), "250 OK\r\n");
        }
    }
}
