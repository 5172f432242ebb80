//! POP3 command parsing.
//!
//! A command is a case-insensitive keyword followed by its arguments. `PASS`
//! takes the rest of the line verbatim so passwords may contain spaces.

use std::fmt;

/// A parsed POP3 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `USER name`; empty when the argument was missing.
    User(String),
    /// `PASS password`; empty when the argument was missing.
    Pass(String),
    /// `STAT`
    Stat,
    /// `LIST [n]`
    List(Option<u32>),
    /// `RETR n`
    Retr(u32),
    /// `DELE n`
    Dele(u32),
    /// `NOOP`
    Noop,
    /// `RSET`
    Rset,
    /// `UIDL [n]`
    Uidl(Option<u32>),
    /// `TOP n lines`
    Top {
        /// Message number.
        message: u32,
        /// Body lines to include.
        lines: usize,
    },
    /// `CAPA`
    Capa,
    /// `QUIT`
    Quit,
    /// Anything else.
    Unrecognized(String),
}

/// A command whose arguments did not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Whether the command is only valid after authentication.
    pub needs_auth: bool,
    /// Text for the `-ERR` reply.
    pub message: &'static str,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl Command {
    /// Parses a command line without its line ending.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when a transaction command has a missing or
    /// malformed argument.
    pub fn parse(line: &str) -> Result<Self, Rejection> {
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(verb, args)| (verb, args));
        let verb = verb.to_ascii_uppercase();
        let trimmed = args.trim();

        Ok(match verb.as_str() {
            "USER" => Self::User(trimmed.to_string()),
            "PASS" => Self::Pass(args.to_string()),
            "STAT" => Self::Stat,
            "LIST" => Self::List(optional_number(trimmed)?),
            "RETR" => Self::Retr(required_number(trimmed)?),
            "DELE" => Self::Dele(required_number(trimmed)?),
            "NOOP" => Self::Noop,
            "RSET" => Self::Rset,
            "UIDL" => Self::Uidl(optional_number(trimmed)?),
            "TOP" => parse_top(trimmed)?,
            "CAPA" => Self::Capa,
            "QUIT" => Self::Quit,
            _ => Self::Unrecognized(verb),
        })
    }

    /// Returns the command keyword.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::Stat => "STAT",
            Self::List(_) => "LIST",
            Self::Retr(_) => "RETR",
            Self::Dele(_) => "DELE",
            Self::Noop => "NOOP",
            Self::Rset => "RSET",
            Self::Uidl(_) => "UIDL",
            Self::Top { .. } => "TOP",
            Self::Capa => "CAPA",
            Self::Quit => "QUIT",
            Self::Unrecognized(_) => "?",
        }
    }

    /// Returns true for commands of the TRANSACTION state.
    #[must_use]
    pub const fn needs_auth(&self) -> bool {
        matches!(
            self,
            Self::Stat
                | Self::List(_)
                | Self::Retr(_)
                | Self::Dele(_)
                | Self::Rset
                | Self::Uidl(_)
                | Self::Top { .. }
        )
    }
}

const fn reject(message: &'static str) -> Rejection {
    Rejection {
        needs_auth: true,
        message,
    }
}

fn number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn required_number(arg: &str) -> Result<u32, Rejection> {
    if arg.is_empty() {
        return Err(reject("Missing message number"));
    }
    number(arg).ok_or(reject("Invalid message number"))
}

fn optional_number(arg: &str) -> Result<Option<u32>, Rejection> {
    if arg.is_empty() {
        return Ok(None);
    }
    number(arg)
        .map(Some)
        .ok_or(reject("Invalid message number"))
}

fn parse_top(args: &str) -> Result<Command, Rejection> {
    if args.is_empty() {
        return Err(reject("Missing arguments"));
    }
    let mut parts = args.split_whitespace();
    let invalid = reject("Invalid arguments");
    let message = parts.next().and_then(number).ok_or(invalid)?;
    let lines = match parts.next() {
        Some(n) => number(n).ok_or(invalid)? as usize,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(invalid);
    }
    Ok(Command::Top { message, lines })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_keywords_case_insensitive() {
        assert_eq!(Command::parse("stat").unwrap(), Command::Stat);
        assert_eq!(Command::parse("Quit").unwrap(), Command::Quit);
        assert_eq!(Command::parse("CAPA").unwrap(), Command::Capa);
        assert_eq!(
            Command::parse("xtnd foo").unwrap(),
            Command::Unrecognized("XTND".to_string())
        );
    }

    #[test]
    fn test_parse_credentials() {
        assert_eq!(
            Command::parse("USER alice").unwrap(),
            Command::User("alice".to_string())
        );
        assert_eq!(Command::parse("USER").unwrap(), Command::User(String::new()));
        assert_eq!(
            Command::parse("PASS correct horse battery").unwrap(),
            Command::Pass("correct horse battery".to_string())
        );
    }

    #[test]
    fn test_parse_message_numbers() {
        assert_eq!(Command::parse("LIST").unwrap(), Command::List(None));
        assert_eq!(Command::parse("LIST 3").unwrap(), Command::List(Some(3)));
        assert_eq!(Command::parse("RETR 12").unwrap(), Command::Retr(12));
        assert_eq!(Command::parse("UIDL 1").unwrap(), Command::Uidl(Some(1)));

        let missing = Command::parse("DELE").unwrap_err();
        assert_eq!(missing.message, "Missing message number");
        assert!(missing.needs_auth);
        assert_eq!(
            Command::parse("RETR one").unwrap_err().message,
            "Invalid message number"
        );
        assert_eq!(
            Command::parse("LIST -1").unwrap_err().message,
            "Invalid message number"
        );
    }

    #[test]
    fn test_parse_top() {
        assert_eq!(
            Command::parse("TOP 2 10").unwrap(),
            Command::Top {
                message: 2,
                lines: 10
            }
        );
        assert_eq!(
            Command::parse("TOP 2").unwrap(),
            Command::Top {
                message: 2,
                lines: 0
            }
        );
        assert_eq!(Command::parse("TOP").unwrap_err().message, "Missing arguments");
        assert_eq!(Command::parse("TOP x 1").unwrap_err().message, "Invalid arguments");
        assert_eq!(Command::parse("TOP 1 2 3").unwrap_err().message, "Invalid arguments");
    }

    #[test]
    fn test_needs_auth() {
        assert!(Command::Stat.needs_auth());
        assert!(Command::Retr(1).needs_auth());
        assert!(!Command::Quit.needs_auth());
        assert!(!Command::Capa.needs_auth());
        assert!(!Command::User(String::new()).needs_auth());
    }

    proptest! {
        #[test]
        fn parse_never_panics(line in "[ -~]{0,40}") {
            let _ = Command::parse(&line);
        }
    }
}
