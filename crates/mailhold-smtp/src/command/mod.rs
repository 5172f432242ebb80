//! SMTP commands as received from the client.

use crate::error::{Error, Result};
use crate::parser::{parse_mail_params, parse_path};
use crate::types::{Address, AuthMechanism, ReversePath};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender path
        from: ReversePath,
        /// BODY parameter (7BIT, 8BITMIME)
        body: Option<String>,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address to verify
        address: String,
    },
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// Any verb the server does not know.
    Unrecognized(String),
}

impl Command {
    /// Parses a command line (without the trailing CRLF).
    ///
    /// Unknown verbs yield [`Command::Unrecognized`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] or [`Error::InvalidAddress`] if a known verb
    /// has malformed arguments, and [`Error::UnsupportedMechanism`] for an
    /// AUTH mechanism other than PLAIN or LOGIN.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(verb, args)| (verb, args.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Self::Helo {
                hostname: required(args, "HELO requires a hostname")?,
            }),
            "EHLO" => Ok(Self::Ehlo {
                hostname: required(args, "EHLO requires a hostname")?,
            }),
            "STARTTLS" => no_args(args, Self::StartTls),
            "AUTH" => Self::parse_auth(args),
            "MAIL" => {
                let (path, params) = parse_path(args, "FROM:")?;
                let from = if path.is_empty() {
                    ReversePath::Null
                } else {
                    ReversePath::Address(Address::new(path)?)
                };
                let params = parse_mail_params(params)?;
                Ok(Self::MailFrom {
                    from,
                    body: params.body,
                    size: params.size,
                })
            }
            "RCPT" => {
                let (path, _params) = parse_path(args, "TO:")?;
                Ok(Self::RcptTo {
                    to: Address::new(path)?,
                })
            }
            "DATA" => no_args(args, Self::Data),
            "RSET" => no_args(args, Self::Rset),
            "VRFY" => Ok(Self::Vrfy {
                address: required(args, "VRFY requires an argument")?,
            }),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => no_args(args, Self::Quit),
            _ => Ok(Self::Unrecognized(verb.to_string())),
        }
    }

    fn parse_auth(args: &str) -> Result<Self> {
        let mut parts = args.split_ascii_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| Error::syntax("AUTH requires a mechanism"))?;
        let mechanism = AuthMechanism::parse(name)
            .ok_or_else(|| Error::UnsupportedMechanism(name.to_string()))?;
        let initial_response = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(Error::syntax("too many AUTH arguments"));
        }
        Ok(Self::Auth {
            mechanism,
            initial_response,
        })
    }

    /// The command verb, for logging.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy { .. } => "VRFY",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Unrecognized(_) => "?",
        }
    }

    /// Returns true for commands after which the client must wait for a
    /// reply before sending more, since PIPELINING is not offered.
    #[must_use]
    pub const fn must_end_input(&self) -> bool {
        matches!(
            self,
            Self::Helo { .. } | Self::Ehlo { .. } | Self::Auth { .. } | Self::Data
        )
    }
}

fn required(args: &str, message: &str) -> Result<String> {
    if args.is_empty() {
        Err(Error::syntax(message))
    } else {
        Ok(args.to_string())
    }
}

fn no_args(args: &str, command: Command) -> Result<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(Error::syntax(format!(
            "{} takes no arguments",
            command.verb()
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_greetings() {
        assert_eq!(
            Command::parse("EHLO client.example.com").unwrap(),
            Command::Ehlo {
                hostname: "client.example.com".to_string()
            }
        );
        assert_eq!(
            Command::parse("helo client\r\n").unwrap(),
            Command::Helo {
                hostname: "client".to_string()
            }
        );
        assert!(matches!(Command::parse("EHLO"), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_mail_from() {
        assert_eq!(
            Command::parse("MAIL FROM:<sender@example.com> SIZE=12345 BODY=8BITMIME").unwrap(),
            Command::MailFrom {
                from: ReversePath::Address(Address::new("sender@example.com").unwrap()),
                body: Some("8BITMIME".to_string()),
                size: Some(12345),
            }
        );
        assert_eq!(
            Command::parse("mail from:<>").unwrap(),
            Command::MailFrom {
                from: ReversePath::Null,
                body: None,
                size: None,
            }
        );
        assert!(Command::parse("MAIL sender@example.com").is_err());
        assert!(Command::parse("MAIL FROM:<not an address>").is_err());
    }

    #[test]
    fn test_rcpt_to() {
        let cmd = Command::parse("RCPT TO:<user@unknown-domain.test>").unwrap();
        let Command::RcptTo { to } = cmd else {
            panic!("expected RCPT");
        };
        assert_eq!(to.domain(), "unknown-domain.test");
        assert!(Command::parse("RCPT TO:<>").is_err());
    }

    #[test]
    fn test_auth() {
        assert_eq!(
            Command::parse("AUTH PLAIN AGFsaWNlAHNlY3JldA==").unwrap(),
            Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some("AGFsaWNlAHNlY3JldA==".to_string()),
            }
        );
        assert_eq!(
            Command::parse("auth login").unwrap(),
            Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            }
        );
        assert!(matches!(
            Command::parse("AUTH CRAM-MD5"),
            Err(Error::UnsupportedMechanism(_))
        ));
        assert!(matches!(Command::parse("AUTH"), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::parse("DATA").unwrap(), Command::Data);
        assert_eq!(Command::parse("rset").unwrap(), Command::Rset);
        assert_eq!(Command::parse("NOOP ignored").unwrap(), Command::Noop);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
        assert_eq!(Command::parse("STARTTLS").unwrap(), Command::StartTls);
        assert!(Command::parse("DATA now").is_err());
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(
            Command::parse("FOOBAR baz").unwrap(),
            Command::Unrecognized("FOOBAR".to_string())
        );
        assert_eq!(
            Command::parse("").unwrap(),
            Command::Unrecognized(String::new())
        );
    }

    #[test]
    fn test_must_end_input() {
        assert!(Command::Data.must_end_input());
        assert!(!Command::Noop.must_end_input());
        assert!(!Command::Rset.must_end_input());
    }

    proptest! {
        #[test]
        fn parse_never_panics(line in "\\PC{0,200}") {
            let _ = Command::parse(&line);
        }

        #[test]
        fn mail_from_paths_parse(local in "[a-z0-9.]{1,20}", domain in "[a-z0-9]{1,20}\\.[a-z]{2,6}") {
            let line = format!("MAIL FROM:<{local}@{domain}>");
            let parsed = Command::parse(&line).unwrap();
            let Command::MailFrom { from: ReversePath::Address(address), .. } = parsed else {
                panic!("expected MAIL FROM");
            };
            prop_assert_eq!(address.domain(), domain.as_str());
        }
    }
}
