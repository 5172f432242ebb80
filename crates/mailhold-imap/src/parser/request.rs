//! Command line parser.

use chrono::NaiveDate;
use mailhold_core::{FlagUpdate, MessageFlags};

use super::lexer::{Lexer, Token};
use crate::command::{Command, FetchAttribute, SearchKey, Section, StatusAttribute};
use crate::types::{UidSet, parse_store_flag};
use crate::{Error, Result};

/// Nesting limit for parenthesised, NOT and OR search keys.
const MAX_SEARCH_DEPTH: usize = 32;

/// A tagged client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client tag, echoed in the completion reply.
    pub tag: String,
    /// The command.
    pub command: Command,
}

/// A line that cannot be dispatched; answered with `<tag> BAD <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Tag to answer with, `*` when the line had no usable tag.
    pub tag: String,
    /// Reply text.
    pub message: String,
}

impl Rejection {
    fn new(tag: &str, message: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            message: message.into(),
        }
    }

    /// The reply line, without CRLF.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} BAD {}", self.tag, self.message)
    }
}

/// Parses one framed command line, literals included.
///
/// Unknown verbs become [`Command::Unrecognized`]; everything that cannot be
/// parsed becomes a [`Rejection`].
///
/// # Errors
///
/// Returns a [`Rejection`] for an empty line, a missing command or malformed
/// arguments.
pub fn parse_request(line: &[u8]) -> std::result::Result<Request, Rejection> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(Rejection::new("*", "Empty command line"));
    }

    let mut lexer = Lexer::new(line);
    let tag = match lexer.read_atom_string() {
        Ok(tag) if !tag.contains('+') => tag.to_string(),
        _ => return Err(Rejection::new("*", "Invalid tag")),
    };

    let verb = match lexer.expect_space() {
        Ok(()) => lexer.read_atom_string().ok(),
        Err(_) => None,
    };
    let Some(verb) = verb else {
        return Err(Rejection::new(&tag, "Missing command"));
    };

    match parse_command(&mut lexer, verb) {
        Ok(command) => Ok(Request { tag, command }),
        Err(Error::Parse { message, .. }) => Err(Rejection::new(&tag, message)),
        Err(e) => Err(Rejection::new(&tag, e.to_string())),
    }
}

fn parse_command(lexer: &mut Lexer<'_>, verb: &str) -> Result<Command> {
    let command = match verb.to_ascii_uppercase().as_str() {
        "CAPABILITY" => Command::Capability,
        "NOOP" => Command::Noop,
        "LOGOUT" => Command::Logout,
        "CHECK" => Command::Check,
        "CLOSE" => Command::Close,
        "EXPUNGE" => Command::Expunge,
        "LOGIN" => {
            let username = argument(lexer, "Missing username or password")?;
            let password = argument(lexer, "Missing username or password")?;
            Command::Login { username, password }
        }
        "AUTHENTICATE" => {
            let mechanism = atom_argument(lexer, "Missing mechanism")?.to_string();
            // An initial response is read and ignored
            if lexer.peek() == Some(b' ') {
                atom_argument(lexer, "Invalid initial response")?;
            }
            Command::Authenticate { mechanism }
        }
        "SELECT" => Command::Select {
            mailbox: argument(lexer, "Missing mailbox name")?,
        },
        "EXAMINE" => Command::Examine {
            mailbox: argument(lexer, "Missing mailbox name")?,
        },
        "CREATE" => Command::Create {
            mailbox: argument(lexer, "Missing mailbox name")?,
        },
        "SUBSCRIBE" => Command::Subscribe {
            mailbox: argument(lexer, "Missing mailbox name")?,
        },
        "UNSUBSCRIBE" => Command::Unsubscribe {
            mailbox: argument(lexer, "Missing mailbox name")?,
        },
        "LIST" | "LSUB" => {
            let reference = argument(lexer, "Missing reference or pattern")?;
            let pattern = argument(lexer, "Missing reference or pattern")?;
            if verb.eq_ignore_ascii_case("LIST") {
                Command::List { reference, pattern }
            } else {
                Command::Lsub { reference, pattern }
            }
        }
        "STATUS" => {
            let mailbox = argument(lexer, "Missing mailbox name")?;
            let items = relabel(parse_status_items(lexer), lexer, "Invalid status items")?;
            Command::Status { mailbox, items }
        }
        "FETCH" => parse_fetch(lexer)?,
        "SEARCH" => parse_search(lexer)?,
        "STORE" => parse_store(lexer)?,
        "UID" => {
            let sub = atom_argument(lexer, "Missing command")?;
            match sub.to_ascii_uppercase().as_str() {
                "FETCH" => parse_fetch(lexer)?,
                "SEARCH" => parse_search(lexer)?,
                "STORE" => parse_store(lexer)?,
                _ => return Ok(Command::Unrecognized(format!("UID {sub}"))),
            }
        }
        _ => return Ok(Command::Unrecognized(verb.to_string())),
    };

    if lexer.at_end() {
        Ok(command)
    } else {
        Err(lexer.error("Unexpected arguments"))
    }
}

/// Replaces the message of a failed sub-parse.
fn relabel<T>(result: Result<T>, lexer: &Lexer<'_>, message: &str) -> Result<T> {
    result.map_err(|_| lexer.error(message))
}

/// Reads `SP astring`.
fn argument(lexer: &mut Lexer<'_>, missing: &str) -> Result<String> {
    let value = match lexer.expect_space() {
        Ok(()) => lexer.read_astring(),
        Err(e) => Err(e),
    };
    relabel(value, lexer, missing)
}

/// Reads `SP atom`.
fn atom_argument<'a>(lexer: &mut Lexer<'a>, missing: &str) -> Result<&'a str> {
    let value = match lexer.expect_space() {
        Ok(()) => lexer.read_atom_string(),
        Err(e) => Err(e),
    };
    relabel(value, lexer, missing)
}

fn uid_set_argument(lexer: &mut Lexer<'_>) -> Result<UidSet> {
    let set = atom_argument(lexer, "Invalid message set")?;
    UidSet::parse(set).ok_or_else(|| lexer.error("Invalid message set"))
}

fn parse_status_items(lexer: &mut Lexer<'_>) -> Result<Vec<StatusAttribute>> {
    lexer.expect_space()?;
    if lexer.next_token()? != Token::LParen {
        return Err(lexer.error("Expected ("));
    }
    let mut items = Vec::new();
    loop {
        let name = lexer.read_atom_string()?;
        items.push(StatusAttribute::parse(name).ok_or_else(|| lexer.error("Unknown item"))?);
        match lexer.next_token()? {
            Token::Space => {}
            Token::RParen => return Ok(items),
            _ => return Err(lexer.error("Expected )")),
        }
    }
}

fn parse_fetch(lexer: &mut Lexer<'_>) -> Result<Command> {
    let set = uid_set_argument(lexer)?;
    let items = relabel(parse_fetch_items(lexer), lexer, "Invalid fetch items")?;
    Ok(Command::Fetch { set, items })
}

fn parse_fetch_items(lexer: &mut Lexer<'_>) -> Result<Vec<FetchAttribute>> {
    lexer.expect_space()?;
    if lexer.peek() != Some(b'(') {
        let name = lexer.read_atom_string()?;
        if name.eq_ignore_ascii_case("FAST") {
            return Ok(FetchAttribute::FAST.to_vec());
        }
        return Ok(vec![parse_fetch_attribute(lexer, name)?]);
    }

    lexer.next_token()?;
    let mut items = Vec::new();
    loop {
        let name = lexer.read_atom_string()?;
        items.push(parse_fetch_attribute(lexer, name)?);
        match lexer.next_token()? {
            Token::Space => {}
            Token::RParen => return Ok(items),
            _ => return Err(lexer.error("Expected )")),
        }
    }
}

fn parse_fetch_attribute(lexer: &mut Lexer<'_>, name: &str) -> Result<FetchAttribute> {
    let attribute = match name.to_ascii_uppercase().as_str() {
        "FLAGS" => FetchAttribute::Flags,
        "UID" => FetchAttribute::Uid,
        "INTERNALDATE" => FetchAttribute::InternalDate,
        "RFC822.SIZE" => FetchAttribute::Rfc822Size,
        "RFC822" => FetchAttribute::Rfc822,
        "RFC822.HEADER" => FetchAttribute::Rfc822Header,
        "RFC822.TEXT" => FetchAttribute::Rfc822Text,
        "BODY" | "BODY.PEEK" => {
            let peek = name.len() > "BODY".len();
            if lexer.next_token()? != Token::LBracket {
                return Err(lexer.error("Unsupported fetch item"));
            }
            let section = match lexer.next_token()? {
                Token::RBracket => Section::Full,
                Token::Atom(s) => {
                    let section = match s.to_ascii_uppercase().as_str() {
                        "HEADER" => Section::Header,
                        "TEXT" => Section::Text,
                        _ => return Err(lexer.error("Unsupported section")),
                    };
                    if lexer.next_token()? != Token::RBracket {
                        return Err(lexer.error("Expected ]"));
                    }
                    section
                }
                _ => return Err(lexer.error("Unsupported section")),
            };
            FetchAttribute::Body { section, peek }
        }
        _ => return Err(lexer.error("Unsupported fetch item")),
    };
    Ok(attribute)
}

fn parse_search(lexer: &mut Lexer<'_>) -> Result<Command> {
    let criteria = relabel(parse_search_keys(lexer), lexer, "Invalid search criteria")?;
    Ok(Command::Search { criteria })
}

fn parse_search_keys(lexer: &mut Lexer<'_>) -> Result<Vec<SearchKey>> {
    let mut criteria = Vec::new();
    while !lexer.at_end() {
        lexer.expect_space()?;
        if criteria.is_empty() && lexer.remaining().len() >= 8 {
            let word = &lexer.remaining()[..8];
            if word.eq_ignore_ascii_case(b"CHARSET ") {
                // Every charset is treated as UTF-8
                lexer.read_atom_string()?;
                lexer.expect_space()?;
                lexer.read_astring()?;
                continue;
            }
        }
        criteria.push(parse_search_key(lexer, 0)?);
    }
    Ok(criteria)
}

fn parse_search_key(lexer: &mut Lexer<'_>, depth: usize) -> Result<SearchKey> {
    if depth > MAX_SEARCH_DEPTH {
        return Err(lexer.error("Search criteria nested too deeply"));
    }

    if lexer.peek() == Some(b'(') {
        lexer.next_token()?;
        let mut keys = Vec::new();
        loop {
            keys.push(parse_search_key(lexer, depth + 1)?);
            match lexer.next_token()? {
                Token::Space => {}
                Token::RParen => return Ok(SearchKey::And(keys)),
                _ => return Err(lexer.error("Expected )")),
            }
        }
    }

    let word = lexer.read_atom_string()?;
    let key = match word.to_ascii_uppercase().as_str() {
        "ALL" => SearchKey::All,
        "ANSWERED" => SearchKey::Answered,
        "DELETED" => SearchKey::Deleted,
        "DRAFT" => SearchKey::Draft,
        "FLAGGED" => SearchKey::Flagged,
        "NEW" => SearchKey::New,
        "OLD" => SearchKey::Old,
        "RECENT" => SearchKey::Recent,
        "SEEN" => SearchKey::Seen,
        "UNANSWERED" => SearchKey::Unanswered,
        "UNDELETED" => SearchKey::Undeleted,
        "UNDRAFT" => SearchKey::Undraft,
        "UNFLAGGED" => SearchKey::Unflagged,
        "UNSEEN" => SearchKey::Unseen,
        "FROM" => SearchKey::From(string_value(lexer)?),
        "TO" => SearchKey::To(string_value(lexer)?),
        "CC" => SearchKey::Cc(string_value(lexer)?),
        "BCC" => SearchKey::Bcc(string_value(lexer)?),
        "SUBJECT" => SearchKey::Subject(string_value(lexer)?),
        "BODY" => SearchKey::Body(string_value(lexer)?),
        "TEXT" => SearchKey::Text(string_value(lexer)?),
        "BEFORE" => SearchKey::Before(date_value(lexer)?),
        "ON" => SearchKey::On(date_value(lexer)?),
        "SINCE" => SearchKey::Since(date_value(lexer)?),
        "LARGER" => {
            lexer.expect_space()?;
            SearchKey::Larger(lexer.read_number()?)
        }
        "SMALLER" => {
            lexer.expect_space()?;
            SearchKey::Smaller(lexer.read_number()?)
        }
        "UID" => SearchKey::Uid(uid_set_argument(lexer)?),
        "NOT" => {
            lexer.expect_space()?;
            SearchKey::Not(Box::new(parse_search_key(lexer, depth + 1)?))
        }
        "OR" => {
            lexer.expect_space()?;
            let left = parse_search_key(lexer, depth + 1)?;
            lexer.expect_space()?;
            let right = parse_search_key(lexer, depth + 1)?;
            SearchKey::Or(Box::new(left), Box::new(right))
        }
        // A bare set; identifiers are UIDs
        _ => SearchKey::Uid(UidSet::parse(word).ok_or_else(|| lexer.error("Unknown key"))?),
    };
    Ok(key)
}

fn string_value(lexer: &mut Lexer<'_>) -> Result<String> {
    lexer.expect_space()?;
    lexer.read_astring()
}

fn date_value(lexer: &mut Lexer<'_>) -> Result<NaiveDate> {
    let text = string_value(lexer)?;
    NaiveDate::parse_from_str(&text, "%d-%b-%Y").map_err(|_| lexer.error("Invalid date"))
}

fn parse_store(lexer: &mut Lexer<'_>) -> Result<Command> {
    let set = uid_set_argument(lexer)?;
    let item = atom_argument(lexer, "Invalid store item")?;

    let (mode, rest) = match item.as_bytes().first() {
        Some(b'+') => (FlagUpdate::Add, &item[1..]),
        Some(b'-') => (FlagUpdate::Remove, &item[1..]),
        _ => (FlagUpdate::Replace, item),
    };
    let silent = if rest.eq_ignore_ascii_case("FLAGS") {
        false
    } else if rest.eq_ignore_ascii_case("FLAGS.SILENT") {
        true
    } else {
        return Err(lexer.error("Invalid store item"));
    };

    lexer.expect_space()?;
    let flags = parse_flag_list(lexer)?;
    Ok(Command::Store {
        set,
        mode,
        flags,
        silent,
    })
}

/// Reads `(flag ...)` or a bare space-separated run of flags.
fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<MessageFlags> {
    let mut flags = MessageFlags::empty();
    let parenthesised = lexer.peek() == Some(b'(');
    if parenthesised {
        lexer.next_token()?;
        if lexer.peek() == Some(b')') {
            lexer.next_token()?;
            return Ok(flags);
        }
    }

    loop {
        let name = lexer.read_atom_string()?;
        flags.insert(parse_store_flag(name).ok_or_else(|| lexer.error("Invalid flag"))?);
        match lexer.next_token()? {
            Token::Space => {}
            Token::RParen if parenthesised => return Ok(flags),
            Token::Crlf | Token::Eof if !parenthesised => return Ok(flags),
            _ => return Err(lexer.error("Invalid flag")),
        }
    }
}
