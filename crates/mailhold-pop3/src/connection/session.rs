//! Server side of one POP3 connection.

use std::net::SocketAddr;

use chrono::Utc;
use mailhold_core::{AuthOutcome, Config, Directory, Email, EmailId, MailStore, Shutdown, UserId};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::stream::Pop3Stream;
use crate::command::Command;
use crate::error::{Error, Result};

/// Settings shared by every POP3 session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Settings {
    /// Product name in the greeting and sign-off.
    pub banner: String,
}

impl Pop3Settings {
    /// Takes the POP3-relevant fields from the server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            banner: config.banner.clone(),
        }
    }
}

/// POP3 server.
#[derive(Debug, Clone)]
pub struct Pop3Server {
    settings: Pop3Settings,
    store: MailStore,
    directory: Directory,
}

impl Pop3Server {
    /// Creates a server over the given store and directory.
    #[must_use]
    pub const fn new(settings: Pop3Settings, store: MailStore, directory: Directory) -> Self {
        Self {
            settings,
            store,
            directory,
        }
    }

    /// Runs one session until QUIT, disconnect or shutdown.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr, mut shutdown: Shutdown)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = info_span!("pop3", %peer);
        async {
            let mut session = Session::new(self, stream);
            match session.run(&mut shutdown).await {
                Ok(()) => debug!("Session closed"),
                Err(e) => debug!("Session ended: {e}"),
            }
        }
        .instrument(span)
        .await;
    }
}

/// The user's INBOX as it was at login, with deletion marks.
#[derive(Debug, Default)]
struct Maildrop {
    messages: Vec<Email>,
    marked: Vec<bool>,
}

impl Maildrop {
    fn new(messages: Vec<Email>) -> Self {
        let marked = vec![false; messages.len()];
        Self { messages, marked }
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Email)> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.marked[*i])
            .map(|(i, email)| (i + 1, email))
    }

    /// Looks up message `n`, or the `-ERR` text explaining why not.
    fn get(&self, n: u32) -> std::result::Result<&Email, String> {
        let index = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < self.messages.len())
            .ok_or_else(|| "Message not found".to_string())?;
        if self.marked[index] {
            return Err(format!("Message {n} already deleted"));
        }
        Ok(&self.messages[index])
    }

    fn mark(&mut self, n: u32) {
        if let Some(slot) = (n as usize).checked_sub(1).and_then(|i| self.marked.get_mut(i)) {
            *slot = true;
        }
    }

    fn reset(&mut self) {
        self.marked.fill(false);
    }

    fn marked_ids(&self) -> Vec<EmailId> {
        self.messages
            .iter()
            .zip(&self.marked)
            .filter(|(_, marked)| **marked)
            .map(|(email, _)| email.id)
            .collect()
    }
}

enum State {
    Authorization { user: Option<String> },
    Transaction { user: UserId, maildrop: Maildrop },
}

enum Flow {
    Continue,
    Close,
}

struct Session<'a, S> {
    server: &'a Pop3Server,
    stream: Pop3Stream<S>,
    state: State,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(server: &'a Pop3Server, stream: S) -> Self {
        Self {
            server,
            stream: Pop3Stream::new(stream),
            state: State::Authorization { user: None },
        }
    }

    async fn run(&mut self, shutdown: &mut Shutdown) -> Result<()> {
        let greeting = format!(
            "+OK {} POP3 server ready {}",
            self.server.settings.banner,
            Utc::now().format("%d-%b-%Y %H:%M:%S")
        );
        self.stream.write_line(&greeting).await?;

        loop {
            let line = tokio::select! {
                line = self.stream.read_line() => Some(line),
                () = shutdown.recv() => None,
            };
            let line = match line {
                None => {
                    self.stream.write_line("-ERR Server shutting down").await?;
                    return Ok(());
                }
                Some(Err(Error::LineTooLong(limit))) => {
                    self.stream.write_line("-ERR Line too long").await?;
                    return Err(Error::LineTooLong(limit));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(None)) => return Ok(()),
                Some(Ok(Some(line))) => line,
            };
            if line.trim().is_empty() {
                continue;
            }

            if let Flow::Close = self.dispatch(&line).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let authenticated = matches!(self.state, State::Transaction { .. });
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(rejection) => {
                let text = if rejection.needs_auth && !authenticated {
                    "Not authenticated"
                } else {
                    rejection.message
                };
                self.stream.write_line(&format!("-ERR {text}")).await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(command = command.verb(), "Received command");

        if command.needs_auth() && !authenticated {
            self.stream.write_line("-ERR Not authenticated").await?;
            return Ok(Flow::Continue);
        }

        match command {
            Command::User(name) => self.user(name).await?,
            Command::Pass(password) => {
                if let Err(e) = self.pass(&password).await {
                    return self.internal_error(e).await;
                }
            }
            Command::Quit => return self.quit().await,
            Command::Capa => {
                self.stream
                    .write_multiline("+OK Capability list follows", b"USER\r\nTOP\r\nUIDL\r\n")
                    .await?;
            }
            Command::Noop => self.stream.write_line("+OK").await?,
            Command::Unrecognized(verb) => {
                debug!("Unrecognized command {verb:?}");
                self.stream.write_line("-ERR Unknown command").await?;
            }
            command => self.transaction(command).await?,
        }
        Ok(Flow::Continue)
    }

    async fn user(&mut self, name: String) -> Result<()> {
        let State::Authorization { user } = &mut self.state else {
            return self.stream.write_line("-ERR Already authenticated").await;
        };
        if name.is_empty() {
            return self.stream.write_line("-ERR Missing username").await;
        }
        *user = Some(name);
        self.stream.write_line("+OK Username accepted").await
    }

    async fn pass(&mut self, password: &str) -> Result<()> {
        let State::Authorization { user } = &mut self.state else {
            return self.stream.write_line("-ERR Already authenticated").await;
        };
        let Some(username) = user.clone() else {
            return self.stream.write_line("-ERR USER command required first").await;
        };
        if password.is_empty() {
            return self.stream.write_line("-ERR Missing password").await;
        }

        let identity = match self.server.directory.authenticate(&username, password).await? {
            AuthOutcome::Authenticated(identity) => identity,
            AuthOutcome::Failed(reason) => {
                warn!("POP3 authentication failed: {username} ({reason})");
                *user = None;
                return self.stream.write_line("-ERR Authentication failed").await;
            }
        };

        let store = &self.server.store;
        let messages = match store.get_mailbox(identity.user_id, "INBOX").await? {
            Some(inbox) => store.list_live_emails(inbox.id).await?,
            None => Vec::new(),
        };
        info!(
            "POP3 authentication successful: {username} ({} messages)",
            messages.len()
        );
        self.state = State::Transaction {
            user: identity.user_id,
            maildrop: Maildrop::new(messages),
        };
        self.stream.write_line("+OK Authentication successful").await
    }

    async fn transaction(&mut self, command: Command) -> Result<()> {
        let State::Transaction { maildrop, .. } = &mut self.state else {
            return self.stream.write_line("-ERR Not authenticated").await;
        };

        match command {
            Command::Stat => {
                let (count, octets) = maildrop
                    .live()
                    .fold((0, 0), |(count, octets), (_, email)| {
                        (count + 1, octets + email.raw_message.len())
                    });
                self.stream.write_line(&format!("+OK {count} {octets}")).await
            }
            Command::List(None) => {
                let mut body = String::new();
                let mut octets = 0;
                let mut count = 0;
                for (n, email) in maildrop.live() {
                    body.push_str(&format!("{n} {}\r\n", email.raw_message.len()));
                    octets += email.raw_message.len();
                    count += 1;
                }
                let status = format!("+OK {count} messages ({octets} octets)");
                self.stream.write_multiline(&status, body.as_bytes()).await
            }
            Command::List(Some(n)) => {
                let line = match maildrop.get(n) {
                    Ok(email) => format!("+OK {n} {}", email.raw_message.len()),
                    Err(reason) => format!("-ERR {reason}"),
                };
                self.stream.write_line(&line).await
            }
            Command::Retr(n) => match maildrop.get(n) {
                Ok(email) => {
                    let status = format!("+OK {} octets", email.raw_message.len());
                    self.stream.write_multiline(&status, &email.raw_message).await
                }
                Err(reason) => self.stream.write_line(&format!("-ERR {reason}")).await,
            },
            Command::Dele(n) => {
                let line = match maildrop.get(n).map(|_| ()) {
                    Ok(()) => {
                        maildrop.mark(n);
                        format!("+OK Message {n} marked for deletion")
                    }
                    Err(reason) => format!("-ERR {reason}"),
                };
                self.stream.write_line(&line).await
            }
            Command::Rset => {
                maildrop.reset();
                self.stream.write_line("+OK Reset completed").await
            }
            Command::Uidl(None) => {
                let body: String = maildrop
                    .live()
                    .map(|(n, email)| format!("{n} {}\r\n", email.uid))
                    .collect();
                self.stream.write_multiline("+OK", body.as_bytes()).await
            }
            Command::Uidl(Some(n)) => {
                let line = match maildrop.get(n) {
                    Ok(email) => format!("+OK {n} {}", email.uid),
                    Err(reason) => format!("-ERR {reason}"),
                };
                self.stream.write_line(&line).await
            }
            Command::Top { message, lines } => match maildrop.get(message) {
                Ok(email) => {
                    let top = top(email, lines);
                    self.stream.write_multiline("+OK", &top).await
                }
                Err(reason) => self.stream.write_line(&format!("-ERR {reason}")).await,
            },
            other => {
                debug!("{} reached the transaction handler", other.verb());
                self.stream.write_line("-ERR Unknown command").await
            }
        }
    }

    async fn quit(&mut self) -> Result<Flow> {
        let banner = &self.server.settings.banner;
        let line = match &self.state {
            State::Authorization { .. } => format!("+OK {banner} POP3 server signing off"),
            State::Transaction { user, maildrop } => {
                let ids = maildrop.marked_ids();
                match self.server.store.delete_emails(&ids).await {
                    Ok(deleted) => {
                        if deleted > 0 {
                            info!("Deleted {deleted} message(s) for user {}", user.0);
                        }
                        format!("+OK {banner} POP3 server signing off ({deleted} messages deleted)")
                    }
                    Err(e) => {
                        error!("Failed to delete marked messages: {e}");
                        "-ERR Some deleted messages not removed".to_string()
                    }
                }
            }
        };
        self.stream.write_line(&line).await?;
        Ok(Flow::Close)
    }

    async fn internal_error(&mut self, error: Error) -> Result<Flow> {
        let Error::Store(e) = error else {
            return Err(error);
        };
        error!("POP3 store failure: {e}");
        self.stream.write_line("-ERR Internal error").await?;
        Ok(Flow::Continue)
    }
}

/// Header section, a blank line, then the first `lines` lines of the text
/// body (the stored plain-text part, else the raw body).
fn top(email: &Email, lines: usize) -> Vec<u8> {
    let raw = email.raw_message.as_slice();
    let (header, body) = split_message(raw);

    let mut out = header.to_vec();
    out.extend_from_slice(b"\r\n");
    let text = email
        .text_body
        .clone()
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    for line in text.lines().take(lines) {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Splits at the blank line ending the header block. The header keeps its
/// last line break; the blank line itself belongs to neither part.
fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    for separator in [&b"\r\n\r\n"[..], b"\n\n"] {
        if let Some(pos) = raw.windows(separator.len()).position(|w| w == separator) {
            let half = separator.len() / 2;
            return (&raw[..pos + half], &raw[pos + separator.len()..]);
        }
    }
    (raw, &[])
}
