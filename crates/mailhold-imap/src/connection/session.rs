//! Server side of one IMAP connection.

use std::net::SocketAddr;

use chrono::Utc;
use mailhold_core::{
    AuthOutcome, Config, Directory, Email, FlagUpdate, MailStore, MailboxId, MessageFlag,
    MessageFlags, Shutdown, UserId,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::framed::FramedStream;
use crate::command::{Command, FetchAttribute, Section, SearchKey, StatusAttribute};
use crate::error::{Error, Result};
use crate::parser::{Request, parse_request};
use crate::protocol::{
    CAPABILITIES, FetchResponse, ProtocolState, SelectedState, greeting_timestamp, internal_date,
    list_line, quote, search, split_header,
};
use crate::types::{PERMANENT_FLAGS, UidSet};

/// Settings shared by every IMAP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapSettings {
    /// Product name in the greeting and BYE lines.
    pub banner: String,
    /// Quota given to mailboxes made with CREATE.
    pub default_quota_bytes: i64,
}

impl ImapSettings {
    /// Takes the IMAP-relevant fields from the server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            banner: config.banner.clone(),
            default_quota_bytes: config.delivery.default_quota_bytes,
        }
    }
}

/// IMAP4rev1 server.
///
/// Cheap to clone; every connection on a listener shares one value.
#[derive(Debug, Clone)]
pub struct ImapServer {
    settings: ImapSettings,
    store: MailStore,
    directory: Directory,
}

impl ImapServer {
    /// Creates a server over the given store and directory.
    #[must_use]
    pub const fn new(settings: ImapSettings, store: MailStore, directory: Directory) -> Self {
        Self {
            settings,
            store,
            directory,
        }
    }

    /// Runs one session until LOGOUT, disconnect or shutdown.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr, mut shutdown: Shutdown)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = info_span!("imap", %peer);
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

/// Outcome of a state check: either the value the command needs or the
/// tagged reply to send instead.
type Gate<T> = std::result::Result<T, &'static str>;

struct Session<'a, S> {
    server: &'a ImapServer,
    stream: FramedStream<S>,
    state: ProtocolState,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(server: &'a ImapServer, stream: S) -> Self {
        Self {
            server,
            stream: FramedStream::new(stream),
            state: ProtocolState::NotAuthenticated,
        }
    }

    async fn run(&mut self, shutdown: &mut Shutdown) -> Result<()> {
        self.stream.queue_line(&format!(
            "* OK {} IMAP4rev1 server ready {}",
            self.server.settings.banner,
            greeting_timestamp(Utc::now())
        ));
        self.stream.flush().await?;

        loop {
            let line = tokio::select! {
                line = self.stream.read_command() => Some(line),
                () = shutdown.recv() => None,
            };
            let line = match line {
                None => {
                    self.stream.queue_line("* BYE Server shutting down");
                    self.stream.flush().await?;
                    return Ok(());
                }
                Some(Err(Error::Protocol(message))) => {
                    warn!("Closing connection: {message}");
                    self.stream.queue_line(&format!("* BYE {message}"));
                    self.stream.flush().await?;
                    return Err(Error::Protocol(message));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(None)) => return Ok(()),
                Some(Ok(Some(line))) => line,
            };

            match parse_request(&line) {
                Ok(request) => self.dispatch(request).await?,
                Err(rejection) => {
                    debug!("Rejected command: {}", rejection.message);
                    self.stream.queue_line(&rejection.to_line());
                    self.stream.flush().await?;
                }
            }

            if self.state == ProtocolState::Logout {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<()> {
        let Request { tag, command } = request;
        debug!(%tag, command = command.name(), "Received command");

        let completion = match self.execute(command).await {
            Ok(text) => text,
            Err(Error::Store(e)) => {
                error!("Command {tag} failed: {e}");
                "BAD Internal error".to_string()
            }
            Err(e) => return Err(e),
        };
        self.stream.queue_line(&format!("{tag} {completion}"));
        self.stream.flush().await
    }

    /// Runs one command, queueing its untagged responses and returning the
    /// tagged completion text.
    async fn execute(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Capability => {
                self.stream.queue_line(&format!("* CAPABILITY {CAPABILITIES}"));
                Ok("OK CAPABILITY completed".to_string())
            }
            Command::Noop => Ok("OK NOOP completed".to_string()),
            Command::Logout => {
                self.stream.queue_line(&format!(
                    "* BYE {} IMAP server signing off",
                    self.server.settings.banner
                ));
                self.state = ProtocolState::Logout;
                Ok("OK LOGOUT completed".to_string())
            }
            Command::Login { username, password } => self.login(&username, &password).await,
            Command::Authenticate { mechanism } => {
                let supported = ["PLAIN", "LOGIN"]
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(&mechanism));
                Ok(if supported {
                    "BAD Use LOGIN command"
                } else {
                    "BAD Unsupported mechanism"
                }
                .to_string())
            }
            Command::Select { mailbox } => self.select(&mailbox, false).await,
            Command::Examine { mailbox } => self.select(&mailbox, true).await,
            Command::Create { mailbox } => self.create(&mailbox).await,
            Command::Subscribe { mailbox } => self.subscribe(&mailbox, true).await,
            Command::Unsubscribe { mailbox } => self.subscribe(&mailbox, false).await,
            Command::List { pattern, .. } => self.list("LIST", &pattern, false).await,
            Command::Lsub { pattern, .. } => self.list("LSUB", &pattern, true).await,
            Command::Status { mailbox, items } => self.status(&mailbox, &items).await,
            Command::Check => Ok(match self.selection() {
                Ok(_) => "OK CHECK completed",
                Err(reply) => reply,
            }
            .to_string()),
            Command::Close => self.close().await,
            Command::Expunge => self.expunge().await,
            Command::Fetch { set, items } => self.fetch(&set, &items).await,
            Command::Search { criteria } => self.search(&criteria).await,
            Command::Store {
                set,
                mode,
                flags,
                silent,
            } => self.store(&set, mode, flags, silent).await,
            Command::Unrecognized(verb) => {
                debug!("Unrecognized command {verb:?}");
                Ok("BAD Unknown command".to_string())
            }
        }
    }

    fn user(&self) -> Gate<UserId> {
        self.state
            .identity()
            .map(|identity| identity.user_id)
            .ok_or("NO Not authenticated")
    }

    fn selection(&self) -> Gate<(MailboxId, bool)> {
        match &self.state {
            ProtocolState::Selected(_, selected) => Ok((selected.mailbox.id, selected.read_only)),
            ProtocolState::Authenticated(_) => Err("NO No mailbox selected"),
            ProtocolState::NotAuthenticated | ProtocolState::Logout => Err("NO Not authenticated"),
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        if self.state.is_selected() {
            return Ok("BAD Already authenticated".to_string());
        }

        match self.server.directory.authenticate(username, password).await? {
            AuthOutcome::Authenticated(identity) => {
                info!("IMAP login successful: {username}");
                self.state = ProtocolState::Authenticated(identity);
                Ok("OK LOGIN completed".to_string())
            }
            AuthOutcome::Failed(reason) => {
                warn!("IMAP login failed: {username} ({reason})");
                Ok("NO Login failed".to_string())
            }
        }
    }

    async fn list(&mut self, verb: &str, pattern: &str, subscribed_only: bool) -> Result<String> {
        let user = match self.user() {
            Ok(user) => user,
            Err(reply) => return Ok(reply.to_string()),
        };

        if pattern.is_empty() {
            self.stream
                .queue_line(&format!("* {verb} (\\Noselect) \"/\" \"\""));
        } else {
            let wildcard = pattern == "*" || pattern == "%";
            for mailbox in self.server.store.list_mailboxes(user).await? {
                if subscribed_only && !mailbox.is_subscribed {
                    continue;
                }
                if wildcard || mailbox.name.eq_ignore_ascii_case(pattern) {
                    self.stream.queue_line(&list_line(verb, &mailbox));
                }
            }
        }
        Ok(format!("OK {verb} completed"))
    }

    async fn select(&mut self, name: &str, examine: bool) -> Result<String> {
        let user = match self.user() {
            Ok(user) => user,
            Err(reply) => return Ok(reply.to_string()),
        };
        let verb = if examine { "EXAMINE" } else { "SELECT" };

        let mailbox = match self.server.store.get_mailbox(user, name).await? {
            Some(mailbox) if mailbox.is_selectable => mailbox,
            _ => {
                self.state.deselect();
                return Ok("NO Mailbox does not exist".to_string());
            }
        };
        let read_only = examine || mailbox.is_read_only;
        let emails = self.server.store.list_emails(mailbox.id).await?;

        let recent = emails
            .iter()
            .filter(|e| e.flags.contains(MessageFlag::Recent))
            .count();
        self.stream
            .queue_line("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)");
        self.stream.queue_line(&format!("* {} EXISTS", emails.len()));
        self.stream.queue_line(&format!("* {recent} RECENT"));
        self.stream.queue_line(&format!(
            "* OK [UIDVALIDITY {}] UIDs valid",
            mailbox.uid_validity
        ));
        self.stream.queue_line(&format!(
            "* OK [UIDNEXT {}] Predicted next UID",
            mailbox.uid_next
        ));
        let permanent = if read_only { "()" } else { PERMANENT_FLAGS };
        self.stream
            .queue_line(&format!("* OK [PERMANENTFLAGS {permanent}] Limited"));
        if let Some(position) = emails
            .iter()
            .position(|e| !e.flags.contains(MessageFlag::Seen))
        {
            let seq = position + 1;
            self.stream
                .queue_line(&format!("* OK [UNSEEN {seq}] Message {seq} is first unseen"));
        }

        if !read_only && recent > 0 {
            self.server.store.clear_recent(mailbox.id).await?;
        }
        debug!("Selected {} ({} messages)", mailbox.name, emails.len());
        self.state.select(SelectedState { mailbox, read_only });

        let access = if read_only { "READ-ONLY" } else { "READ-WRITE" };
        Ok(format!("OK [{access}] {verb} completed"))
    }

    async fn create(&mut self, name: &str) -> Result<String> {
        let user = match self.user() {
            Ok(user) => user,
            Err(reply) => return Ok(reply.to_string()),
        };
        if name.is_empty() {
            return Ok("BAD Invalid mailbox name".to_string());
        }

        let quota = self.server.settings.default_quota_bytes;
        match self.server.store.create_mailbox(user, name, quota).await {
            Ok(mailbox) => {
                info!("Created mailbox {}", mailbox.name);
                Ok("OK CREATE completed".to_string())
            }
            Err(mailhold_core::Error::Conflict(_)) => Ok("NO Mailbox already exists".to_string()),
            Err(e) => Err(e.into()),
        }
    }

    async fn subscribe(&mut self, name: &str, subscribed: bool) -> Result<String> {
        let user = match self.user() {
            Ok(user) => user,
            Err(reply) => return Ok(reply.to_string()),
        };
        let verb = if subscribed { "SUBSCRIBE" } else { "UNSUBSCRIBE" };

        let Some(mailbox) = self.server.store.get_mailbox(user, name).await? else {
            return Ok("NO Mailbox does not exist".to_string());
        };
        self.server
            .store
            .set_subscribed(mailbox.id, subscribed)
            .await?;
        Ok(format!("OK {verb} completed"))
    }

    async fn status(&mut self, name: &str, items: &[StatusAttribute]) -> Result<String> {
        let user = match self.user() {
            Ok(user) => user,
            Err(reply) => return Ok(reply.to_string()),
        };

        let Some(mailbox) = self.server.store.get_mailbox(user, name).await? else {
            return Ok("NO Mailbox does not exist".to_string());
        };
        let emails = self.server.store.list_emails(mailbox.id).await?;
        let count = |flag: MessageFlag, present: bool| {
            emails
                .iter()
                .filter(|e| e.flags.contains(flag) == present)
                .count()
        };

        let values: Vec<String> = items
            .iter()
            .map(|item| {
                let value = match item {
                    StatusAttribute::Messages => emails.len().to_string(),
                    StatusAttribute::Recent => count(MessageFlag::Recent, true).to_string(),
                    StatusAttribute::UidNext => mailbox.uid_next.to_string(),
                    StatusAttribute::UidValidity => mailbox.uid_validity.to_string(),
                    StatusAttribute::Unseen => count(MessageFlag::Seen, false).to_string(),
                };
                format!("{} {value}", item.as_str())
            })
            .collect();
        self.stream.queue_line(&format!(
            "* STATUS {} ({})",
            quote(&mailbox.name),
            values.join(" ")
        ));
        Ok("OK STATUS completed".to_string())
    }

    async fn close(&mut self) -> Result<String> {
        let (mailbox, read_only) = match self.selection() {
            Ok(selection) => selection,
            Err(reply) => return Ok(reply.to_string()),
        };
        if !read_only {
            let removed = self.server.store.expunge(mailbox).await?;
            debug!("CLOSE removed {} message(s)", removed.len());
        }
        self.state.deselect();
        Ok("OK CLOSE completed".to_string())
    }

    async fn expunge(&mut self) -> Result<String> {
        let (mailbox, read_only) = match self.selection() {
            Ok(selection) => selection,
            Err(reply) => return Ok(reply.to_string()),
        };
        if read_only {
            return Ok("NO Mailbox is read-only".to_string());
        }

        let mut uids: Vec<u32> = self
            .server
            .store
            .list_emails(mailbox)
            .await?
            .iter()
            .map(|e| e.uid)
            .collect();
        for uid in self.server.store.expunge(mailbox).await? {
            if let Some(position) = uids.iter().position(|u| *u == uid) {
                self.stream.queue_line(&format!("* {} EXPUNGE", position + 1));
                uids.remove(position);
            }
        }
        Ok("OK EXPUNGE completed".to_string())
    }

    async fn fetch(&mut self, set: &UidSet, items: &[FetchAttribute]) -> Result<String> {
        let (mailbox, read_only) = match self.selection() {
            Ok(selection) => selection,
            Err(reply) => return Ok(reply.to_string()),
        };

        let emails = self.server.store.list_emails(mailbox).await?;
        let matched = matching(&emails, set);
        if matched.is_empty() && set.is_single() {
            return Ok("NO Message not found".to_string());
        }

        let marks_seen = !read_only && items.iter().any(|item| item.sets_seen());
        for (seq, email) in matched {
            let mut flags = email.flags;
            let mut flags_changed = false;
            if marks_seen && !flags.contains(MessageFlag::Seen) {
                flags = self
                    .server
                    .store
                    .update_flags(email.id, FlagUpdate::Add, MessageFlags::empty().with(MessageFlag::Seen))
                    .await?;
                flags_changed = true;
            }

            let mut response = FetchResponse::new(seq, email.uid);
            for item in items {
                write_item(&mut response, *item, email, flags);
            }
            if flags_changed && !items.contains(&FetchAttribute::Flags) {
                response.flags(flags);
            }
            self.stream.queue_bytes(&response.finish());
        }
        Ok("OK FETCH completed".to_string())
    }

    async fn search(&mut self, criteria: &[SearchKey]) -> Result<String> {
        let (mailbox, _) = match self.selection() {
            Ok(selection) => selection,
            Err(reply) => return Ok(reply.to_string()),
        };

        let emails = self.server.store.list_emails(mailbox).await?;
        let mut line = String::from("* SEARCH");
        for uid in search(criteria, &emails) {
            line.push(' ');
            line.push_str(&uid.to_string());
        }
        self.stream.queue_line(&line);
        Ok("OK SEARCH completed".to_string())
    }

    async fn store(
        &mut self,
        set: &UidSet,
        mode: FlagUpdate,
        flags: MessageFlags,
        silent: bool,
    ) -> Result<String> {
        let (mailbox, read_only) = match self.selection() {
            Ok(selection) => selection,
            Err(reply) => return Ok(reply.to_string()),
        };
        if read_only {
            return Ok("NO Mailbox is read-only".to_string());
        }

        let emails = self.server.store.list_emails(mailbox).await?;
        let matched = matching(&emails, set);
        if matched.is_empty() && set.is_single() {
            return Ok("NO Message not found".to_string());
        }

        for (seq, email) in matched {
            let updated = self.server.store.update_flags(email.id, mode, flags).await?;
            if !silent {
                let mut response = FetchResponse::new(seq, email.uid);
                response.flags(updated);
                self.stream.queue_bytes(&response.finish());
            }
        }
        Ok("OK STORE completed".to_string())
    }
}

/// Pairs each message in `set` with its sequence number.
fn matching<'e>(emails: &'e [Email], set: &UidSet) -> Vec<(usize, &'e Email)> {
    let last = emails.iter().map(|e| e.uid).max().unwrap_or(0);
    emails
        .iter()
        .enumerate()
        .filter(|(_, email)| set.contains(email.uid, last))
        .map(|(index, email)| (index + 1, email))
        .collect()
}

fn write_item(response: &mut FetchResponse, item: FetchAttribute, email: &Email, flags: MessageFlags) {
    let raw = email.raw_message.as_slice();
    match item {
        FetchAttribute::Flags => response.flags(flags),
        FetchAttribute::Uid => {}
        FetchAttribute::InternalDate => {
            response.item("INTERNALDATE", &internal_date(email.internal_date));
        }
        FetchAttribute::Rfc822Size => response.item("RFC822.SIZE", &raw.len().to_string()),
        FetchAttribute::Rfc822 => response.literal("RFC822", raw),
        FetchAttribute::Rfc822Header => response.literal("RFC822.HEADER", split_header(raw).0),
        FetchAttribute::Rfc822Text => response.literal("RFC822.TEXT", split_header(raw).1),
        FetchAttribute::Body { section, .. } => {
            let data = match section {
                Section::Full => raw,
                Section::Header => split_header(raw).0,
                Section::Text => split_header(raw).1,
            };
            response.literal(&format!("BODY[{}]", section.as_str()), data);
        }
    }
}
