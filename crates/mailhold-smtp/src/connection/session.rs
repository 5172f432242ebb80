//! Server side of one SMTP connection.

use std::net::SocketAddr;

use mailhold_core::{AuthOutcome, Config, DeliveryPipeline, Directory, Identity, Shutdown};
use mailhold_mime::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::stream::{DataBody, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{decode_sasl, encode_challenge, split_plain};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode, ReversePath};

/// Settings shared by every SMTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Name announced in the greeting and EHLO reply.
    pub hostname: String,
    /// Product name in the greeting.
    pub banner: String,
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
}

impl SmtpSettings {
    /// Takes the SMTP-relevant fields from the server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            hostname: config.hostname.clone(),
            banner: config.banner.clone(),
            max_message_size: config.smtp.max_message_size,
        }
    }
}

/// Inbound SMTP server.
///
/// One value is shared by every connection on a listener; [`SmtpServer::handle`]
/// runs a single session to completion.
#[derive(Debug, Clone)]
pub struct SmtpServer {
    settings: SmtpSettings,
    directory: Directory,
    pipeline: DeliveryPipeline,
}

impl SmtpServer {
    /// Creates a server over the given collaborators.
    #[must_use]
    pub const fn new(settings: SmtpSettings, directory: Directory, pipeline: DeliveryPipeline) -> Self {
        Self {
            settings,
            directory,
            pipeline,
        }
    }

    /// Runs one session until QUIT, disconnect or shutdown.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr, mut shutdown: Shutdown)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = info_span!("smtp", %peer);
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

#[derive(Debug, Default)]
struct Envelope {
    sender: Option<ReversePath>,
    recipients: Vec<Address>,
}

enum Flow {
    Continue,
    Close,
}

enum Sasl {
    Value(String),
    Abort(Reply),
    Closed,
}

struct Session<'a, S> {
    server: &'a SmtpServer,
    stream: SmtpStream<S>,
    greeted: bool,
    identity: Option<Identity>,
    envelope: Envelope,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(server: &'a SmtpServer, stream: S) -> Self {
        Self {
            server,
            stream: SmtpStream::new(stream),
            greeted: false,
            identity: None,
            envelope: Envelope::default(),
        }
    }

    async fn run(&mut self, shutdown: &mut Shutdown) -> Result<()> {
        let settings = &self.server.settings;
        let greeting = format!("{} ESMTP {}", settings.hostname, settings.banner);
        self.reply(ReplyCode::SERVICE_READY, greeting).await?;

        loop {
            let line = tokio::select! {
                line = self.stream.read_line() => Some(line),
                () = shutdown.recv() => None,
            };
            let line = match line {
                None => {
                    let text = format!(
                        "{} Service closing transmission channel",
                        self.server.settings.hostname
                    );
                    self.reply(ReplyCode::SERVICE_UNAVAILABLE, text).await?;
                    return Ok(());
                }
                Some(Err(Error::LineTooLong(limit))) => {
                    self.reply(ReplyCode::SYNTAX_ERROR, "Line too long").await?;
                    return Err(Error::LineTooLong(limit));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(None)) => return Ok(()),
                Some(Ok(Some(line))) => line,
            };

            if let Flow::Close = self.dispatch(&line).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(Error::UnsupportedMechanism(name)) => {
                warn!("Rejected AUTH mechanism {name}");
                self.reply(
                    ReplyCode::PARAMETER_NOT_IMPLEMENTED,
                    "Unrecognized authentication type",
                )
                .await?;
                return Ok(Flow::Continue);
            }
            Err(e) => {
                debug!("Bad arguments: {e}");
                self.reply(ReplyCode::PARAMETER_ERROR, "Syntax error in parameters")
                    .await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(command = command.verb(), "Received command");

        if command.must_end_input() && self.stream.has_pending_input() {
            self.stream.discard_pending_input();
            warn!("Rejected pipelined input after {}", command.verb());
            self.reply(ReplyCode::BAD_SEQUENCE, "Pipelining not supported")
                .await?;
            return Ok(Flow::Continue);
        }

        match command {
            Command::Ehlo { hostname } => self.ehlo(&hostname).await?,
            Command::Helo { hostname } => {
                debug!("HELO from {hostname}");
                self.greeted = true;
                self.envelope = Envelope::default();
                let name = self.server.settings.hostname.clone();
                self.reply(ReplyCode::OK, name).await?;
            }
            Command::Auth {
                mechanism,
                initial_response,
            } => return self.auth(mechanism, initial_response).await,
            Command::MailFrom { from, size, .. } => self.mail(from, size).await?,
            Command::RcptTo { to } => self.rcpt(to).await?,
            Command::Data => return self.data().await,
            Command::Rset => {
                self.envelope = Envelope::default();
                self.stream.write_reply(&Reply::ok()).await?;
            }
            Command::Noop => self.stream.write_reply(&Reply::ok()).await?,
            Command::Vrfy { .. } => {
                self.reply(ReplyCode::CANNOT_VERIFY, "Cannot VRFY user").await?;
            }
            Command::StartTls => {
                self.reply(ReplyCode::TLS_UNAVAILABLE, "TLS not available")
                    .await?;
            }
            Command::Quit => {
                self.reply(ReplyCode::CLOSING, "Bye").await?;
                return Ok(Flow::Close);
            }
            Command::Unrecognized(verb) => {
                debug!("Unrecognized command {verb:?}");
                self.reply(ReplyCode::SYNTAX_ERROR, "Command not recognized")
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn ehlo(&mut self, client: &str) -> Result<()> {
        debug!("EHLO from {client}");
        self.greeted = true;
        self.envelope = Envelope::default();

        let settings = &self.server.settings;
        let mut lines = vec![settings.hostname.clone()];
        lines.extend(
            Extension::advertised(settings.max_message_size)
                .iter()
                .map(ToString::to_string),
        );
        self.stream
            .write_reply(&Reply::new(ReplyCode::OK, lines))
            .await
    }

    async fn auth(&mut self, mechanism: AuthMechanism, initial: Option<String>) -> Result<Flow> {
        if self.identity.is_some() {
            self.reply(ReplyCode::BAD_SEQUENCE, "Already authenticated")
                .await?;
            return Ok(Flow::Continue);
        }
        if self.envelope.sender.is_some() {
            self.reply(ReplyCode::BAD_SEQUENCE, "Mail transaction in progress")
                .await?;
            return Ok(Flow::Continue);
        }

        let credentials = match mechanism {
            AuthMechanism::Plain => match self.sasl_response(initial, "").await? {
                Sasl::Value(decoded) => split_plain(&decoded)
                    .map(|(user, pass)| (user.to_string(), pass.to_string())),
                Sasl::Abort(reply) => return self.send(reply).await,
                Sasl::Closed => return Ok(Flow::Close),
            },
            AuthMechanism::Login => {
                let username = match self
                    .sasl_response(initial, &encode_challenge("Username:"))
                    .await?
                {
                    Sasl::Value(username) => username,
                    Sasl::Abort(reply) => return self.send(reply).await,
                    Sasl::Closed => return Ok(Flow::Close),
                };
                match self
                    .sasl_response(None, &encode_challenge("Password:"))
                    .await?
                {
                    Sasl::Value(password) => Some((username, password)),
                    Sasl::Abort(reply) => return self.send(reply).await,
                    Sasl::Closed => return Ok(Flow::Close),
                }
            }
        };

        let Some((username, password)) = credentials else {
            warn!("Malformed AUTH {} response", mechanism.as_str());
            self.reply(ReplyCode::AUTH_FAILED, "Authentication credentials invalid")
                .await?;
            return Ok(Flow::Continue);
        };

        match self.server.directory.authenticate(&username, &password).await {
            Ok(AuthOutcome::Authenticated(identity)) => {
                info!("SMTP authentication successful: {username}");
                self.identity = Some(identity);
                self.reply(ReplyCode::AUTH_SUCCESS, "Authentication successful")
                    .await?;
            }
            Ok(AuthOutcome::Failed(reason)) => {
                warn!("SMTP authentication failed: {username} ({reason})");
                self.reply(ReplyCode::AUTH_FAILED, "Authentication credentials invalid")
                    .await?;
            }
            Err(e) => {
                error!("SMTP authentication error for {username}: {e}");
                self.reply(ReplyCode::MAILBOX_UNAVAILABLE, "Error processing message")
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Reads one SASL response, prompting with `challenge` unless the client
    /// sent an initial response.
    async fn sasl_response(&mut self, initial: Option<String>, challenge: &str) -> Result<Sasl> {
        let line = if let Some(line) = initial {
            line
        } else {
            self.reply(ReplyCode::AUTH_CONTINUE, challenge).await?;
            match self.stream.read_line().await? {
                Some(line) => line,
                None => return Ok(Sasl::Closed),
            }
        };

        if line.trim() == "*" {
            return Ok(Sasl::Abort(Reply::single(
                ReplyCode::PARAMETER_ERROR,
                "Authentication cancelled",
            )));
        }
        Ok(decode_sasl(&line).map_or_else(
            |_| {
                Sasl::Abort(Reply::single(
                    ReplyCode::PARAMETER_ERROR,
                    "Invalid base64 data",
                ))
            },
            Sasl::Value,
        ))
    }

    async fn mail(&mut self, from: ReversePath, size: Option<usize>) -> Result<()> {
        if !self.greeted {
            return self
                .reply(ReplyCode::BAD_SEQUENCE, "Send HELO/EHLO first")
                .await;
        }
        if self.envelope.sender.is_some() {
            return self
                .reply(ReplyCode::BAD_SEQUENCE, "Sender already specified")
                .await;
        }
        if size.is_some_and(|size| size > self.server.settings.max_message_size) {
            return self
                .reply(
                    ReplyCode::EXCEEDED_STORAGE,
                    "Message size exceeds fixed maximum",
                )
                .await;
        }

        debug!("MAIL FROM {from}");
        self.envelope.sender = Some(from);
        self.stream.write_reply(&Reply::ok()).await
    }

    async fn rcpt(&mut self, to: Address) -> Result<()> {
        if self.envelope.sender.is_none() {
            return self.reply(ReplyCode::BAD_SEQUENCE, "Need MAIL command").await;
        }
        if !self.server.pipeline.accepts_domain(to.domain()) {
            info!("Refused relay to {to}");
            return self
                .reply(ReplyCode::MAILBOX_UNAVAILABLE, "not relaying to that domain")
                .await;
        }

        debug!("RCPT TO <{to}>");
        self.envelope.recipients.push(to);
        self.stream.write_reply(&Reply::ok()).await
    }

    async fn data(&mut self) -> Result<Flow> {
        let Some(sender) = self.envelope.sender.clone() else {
            self.reply(ReplyCode::BAD_SEQUENCE, "Need MAIL command").await?;
            return Ok(Flow::Continue);
        };
        if self.envelope.recipients.is_empty() {
            self.reply(ReplyCode::BAD_SEQUENCE, "Need RCPT command").await?;
            return Ok(Flow::Continue);
        }

        self.reply(ReplyCode::START_DATA, "End data with <CR><LF>.<CR><LF>")
            .await?;
        let body = self
            .stream
            .read_data(self.server.settings.max_message_size)
            .await?;
        let envelope = std::mem::take(&mut self.envelope);

        let reply = match body {
            DataBody::Closed => return Ok(Flow::Close),
            DataBody::TooLarge => {
                warn!("Rejected oversized message from {sender}");
                Reply::single(
                    ReplyCode::EXCEEDED_STORAGE,
                    "Message size exceeds fixed maximum",
                )
            }
            DataBody::Message(raw) => self.accept(&sender, &envelope.recipients, &raw).await,
        };
        self.send(reply).await
    }

    async fn accept(&self, sender: &ReversePath, recipients: &[Address], raw: &[u8]) -> Reply {
        let failed = || Reply::single(ReplyCode::MAILBOX_UNAVAILABLE, "Error processing message");

        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unparseable message from {sender}: {e}");
                return failed();
            }
        };

        match self.sender_allowed(sender).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Sender {sender} not permitted for this session");
                return Reply::single(ReplyCode::MAILBOX_UNAVAILABLE, "Authentication required");
            }
            Err(e) => {
                error!("Sender check failed: {e}");
                return failed();
            }
        }

        let recipients: Vec<String> = recipients.iter().map(ToString::to_string).collect();
        let report = self
            .server
            .pipeline
            .deliver(sender.as_str(), &recipients, &message, raw)
            .await;

        if report.any_delivered() {
            info!(
                "Email processed: {sender} -> {} recipient(s), {} skipped",
                report.delivered.len(),
                report.skipped.len()
            );
            Reply::single(ReplyCode::OK, "Message accepted for delivery")
        } else {
            warn!("No recipient of the message from {sender} could be delivered");
            failed()
        }
    }

    async fn sender_allowed(&self, sender: &ReversePath) -> mailhold_core::Result<bool> {
        let directory = &self.server.directory;
        match &self.identity {
            Some(identity) => Ok(directory.can_send_from(identity, sender.as_str())),
            None => directory.is_local_address(sender.as_str()).await,
        }
    }

    async fn reply(&mut self, code: ReplyCode, text: impl Into<String>) -> Result<()> {
        self.stream.write_reply(&Reply::single(code, text)).await
    }

    async fn send(&mut self, reply: Reply) -> Result<Flow> {
        self.stream.write_reply(&reply).await?;
        Ok(Flow::Continue)
    }
}
