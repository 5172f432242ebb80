//! Integration tests for the POP3 session machine.
//!
//! A scripted client conversation is played through a mock stream against
//! an in-memory mail store.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailhold_core::{
    DeliveryPipeline, DeliveryPolicy, Directory, Email, MailStore, NewUser, Shutdown,
};
use mailhold_mime::Message;
use mailhold_pop3::{Pop3Server, Pop3Settings};

/// Mock stream that plays back a client script.
struct MockStream {
    /// Bytes the client sends (in order).
    script: Cursor<Vec<u8>>,
    /// Everything the server wrote.
    sent: Vec<u8>,
}

impl MockStream {
    fn new(script: &[u8]) -> Self {
        Self {
            script: Cursor::new(script.to_vec()),
            sent: Vec::new(),
        }
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.script.get_ref();
        let pos = self.script.position() as usize;

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.script.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const LOGIN: &str = "USER alice\r\nPASS wonderland\r\n";

/// A message of exactly `size` bytes.
fn message_of(size: usize) -> String {
    let head = "From: carol@remote.test\r\nTo: alice@example.com\r\nSubject: Sized\r\n\r\n";
    let filler = size - head.len() - 2;
    format!("{head}{}\r\n", "x".repeat(filler))
}

struct Harness {
    store: MailStore,
    pipeline: DeliveryPipeline,
    server: Pop3Server,
}

impl Harness {
    async fn new() -> Self {
        let store = MailStore::in_memory().await.unwrap();
        let directory = Directory::new(store.clone());
        directory
            .create_user(NewUser {
                email: "alice@example.com".to_string(),
                username: "alice".to_string(),
                password: "wonderland".to_string(),
                full_name: "Alice".to_string(),
            })
            .await
            .unwrap();
        let policy = DeliveryPolicy {
            local_domains: vec!["example.com".to_string()],
            default_quota_bytes: 10 * 1024 * 1024,
            quota_overrides: HashMap::new(),
        };
        let pipeline = DeliveryPipeline::new(store.clone(), directory.clone(), policy);
        let settings = Pop3Settings {
            banner: "Mailhold".to_string(),
        };
        Self {
            store: store.clone(),
            pipeline,
            server: Pop3Server::new(settings, store, directory),
        }
    }

    async fn deliver(&self, raw: &str) {
        let message = Message::parse(raw.as_bytes()).unwrap();
        let report = self
            .pipeline
            .deliver(
                "carol@remote.test",
                &["alice@example.com".to_string()],
                &message,
                raw.as_bytes(),
            )
            .await;
        assert!(report.any_delivered());
    }

    async fn session(&self, script: &str) -> String {
        let mut stream = MockStream::new(script.as_bytes());
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        self.server.handle(&mut stream, peer, Shutdown::never()).await;
        String::from_utf8(stream.sent).unwrap()
    }

    async fn inbox(&self) -> Vec<Email> {
        let user = self
            .store
            .user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        let inbox = self.store.get_mailbox(user.id, "INBOX").await.unwrap().unwrap();
        self.store.list_emails(inbox.id).await.unwrap()
    }
}

fn lines(output: &str) -> Vec<&str> {
    output.split("\r\n").collect()
}

#[tokio::test]
async fn test_greeting_and_quit() {
    let harness = Harness::new().await;
    let output = harness.session("QUIT\r\nNOOP\r\n").await;
    let lines = lines(&output);

    assert!(lines[0].starts_with("+OK Mailhold POP3 server ready "));
    assert_eq!(lines[1], "+OK Mailhold POP3 server signing off");
    assert_eq!(lines[2], "");
}

#[tokio::test]
async fn test_authorization_errors() {
    let harness = Harness::new().await;
    let output = harness
        .session(
            "PASS wonderland\r\n\
             STAT\r\n\
             RETR x\r\n\
             USER\r\n\
             USER alice\r\n\
             PASS wrong\r\n\
             PASS wonderland\r\n\
             XYZZY\r\n",
        )
        .await;
    let lines = lines(&output);

    assert_eq!(lines[1], "-ERR USER command required first");
    assert_eq!(lines[2], "-ERR Not authenticated");
    assert_eq!(lines[3], "-ERR Not authenticated");
    assert_eq!(lines[4], "-ERR Missing username");
    assert_eq!(lines[5], "+OK Username accepted");
    assert_eq!(lines[6], "-ERR Authentication failed");
    // The failed attempt forgot the user
    assert_eq!(lines[7], "-ERR USER command required first");
    assert_eq!(lines[8], "-ERR Unknown command");
}

#[tokio::test]
async fn test_stat_and_list() {
    let harness = Harness::new().await;
    for size in [100, 200, 300] {
        harness.deliver(&message_of(size)).await;
    }

    let output = harness
        .session(&format!(
            "{LOGIN}STAT\r\nLIST\r\nLIST 2\r\nLIST 4\r\nLIST two\r\n"
        ))
        .await;
    let lines = lines(&output);

    assert_eq!(lines[2], "+OK Authentication successful");
    assert_eq!(lines[3], "+OK 3 600");
    assert_eq!(
        &lines[4..9],
        ["+OK 3 messages (600 octets)", "1 100", "2 200", "3 300", "."]
    );
    assert_eq!(lines[9], "+OK 2 200");
    assert_eq!(lines[10], "-ERR Message not found");
    assert_eq!(lines[11], "-ERR Invalid message number");
}

#[tokio::test]
async fn test_retr_is_byte_identical() {
    let harness = Harness::new().await;
    let raw = "From: carol@remote.test\r\n\
               To: alice@example.com\r\n\
               Subject: Dots\r\n\
               \r\n\
               .leading dot\r\n\
               ..two dots\r\n\
               end\r\n";
    harness.deliver(raw).await;

    let output = harness.session(&format!("{LOGIN}RETR 1\r\n")).await;
    let status = format!("+OK {} octets\r\n", raw.len());
    let start = output.find(&status).unwrap() + status.len();
    let body = output[start..].strip_suffix(".\r\n").unwrap();
    let unstuffed: String = body
        .split_inclusive("\r\n")
        .map(|line| line.strip_prefix('.').unwrap_or(line))
        .collect();

    assert!(body.contains("\r\n..leading dot\r\n...two dots\r\n"));
    assert_eq!(unstuffed, raw);
}

#[tokio::test]
async fn test_dele_then_quit_removes() {
    let harness = Harness::new().await;
    harness.deliver(&message_of(100)).await;
    harness.deliver(&message_of(120)).await;

    let output = harness
        .session(&format!(
            "{LOGIN}DELE 1\r\nDELE 1\r\nSTAT\r\nRETR 1\r\nLIST\r\nUIDL\r\nQUIT\r\n"
        ))
        .await;
    let lines = lines(&output);

    assert_eq!(lines[3], "+OK Message 1 marked for deletion");
    assert_eq!(lines[4], "-ERR Message 1 already deleted");
    assert_eq!(lines[5], "+OK 1 120");
    assert_eq!(lines[6], "-ERR Message 1 already deleted");
    assert_eq!(&lines[7..10], ["+OK 1 messages (120 octets)", "2 120", "."]);
    assert_eq!(&lines[10..13], ["+OK", "2 2", "."]);
    assert_eq!(lines[13], "+OK Mailhold POP3 server signing off (1 messages deleted)");

    let remaining = harness.inbox().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].uid, 2);
}

#[tokio::test]
async fn test_rset_restores_marks() {
    let harness = Harness::new().await;
    harness.deliver(&message_of(100)).await;

    let output = harness
        .session(&format!("{LOGIN}DELE 1\r\nRSET\r\nSTAT\r\nQUIT\r\n"))
        .await;
    let lines = lines(&output);

    assert_eq!(lines[4], "+OK Reset completed");
    assert_eq!(lines[5], "+OK 1 100");
    assert_eq!(lines[6], "+OK Mailhold POP3 server signing off (0 messages deleted)");
    assert_eq!(harness.inbox().await.len(), 1);
}

#[tokio::test]
async fn test_disconnect_without_quit_keeps_messages() {
    let harness = Harness::new().await;
    harness.deliver(&message_of(100)).await;

    harness.session(&format!("{LOGIN}DELE 1\r\n")).await;

    assert_eq!(harness.inbox().await.len(), 1);
}

#[tokio::test]
async fn test_uidl_top_and_capa() {
    let harness = Harness::new().await;
    harness
        .deliver(
            "From: carol@remote.test\r\n\
             To: alice@example.com\r\n\
             Subject: Lines\r\n\
             \r\n\
             one\r\n\
             two\r\n\
             three\r\n",
        )
        .await;

    let output = harness
        .session(&format!(
            "CAPA\r\n{LOGIN}UIDL 1\r\nTOP 1 2\r\nTOP\r\nTOP 1 x\r\nTOP 9 1\r\n"
        ))
        .await;

    assert!(output.contains("+OK Capability list follows\r\nUSER\r\nTOP\r\nUIDL\r\n.\r\n"));
    assert!(output.contains("+OK 1 1\r\n"));
    assert!(output.contains(
        "+OK\r\nFrom: carol@remote.test\r\nTo: alice@example.com\r\nSubject: Lines\r\n\r\none\r\ntwo\r\n.\r\n"
    ));
    assert!(output.contains("-ERR Missing arguments\r\n"));
    assert!(output.contains("-ERR Invalid arguments\r\n"));
    assert!(output.contains("-ERR Message not found\r\n"));
}

#[tokio::test]
async fn test_missing_inbox_is_empty() {
    let harness = Harness::new().await;
    let output = harness.session(&format!("{LOGIN}STAT\r\nLIST\r\n")).await;

    assert!(output.contains("+OK 0 0\r\n+OK 0 messages (0 octets)\r\n.\r\n"));
}

#[tokio::test]
async fn test_shutdown_notice() {
    let harness = Harness::new().await;
    let (trigger, shutdown) = Shutdown::channel();
    trigger.trigger();

    let (client, server_side) = tokio::io::duplex(4096);
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    harness.server.handle(server_side, peer, shutdown).await;

    let mut received = String::new();
    let mut client = client;
    tokio::io::AsyncReadExt::read_to_string(&mut client, &mut received)
        .await
        .unwrap();
    assert!(received.ends_with("-ERR Server shutting down\r\n"));
}
