//! Integration tests for the SMTP session machine.
//!
//! Each test runs a real session over an in-memory duplex pipe against an
//! in-memory mail store.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use mailhold_core::{
    DeliveryPipeline, DeliveryPolicy, Directory, MailStore, NewUser, Shutdown, ShutdownTrigger,
};
use mailhold_smtp::{SmtpServer, SmtpSettings};

const PLAIN_ALICE: &str = "AGFsaWNlAHdvbmRlcmxhbmQ="; // \0alice\0wonderland

struct Harness {
    store: MailStore,
    server: SmtpServer,
}

impl Harness {
    async fn new() -> Self {
        Self::with_max_size(50 * 1024 * 1024).await
    }

    async fn with_max_size(max_message_size: usize) -> Self {
        let store = MailStore::in_memory().await.unwrap();
        let directory = Directory::new(store.clone());
        for (name, password) in [("alice", "wonderland"), ("bob", "builder")] {
            directory
                .create_user(NewUser {
                    email: format!("{name}@example.com"),
                    username: name.to_string(),
                    password: password.to_string(),
                    full_name: String::new(),
                })
                .await
                .unwrap();
        }
        let policy = DeliveryPolicy {
            local_domains: vec!["example.com".to_string()],
            default_quota_bytes: 10 * 1024 * 1024,
            quota_overrides: HashMap::new(),
        };
        let pipeline = DeliveryPipeline::new(store.clone(), directory.clone(), policy);
        let settings = SmtpSettings {
            hostname: "mx.example.com".to_string(),
            banner: "Mailhold".to_string(),
            max_message_size,
        };
        Self {
            store,
            server: SmtpServer::new(settings, directory, pipeline),
        }
    }

    async fn connect(&self) -> Client {
        self.connect_with(Shutdown::never()).await.0
    }

    async fn connect_with(&self, shutdown: Shutdown) -> (Client, JoinHandle<()>) {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let server = self.server.clone();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let task = tokio::spawn(async move { server.handle(server_side, peer, shutdown).await });
        let mut client = Client {
            io: BufReader::new(client),
        };
        assert_eq!(client.line().await, "220 mx.example.com ESMTP Mailhold");
        (client, task)
    }

    async fn inbox(&self, user: &str) -> Vec<mailhold_core::Email> {
        let user = self
            .store
            .user_by_email(&format!("{user}@example.com"))
            .await
            .unwrap()
            .unwrap();
        let Some(inbox) = self.store.get_mailbox(user.id, "INBOX").await.unwrap() else {
            return Vec::new();
        };
        self.store.list_emails(inbox.id).await.unwrap()
    }
}

struct Client {
    io: BufReader<DuplexStream>,
}

impl Client {
    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.io.read_line(&mut line).await.unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    async fn send(&mut self, data: &str) {
        self.io.get_mut().write_all(data.as_bytes()).await.unwrap();
    }

    async fn cmd(&mut self, line: &str) -> String {
        self.send(&format!("{line}\r\n")).await;
        self.line().await
    }

    async fn ehlo(&mut self) {
        self.send("EHLO client.test\r\n").await;
        let reply = self.reply().await;
        assert_eq!(reply.last().unwrap(), "250 STARTTLS");
    }
}

#[tokio::test]
async fn test_ehlo_advertises_extensions() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client.send("EHLO client.test\r\n").await;
    assert_eq!(
        client.reply().await,
        vec![
            "250-mx.example.com",
            "250-AUTH PLAIN LOGIN",
            "250-SIZE 52428800",
            "250-8BITMIME",
            "250 STARTTLS",
        ]
    );
    assert_eq!(client.cmd("HELO client.test").await, "250 mx.example.com");
    assert_eq!(client.cmd("QUIT").await, "221 Bye");
}

#[tokio::test]
async fn test_simple_commands() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    assert_eq!(client.cmd("NOOP").await, "250 OK");
    assert_eq!(client.cmd("RSET").await, "250 OK");
    assert_eq!(client.cmd("VRFY alice").await, "252 Cannot VRFY user");
    assert_eq!(client.cmd("STARTTLS").await, "454 TLS not available");
    assert_eq!(client.cmd("FOOBAR").await, "500 Command not recognized");
    assert_eq!(client.cmd("MAIL TO").await, "501 Syntax error in parameters");
    assert_eq!(
        client.cmd("AUTH CRAM-MD5").await,
        "504 Unrecognized authentication type"
    );
}

#[tokio::test]
async fn test_sequencing_errors() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    assert_eq!(
        client.cmd("MAIL FROM:<alice@example.com>").await,
        "503 Send HELO/EHLO first"
    );
    client.ehlo().await;
    assert_eq!(
        client.cmd("RCPT TO:<bob@example.com>").await,
        "503 Need MAIL command"
    );
    assert_eq!(client.cmd("DATA").await, "503 Need MAIL command");
    assert_eq!(client.cmd("MAIL FROM:<alice@example.com>").await, "250 OK");
    assert_eq!(
        client.cmd("MAIL FROM:<alice@example.com>").await,
        "503 Sender already specified"
    );
    assert_eq!(client.cmd("DATA").await, "503 Need RCPT command");
    assert_eq!(
        client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await,
        "503 Mail transaction in progress"
    );
}

#[tokio::test]
async fn test_relay_refused_leaves_envelope_unchanged() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    assert_eq!(client.cmd("MAIL FROM:<alice@example.com>").await, "250 OK");
    assert_eq!(
        client.cmd("RCPT TO:<user@unknown-domain.test>").await,
        "550 not relaying to that domain"
    );
    // Still no recipients
    assert_eq!(client.cmd("DATA").await, "503 Need RCPT command");
}

#[tokio::test]
async fn test_declared_size_over_limit() {
    let harness = Harness::with_max_size(1000).await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    assert_eq!(
        client.cmd("MAIL FROM:<alice@example.com> SIZE=5000").await,
        "552 Message size exceeds fixed maximum"
    );
    assert_eq!(
        client.cmd("MAIL FROM:<alice@example.com> SIZE=500").await,
        "250 OK"
    );
}

#[tokio::test]
async fn test_auth_plain() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    assert_eq!(
        client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await,
        "235 Authentication successful"
    );
    assert_eq!(
        client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await,
        "503 Already authenticated"
    );
}

#[tokio::test]
async fn test_auth_plain_prompted() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    assert_eq!(client.cmd("AUTH PLAIN").await, "334 ");
    assert_eq!(client.cmd(PLAIN_ALICE).await, "235 Authentication successful");
}

#[tokio::test]
async fn test_auth_login() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    assert_eq!(client.cmd("AUTH LOGIN").await, "334 VXNlcm5hbWU6");
    assert_eq!(client.cmd("Ym9i").await, "334 UGFzc3dvcmQ6"); // bob
    assert_eq!(
        client.cmd("YnVpbGRlcg==").await, // builder
        "235 Authentication successful"
    );
}

#[tokio::test]
async fn test_auth_failures() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    // \0alice\0wrong
    assert_eq!(
        client.cmd("AUTH PLAIN AGFsaWNlAHdyb25n").await,
        "535 Authentication credentials invalid"
    );
    assert_eq!(client.cmd("AUTH LOGIN").await, "334 VXNlcm5hbWU6");
    assert_eq!(client.cmd("*").await, "501 Authentication cancelled");
    assert_eq!(client.cmd("AUTH PLAIN").await, "334 ");
    assert_eq!(client.cmd("!!!").await, "501 Invalid base64 data");

    // The session is still unauthenticated and usable
    assert_eq!(
        client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await,
        "235 Authentication successful"
    );
}

#[tokio::test]
async fn test_authenticated_delivery() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;
    client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await;

    let raw = "From: alice@example.com\r\n\
               To: bob@example.com\r\n\
               Subject: Lunch\r\n\
               \r\n\
               Noon?\r\n\
               .hidden dot\r\n";

    assert_eq!(client.cmd("MAIL FROM:<alice@example.com>").await, "250 OK");
    assert_eq!(client.cmd("RCPT TO:<bob@example.com>").await, "250 OK");
    assert_eq!(
        client.cmd("DATA").await,
        "354 End data with <CR><LF>.<CR><LF>"
    );
    let stuffed = raw.replace("\r\n.", "\r\n..");
    client.send(&format!("{stuffed}.\r\n")).await;
    assert_eq!(client.line().await, "250 Message accepted for delivery");
    assert_eq!(client.cmd("QUIT").await, "221 Bye");

    let inbox = harness.inbox("bob").await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].raw_message, raw.as_bytes());
    assert_eq!(inbox[0].subject.as_deref(), Some("Lunch"));
    assert_eq!(inbox[0].uid, 1);
}

#[tokio::test]
async fn test_envelope_resets_after_data() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    client.cmd("MAIL FROM:<alice@example.com>").await;
    client.cmd("RCPT TO:<bob@example.com>").await;
    client.cmd("DATA").await;
    client.send("Subject: one\r\n\r\nbody\r\n.\r\n").await;
    assert_eq!(client.line().await, "250 Message accepted for delivery");

    assert_eq!(client.cmd("DATA").await, "503 Need MAIL command");
    assert_eq!(client.cmd("MAIL FROM:<alice@example.com>").await, "250 OK");
}

#[tokio::test]
async fn test_unauthenticated_foreign_sender_refused() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    client.cmd("MAIL FROM:<mallory@elsewhere.test>").await;
    client.cmd("RCPT TO:<bob@example.com>").await;
    client.cmd("DATA").await;
    client.send("Subject: hi\r\n\r\nhello\r\n.\r\n").await;
    assert_eq!(client.line().await, "550 Authentication required");
    assert!(harness.inbox("bob").await.is_empty());
}

#[tokio::test]
async fn test_authenticated_sender_must_own_address() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;
    client.cmd(&format!("AUTH PLAIN {PLAIN_ALICE}")).await;

    client.cmd("MAIL FROM:<bob@example.com>").await;
    client.cmd("RCPT TO:<bob@example.com>").await;
    client.cmd("DATA").await;
    client.send("Subject: spoof\r\n\r\nhello\r\n.\r\n").await;
    assert_eq!(client.line().await, "550 Authentication required");
}

#[tokio::test]
async fn test_no_deliverable_recipient() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    client.cmd("MAIL FROM:<alice@example.com>").await;
    assert_eq!(client.cmd("RCPT TO:<nobody@example.com>").await, "250 OK");
    client.cmd("DATA").await;
    client.send("Subject: lost\r\n\r\nhello\r\n.\r\n").await;
    assert_eq!(client.line().await, "550 Error processing message");
}

#[tokio::test]
async fn test_oversized_body() {
    let harness = Harness::with_max_size(64).await;
    let mut client = harness.connect().await;
    client.ehlo().await;

    client.cmd("MAIL FROM:<alice@example.com>").await;
    client.cmd("RCPT TO:<bob@example.com>").await;
    client.cmd("DATA").await;
    let body = "x".repeat(100);
    client
        .send(&format!("Subject: big\r\n\r\n{body}\r\n.\r\n"))
        .await;
    assert_eq!(client.line().await, "552 Message size exceeds fixed maximum");
    assert_eq!(client.cmd("NOOP").await, "250 OK");
    assert!(harness.inbox("bob").await.is_empty());
}

#[tokio::test]
async fn test_pipelined_input_rejected() {
    let harness = Harness::new().await;
    let mut client = harness.connect().await;

    client
        .send("EHLO client.test\r\nMAIL FROM:<alice@example.com>\r\n")
        .await;
    assert_eq!(client.line().await, "503 Pipelining not supported");
    // The queued MAIL was discarded along with the EHLO
    assert_eq!(
        client.cmd("MAIL FROM:<alice@example.com>").await,
        "503 Send HELO/EHLO first"
    );
}

#[tokio::test]
async fn test_shutdown_closes_idle_session() {
    let harness = Harness::new().await;
    let (trigger, shutdown): (ShutdownTrigger, Shutdown) = Shutdown::channel();
    let (mut client, task) = harness.connect_with(shutdown).await;
    client.ehlo().await;

    trigger.trigger();
    assert_eq!(
        client.line().await,
        "421 mx.example.com Service closing transmission channel"
    );
    task.await.unwrap();
}
