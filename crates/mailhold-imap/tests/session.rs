//! Integration tests for the IMAP session machine.
//!
//! These tests feed a scripted client conversation through a mock stream
//! and inspect everything the server wrote back.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailhold_core::{
    DeliveryPipeline, DeliveryPolicy, Directory, Email, MailStore, MessageFlag, NewUser, Shutdown,
};
use mailhold_imap::{ImapServer, ImapSettings, MAX_LITERAL_SIZE};
use mailhold_mime::Message;

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

const PLAIN: &str = "From: carol@remote.test\r\n\
To: alice@example.com\r\n\
Subject: Lunch\r\n\
\r\n\
Noon at the usual place?\r\n";

const WITH_ATTACHMENT: &str = "From: carol@remote.test\r\n\
To: alice@example.com\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--XYZ\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"report.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAECAw==\r\n\
--XYZ--\r\n";

struct Harness {
    store: MailStore,
    pipeline: DeliveryPipeline,
    server: ImapServer,
}

impl Harness {
    async fn new() -> Self {
        let store = MailStore::in_memory().await.unwrap();
        let directory = Directory::new(store.clone());
        let policy = DeliveryPolicy {
            local_domains: vec!["example.com".to_string()],
            default_quota_bytes: 10 * 1024 * 1024,
            quota_overrides: HashMap::new(),
        };
        let pipeline = DeliveryPipeline::new(store.clone(), directory.clone(), policy);
        for (name, password) in [("alice", "wonderland"), ("bob", "builder")] {
            let identity = directory
                .create_user(NewUser {
                    email: format!("{name}@example.com"),
                    username: name.to_string(),
                    password: password.to_string(),
                    full_name: String::new(),
                })
                .await
                .unwrap();
            pipeline.provision(&identity).await.unwrap();
        }
        let settings = ImapSettings {
            banner: "Mailhold".to_string(),
            default_quota_bytes: 1024 * 1024,
        };
        Self {
            store: store.clone(),
            pipeline,
            server: ImapServer::new(settings, store, directory),
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

    /// Runs one connection over `script` and returns the server's output.
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
async fn test_greeting_and_capability() {
    let harness = Harness::new().await;
    let output = harness.session("a1 CAPABILITY\r\na2 LOGOUT\r\n").await;
    let lines = lines(&output);

    assert!(lines[0].starts_with("* OK Mailhold IMAP4rev1 server ready "));
    assert_eq!(lines[1], "* CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=LOGIN");
    assert_eq!(lines[2], "a1 OK CAPABILITY completed");
    assert_eq!(lines[3], "* BYE Mailhold IMAP server signing off");
    assert_eq!(lines[4], "a2 OK LOGOUT completed");
}

#[tokio::test]
async fn test_logout_stops_reading() {
    let harness = Harness::new().await;
    let output = harness.session("a1 LOGOUT\r\na2 NOOP\r\n").await;

    assert!(output.contains("a1 OK LOGOUT completed"));
    assert!(!output.contains("a2"));
}

#[tokio::test]
async fn test_oversized_command_is_refused_before_login() {
    let harness = Harness::new().await;
    let half = MAX_LITERAL_SIZE / 2;
    let chunk = "x".repeat(half);
    let script = format!(
        "a1 LOGIN {{{half}+}}\r\n{chunk} {{{half}+}}\r\n{chunk} {{{half}+}}\r\n{chunk}\r\na2 NOOP\r\n"
    );
    let output = harness.session(&script).await;
    let lines = lines(&output);

    assert_eq!(lines[1], "* BYE command too large (max 17039360 bytes)");
    assert!(!output.contains("a2"));
}

#[tokio::test]
async fn test_unknown_command_and_bad_syntax() {
    let harness = Harness::new().await;
    let output = harness.session("x9 FOOBAR\r\n\r\na1 LOGIN alice\r\n").await;
    let lines = lines(&output);

    assert_eq!(lines[1], "x9 BAD Unknown command");
    assert_eq!(lines[2], "* BAD Empty command line");
    assert_eq!(lines[3], "a1 BAD Missing username or password");
}

#[tokio::test]
async fn test_commands_require_login() {
    let harness = Harness::new().await;
    let output = harness
        .session("a1 SELECT INBOX\r\na2 FETCH 1 FLAGS\r\na3 LOGIN alice wrong\r\n")
        .await;

    assert!(output.contains("a1 NO Not authenticated\r\n"));
    assert!(output.contains("a2 NO Not authenticated\r\n"));
    assert!(output.contains("a3 NO Login failed\r\n"));
}

#[tokio::test]
async fn test_login_with_literal() {
    let harness = Harness::new().await;
    let output = harness
        .session("a1 LOGIN {5}\r\nalice {10+}\r\nwonderland\r\na2 FETCH 1 FLAGS\r\n")
        .await;

    assert!(output.contains("+ Ready for literal data\r\n"));
    assert!(output.contains("a1 OK LOGIN completed\r\n"));
    assert!(output.contains("a2 NO No mailbox selected\r\n"));
}

#[tokio::test]
async fn test_authenticate_points_to_login() {
    let harness = Harness::new().await;
    let output = harness
        .session("a1 AUTHENTICATE PLAIN\r\na2 AUTHENTICATE CRAM-MD5\r\n")
        .await;

    assert!(output.contains("a1 BAD Use LOGIN command\r\n"));
    assert!(output.contains("a2 BAD Unsupported mechanism\r\n"));
}

#[tokio::test]
async fn test_list_and_lsub() {
    let harness = Harness::new().await;
    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 LIST \"\" *\r\n\
             a3 UNSUBSCRIBE Trash\r\n\
             a4 LSUB \"\" *\r\n\
             a5 LIST \"\" \"\"\r\n\
             a6 LIST \"\" inbox\r\n",
        )
        .await;

    assert!(output.contains("* LIST (\\HasNoChildren \\Subscribed) \"/\" \"INBOX\"\r\n"));
    assert!(output.contains("* LIST (\\HasNoChildren \\Subscribed \\Sent) \"/\" \"Sent\"\r\n"));
    assert!(output.contains("a2 OK LIST completed\r\n"));
    assert!(output.contains("a3 OK UNSUBSCRIBE completed\r\n"));
    assert!(output.contains("* LSUB (\\HasNoChildren \\Subscribed) \"/\" \"INBOX\"\r\n"));
    assert!(
        !lines(&output)
            .iter()
            .any(|line| line.starts_with("* LSUB") && line.ends_with("\"Trash\""))
    );
    assert!(output.contains("* LIST (\\Noselect) \"/\" \"\"\r\na5 OK LIST completed\r\n"));
    assert!(output.contains("\"INBOX\"\r\na6 OK LIST completed\r\n"));
}

#[tokio::test]
async fn test_select_counts_deleted_messages() {
    let harness = Harness::new().await;
    for _ in 0..3 {
        harness.deliver(PLAIN).await;
    }

    let first = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 STORE 2 +FLAGS.SILENT (\\Deleted)\r\n\
             a4 LOGOUT\r\n",
        )
        .await;
    assert!(first.contains("* 3 EXISTS\r\n* 3 RECENT\r\n"));
    assert!(first.contains("* OK [UNSEEN 1] "));
    assert!(first.contains("a2 OK [READ-WRITE] SELECT completed\r\n"));
    assert!(first.contains("a3 OK STORE completed\r\n"));

    let second = harness
        .session("a1 LOGIN alice wonderland\r\na2 SELECT inbox\r\n")
        .await;
    assert!(second.contains("* 3 EXISTS\r\n* 0 RECENT\r\n"));
    assert!(second.contains("* OK [UIDNEXT 4] "));
}

#[tokio::test]
async fn test_select_missing_mailbox() {
    let harness = Harness::new().await;
    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 SELECT Nowhere\r\n\
             a4 SEARCH ALL\r\n",
        )
        .await;

    assert!(output.contains("a3 NO Mailbox does not exist\r\n"));
    assert!(output.contains("a4 NO No mailbox selected\r\n"));
}

#[tokio::test]
async fn test_fetch_marks_seen() {
    let harness = Harness::new().await;
    harness.deliver(PLAIN).await;
    let size = PLAIN.len();

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 FETCH 1 (FLAGS RFC822.SIZE)\r\n\
             a4 FETCH 1 BODY.PEEK[HEADER]\r\n\
             a5 UID FETCH 1 BODY[]\r\n\
             a6 FETCH 9 FLAGS\r\n",
        )
        .await;

    assert!(output.contains(&format!("* 1 FETCH (UID 1 FLAGS () RFC822.SIZE {size})\r\n")));
    assert!(output.contains("* 1 FETCH (UID 1 BODY[HEADER] {"));
    assert!(output.contains(&format!("* 1 FETCH (UID 1 BODY[] {{{size}}}\r\n{PLAIN} FLAGS (\\Seen))\r\n")));
    assert!(output.contains("a5 OK FETCH completed\r\n"));
    assert!(output.contains("a6 NO Message not found\r\n"));

    assert!(harness.inbox().await[0].flags.contains(MessageFlag::Seen));
}

#[tokio::test]
async fn test_examine_is_read_only() {
    let harness = Harness::new().await;
    harness.deliver(PLAIN).await;

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 EXAMINE INBOX\r\n\
             a3 FETCH 1 RFC822\r\n\
             a4 STORE 1 +FLAGS (\\Deleted)\r\n\
             a5 EXPUNGE\r\n",
        )
        .await;

    assert!(output.contains("* OK [PERMANENTFLAGS ()] "));
    assert!(output.contains("a2 OK [READ-ONLY] EXAMINE completed\r\n"));
    assert!(output.contains("a4 NO Mailbox is read-only\r\n"));
    assert!(output.contains("a5 NO Mailbox is read-only\r\n"));

    let email = &harness.inbox().await[0];
    assert!(!email.flags.contains(MessageFlag::Seen));
    assert!(email.flags.contains(MessageFlag::Recent));
}

#[tokio::test]
async fn test_search_flags() {
    let harness = Harness::new().await;
    for _ in 0..3 {
        harness.deliver(PLAIN).await;
    }

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 STORE 2 +FLAGS (\\Seen)\r\n\
             a4 SEARCH UNSEEN\r\n\
             a5 STORE 3 +FLAGS (\\Deleted)\r\n\
             a6 SEARCH DELETED\r\n\
             a7 UID SEARCH ALL\r\n\
             a8 SEARCH SUBJECT lunch NOT SEEN\r\n",
        )
        .await;

    assert!(output.contains("* 2 FETCH (UID 2 FLAGS (\\Seen))\r\na3 OK STORE completed\r\n"));
    assert!(output.contains("* SEARCH 1 3\r\na4 OK SEARCH completed\r\n"));
    assert!(output.contains("* SEARCH 3\r\na6 OK SEARCH completed\r\n"));
    assert!(output.contains("* SEARCH 1 2\r\na7 OK SEARCH completed\r\n"));
    assert!(output.contains("* SEARCH 1\r\na8 OK SEARCH completed\r\n"));
}

#[tokio::test]
async fn test_expunge_removes_message_and_attachments() {
    let harness = Harness::new().await;
    harness.deliver(WITH_ATTACHMENT).await;
    harness.deliver(PLAIN).await;

    let doomed = harness.inbox().await[0].id;
    assert!(!harness.store.attachments(doomed).await.unwrap().is_empty());

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 STORE 1 +FLAGS.SILENT (\\Deleted)\r\n\
             a4 EXPUNGE\r\n\
             a5 FETCH 2 UID\r\n",
        )
        .await;

    assert!(output.contains("a3 OK STORE completed\r\n"));
    assert!(output.contains("* 1 EXPUNGE\r\na4 OK EXPUNGE completed\r\n"));
    assert!(output.contains("* 1 FETCH (UID 2)\r\n"));

    let remaining = harness.inbox().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].uid, 2);
    assert!(harness.store.attachments(doomed).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_expunges_silently() {
    let harness = Harness::new().await;
    harness.deliver(PLAIN).await;

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 SELECT INBOX\r\n\
             a3 STORE 1 +FLAGS.SILENT (\\Deleted)\r\n\
             a4 CLOSE\r\n\
             a5 CHECK\r\n",
        )
        .await;

    assert!(!output.contains("EXPUNGE"));
    assert!(output.contains("a4 OK CLOSE completed\r\n"));
    assert!(output.contains("a5 NO No mailbox selected\r\n"));
    assert!(harness.inbox().await.is_empty());
}

#[tokio::test]
async fn test_status_and_create() {
    let harness = Harness::new().await;
    harness.deliver(PLAIN).await;
    harness.deliver(PLAIN).await;

    let output = harness
        .session(
            "a1 LOGIN alice wonderland\r\n\
             a2 STATUS INBOX (MESSAGES UNSEEN UIDNEXT)\r\n\
             a3 CREATE Projects\r\n\
             a4 CREATE projects\r\n\
             a5 CREATE inbox\r\n\
             a6 STATUS Projects (MESSAGES)\r\n\
             a7 STATUS Nowhere (MESSAGES)\r\n",
        )
        .await;

    assert!(output.contains("* STATUS \"INBOX\" (MESSAGES 2 UNSEEN 2 UIDNEXT 3)\r\n"));
    assert!(output.contains("a3 OK CREATE completed\r\n"));
    assert!(output.contains("a5 NO Mailbox already exists\r\n"));
    assert!(output.contains("* STATUS \"Projects\" (MESSAGES 0)\r\n"));
    assert!(output.contains("a7 NO Mailbox does not exist\r\n"));
}

#[tokio::test]
async fn test_users_see_only_their_mail() {
    let harness = Harness::new().await;
    harness.deliver(PLAIN).await;

    let output = harness
        .session("a1 LOGIN bob builder\r\na2 SELECT INBOX\r\n")
        .await;

    assert!(output.contains("* 0 EXISTS\r\n"));
}
