//! Delivery pipeline.
//!
//! Turns an accepted message into one stored copy per local recipient. Each
//! recipient is handled in its own transaction: the UID counter is bumped
//! first, the quota is checked, then the message, its attachments and the
//! usage update are written. A recipient that fails is skipped without
//! affecting the others.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mailhold_mime::{Attachment, Message};
use tracing::{error, info, warn};

use crate::directory::{Directory, Identity};
use crate::store::{MailStore, Mailbox, MailboxId, MailboxKind, MessageFlag, MessageFlags, NewEmail};
use crate::{Error, Result};

/// Delivery inputs taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct DeliveryPolicy {
    /// Domains accepted as recipients, compared ignoring case.
    pub local_domains: Vec<String>,
    /// Quota for newly created mailboxes.
    pub default_quota_bytes: i64,
    /// Per-address quota overrides, keyed by lowercased address.
    pub quota_overrides: HashMap<String, i64>,
}

impl DeliveryPolicy {
    /// Returns true if `domain` is local.
    #[must_use]
    pub fn accepts_domain(&self, domain: &str) -> bool {
        self.local_domains
            .iter()
            .any(|local| local.eq_ignore_ascii_case(domain))
    }

    /// Quota for a new mailbox of `address`.
    #[must_use]
    pub fn quota_for(&self, address: &str) -> i64 {
        self.quota_overrides
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_quota_bytes)
    }
}

/// A stored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Recipient address as given.
    pub address: String,
    /// Mailbox the copy went to.
    pub mailbox: MailboxId,
    /// Assigned UID.
    pub uid: u32,
}

/// Why a recipient was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No local user has the address.
    UnknownRecipient,
    /// The inbox is at or over quota.
    QuotaExceeded,
    /// The store failed.
    Store(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRecipient => write!(f, "unknown recipient"),
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

/// A recipient that received no copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    /// Recipient address as given.
    pub address: String,
    /// Reason.
    pub reason: SkipReason,
}

/// Outcome of one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients that received a copy.
    pub delivered: Vec<Delivered>,
    /// Recipients that did not.
    pub skipped: Vec<Skipped>,
}

impl DeliveryReport {
    /// Returns true if at least one copy was stored.
    #[must_use]
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Fields extracted from the message once and shared by every recipient.
struct Content<'a> {
    message_id: Option<&'a str>,
    in_reply_to: Option<&'a str>,
    references: Option<&'a str>,
    subject: Option<String>,
    from_address: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    text_body: Option<String>,
    html_body: Option<String>,
    attachments: Vec<Attachment>,
    raw: &'a [u8],
}

/// Stores accepted messages into local mailboxes.
#[derive(Debug, Clone)]
pub struct DeliveryPipeline {
    store: MailStore,
    directory: Directory,
    policy: Arc<DeliveryPolicy>,
}

impl DeliveryPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(store: MailStore, directory: Directory, policy: DeliveryPolicy) -> Self {
        Self {
            store,
            directory,
            policy: Arc::new(policy),
        }
    }

    /// The delivery policy.
    #[must_use]
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Returns true if mail for `domain` is accepted.
    #[must_use]
    pub fn accepts_domain(&self, domain: &str) -> bool {
        self.policy.accepts_domain(domain)
    }

    /// Create the standard mailbox set for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn provision(&self, identity: &Identity) -> Result<Vec<Mailbox>> {
        let quota = self.policy.quota_for(&identity.email);
        let mailboxes = self
            .store
            .provision_mailboxes(identity.user_id, quota)
            .await?;
        info!("Provisioned {} mailboxes for {}", mailboxes.len(), identity.email);
        Ok(mailboxes)
    }

    /// Deliver a message to every recipient independently.
    pub async fn deliver(
        &self,
        sender: &str,
        recipients: &[String],
        message: &Message,
        raw: &[u8],
    ) -> DeliveryReport {
        let content = Content {
            message_id: message.message_id(),
            in_reply_to: message.in_reply_to(),
            references: message.references(),
            subject: message.subject(),
            from_address: message
                .from_address()
                .or_else(|| Some(sender.to_string()).filter(|s| !s.is_empty())),
            to: message.to_addresses(),
            cc: message.cc_addresses(),
            bcc: message.bcc_addresses(),
            text_body: message.text_body(),
            html_body: message.html_body(),
            attachments: message.attachments(),
            raw,
        };

        let mut report = DeliveryReport::default();
        for address in recipients {
            match self.deliver_one(address, &content).await {
                Ok((mailbox, uid)) => {
                    info!("Delivered message from <{sender}> to {address} (uid {uid})");
                    report.delivered.push(Delivered {
                        address: address.clone(),
                        mailbox,
                        uid,
                    });
                }
                Err(e) => {
                    let reason = match e {
                        Error::NotFound(_) => {
                            warn!("Skipping {address}: no such user");
                            SkipReason::UnknownRecipient
                        }
                        Error::QuotaExceeded(_) => {
                            warn!("Skipping {address}: {e}");
                            SkipReason::QuotaExceeded
                        }
                        other => {
                            error!("Delivery to {address} failed: {other}");
                            SkipReason::Store(other.to_string())
                        }
                    };
                    report.skipped.push(Skipped {
                        address: address.clone(),
                        reason,
                    });
                }
            }
        }
        report
    }

    async fn deliver_one(&self, address: &str, content: &Content<'_>) -> Result<(MailboxId, u32)> {
        let identity = self
            .directory
            .user_by_email(address)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {address}")))?;
        let inbox = self
            .store
            .get_or_create_mailbox(
                identity.user_id,
                "INBOX",
                MailboxKind::Inbox,
                self.policy.quota_for(&identity.email),
            )
            .await?;

        let mut tx = self.store.begin().await?;
        // Rolling back on quota releases the UID again
        let uid = tx.next_uid(inbox.id).await?;
        let (used, quota) = tx.mailbox_usage(inbox.id).await?;
        if used >= quota {
            tx.rollback().await?;
            return Err(Error::QuotaExceeded(format!(
                "{} ({used}/{quota} bytes)",
                inbox.name
            )));
        }

        let email = NewEmail {
            mailbox_id: inbox.id,
            uid,
            message_id: content.message_id,
            in_reply_to: content.in_reply_to,
            references: content.references,
            subject: content.subject.as_deref(),
            from_address: content.from_address.as_deref(),
            to: &content.to,
            cc: &content.cc,
            bcc: &content.bcc,
            text_body: content.text_body.as_deref(),
            html_body: content.html_body.as_deref(),
            raw_message: content.raw,
            flags: MessageFlags::empty().with(MessageFlag::Recent),
            internal_date: Utc::now(),
        };
        let email_id = tx.insert_email(&email).await?;
        for attachment in &content.attachments {
            tx.insert_attachment(email_id, attachment).await?;
        }
        let size = i64::try_from(content.raw.len()).unwrap_or(i64::MAX);
        tx.update_mailbox_usage(inbox.id, size).await?;
        tx.commit().await?;

        Ok((inbox.id, uid))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::directory::NewUser;

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy {
            local_domains: vec!["example.com".to_string(), "test.com".to_string()],
            default_quota_bytes: 1_000_000,
            quota_overrides: HashMap::new(),
        }
    }

    async fn add_user(directory: &Directory, name: &str) -> Identity {
        directory
            .create_user(NewUser {
                email: format!("{name}@example.com"),
                username: name.to_string(),
                password: "pw".to_string(),
                full_name: String::new(),
            })
            .await
            .unwrap()
    }

    async fn pipeline_with(policy: DeliveryPolicy, store: MailStore) -> (DeliveryPipeline, Directory) {
        let directory = Directory::new(store.clone());
        (DeliveryPipeline::new(store, directory.clone(), policy), directory)
    }

    fn sized_message(size: usize) -> Vec<u8> {
        let header = b"From: alice@example.com\r\nSubject: sized\r\n\r\n".to_vec();
        let mut raw = header.clone();
        raw.resize(size.max(header.len()), b'x');
        raw
    }

    #[test]
    fn test_policy_domain_and_quota() {
        let mut policy = policy();
        policy
            .quota_overrides
            .insert("big@example.com".to_string(), 5_000_000);

        assert!(policy.accepts_domain("EXAMPLE.com"));
        assert!(!policy.accepts_domain("unknown-domain.test"));
        assert_eq!(policy.quota_for("Big@Example.com"), 5_000_000);
        assert_eq!(policy.quota_for("small@example.com"), 1_000_000);
    }

    #[tokio::test]
    async fn test_deliver_stores_parsed_fields_and_attachments() {
        let store = MailStore::in_memory().await.unwrap();
        let (pipeline, directory) = pipeline_with(policy(), store.clone()).await;
        let bob = add_user(&directory, "bob").await;

        let raw = concat!(
            "From: Alice <alice@example.com>\r\n",
            "To: bob@example.com\r\n",
            "Subject: =?utf-8?B?SMOpbGxv?=\r\n",
            "Message-ID: <abc@example.com>\r\n",
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Body text\r\n",
            "--X\r\n",
            "Content-Type: text/plain; name=notes.txt\r\n",
            "Content-Disposition: attachment; filename=notes.txt\r\n",
            "\r\n",
            "notes\r\n",
            "--X--\r\n"
        )
        .as_bytes();
        let message = Message::parse(raw).unwrap();

        let report = pipeline
            .deliver("alice@example.com", &["bob@example.com".to_string()], &message, raw)
            .await;
        assert_eq!(report.delivered.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(report.delivered[0].uid, 1);

        let inbox = store.get_mailbox(bob.user_id, "INBOX").await.unwrap().unwrap();
        let emails = store.list_emails(inbox.id).await.unwrap();
        assert_eq!(emails.len(), 1);

        let email = &emails[0];
        assert_eq!(email.subject.as_deref(), Some("Héllo"));
        assert_eq!(email.from_address.as_deref(), Some("alice@example.com"));
        assert_eq!(email.to, vec!["bob@example.com".to_string()]);
        assert_eq!(email.text_body.as_deref(), Some("Body text"));
        assert_eq!(email.message_id.as_deref(), Some("<abc@example.com>"));
        assert_eq!(email.raw_message, raw);
        assert!(email.flags.contains(MessageFlag::Recent));

        let attachments = store.attachments(email.id).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "notes.txt");
        assert_eq!(attachments[0].content, b"notes");

        assert_eq!(inbox.used_bytes, i64::try_from(raw.len()).unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_over_quota_recipients_skipped() {
        let store = MailStore::in_memory().await.unwrap();
        let (pipeline, directory) = pipeline_with(policy(), store.clone()).await;
        let bob = add_user(&directory, "bob").await;
        let carol = add_user(&directory, "carol").await;
        add_user(&directory, "dave").await;

        pipeline.provision(&carol).await.unwrap();
        let carol_inbox = store.get_mailbox(carol.user_id, "INBOX").await.unwrap().unwrap();
        store.set_quota(carol_inbox.id, 0).await.unwrap();

        let raw = sized_message(100);
        let message = Message::parse(&raw).unwrap();
        let recipients = vec![
            "bob@example.com".to_string(),
            "carol@example.com".to_string(),
            "dave@example.com".to_string(),
            "nobody@example.com".to_string(),
        ];
        let report = pipeline
            .deliver("alice@example.com", &recipients, &message, &raw)
            .await;

        assert_eq!(report.delivered.len(), 2);
        assert_eq!(
            report.skipped,
            vec![
                Skipped {
                    address: "carol@example.com".to_string(),
                    reason: SkipReason::QuotaExceeded,
                },
                Skipped {
                    address: "nobody@example.com".to_string(),
                    reason: SkipReason::UnknownRecipient,
                },
            ]
        );

        // The rejected delivery did not consume a UID
        let carol_inbox = store.get_mailbox_by_id(carol_inbox.id).await.unwrap().unwrap();
        assert_eq!(carol_inbox.uid_next, 1);
        assert!(store.list_emails(carol_inbox.id).await.unwrap().is_empty());

        let bob_inbox = store.get_mailbox(bob.user_id, "INBOX").await.unwrap().unwrap();
        assert_eq!(store.list_emails(bob_inbox.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_reached_after_deliveries() {
        let mut policy = policy();
        policy.default_quota_bytes = 150;
        let store = MailStore::in_memory().await.unwrap();
        let (pipeline, directory) = pipeline_with(policy, store.clone()).await;
        let bob = add_user(&directory, "bob").await;

        let raw = sized_message(100);
        let message = Message::parse(&raw).unwrap();
        let to = vec!["bob@example.com".to_string()];

        // 0 < 150 and 100 < 150 are accepted; 200 >= 150 is not
        assert!(pipeline.deliver("a@example.com", &to, &message, &raw).await.any_delivered());
        assert!(pipeline.deliver("a@example.com", &to, &message, &raw).await.any_delivered());
        assert!(!pipeline.deliver("a@example.com", &to, &message, &raw).await.any_delivered());

        let inbox = store.get_mailbox(bob.user_id, "INBOX").await.unwrap().unwrap();
        assert_eq!(inbox.used_bytes, 200);
        assert_eq!(inbox.uid_next, 3);
    }

    #[tokio::test]
    async fn test_used_bytes_matches_live_messages() {
        let store = MailStore::in_memory().await.unwrap();
        let (pipeline, directory) = pipeline_with(policy(), store.clone()).await;
        let bob = add_user(&directory, "bob").await;
        let to = vec!["bob@example.com".to_string()];

        for size in [100, 200, 300] {
            let raw = sized_message(size);
            let message = Message::parse(&raw).unwrap();
            pipeline.deliver("a@example.com", &to, &message, &raw).await;
        }

        let inbox = store.get_mailbox(bob.user_id, "INBOX").await.unwrap().unwrap();
        let live: i64 = store
            .list_live_emails(inbox.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.size_bytes)
            .sum();
        assert_eq!(inbox.used_bytes, live);
        assert_eq!(live, 600);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_get_distinct_uids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.db");
        let store = MailStore::new(path.to_str().unwrap()).await.unwrap();
        let (pipeline, directory) = pipeline_with(policy(), store.clone()).await;
        let bob = add_user(&directory, "bob").await;
        pipeline.provision(&bob).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let pipeline = pipeline.clone();
            tasks.spawn(async move {
                let raw = format!("Subject: {i}\r\n\r\nbody {i}\r\n").into_bytes();
                let message = Message::parse(&raw).unwrap();
                pipeline
                    .deliver("a@example.com", &["bob@example.com".to_string()], &message, &raw)
                    .await
            });
        }

        let mut uids = Vec::new();
        while let Some(report) = tasks.join_next().await {
            let report = report.unwrap();
            assert!(report.skipped.is_empty(), "{:?}", report.skipped);
            uids.extend(report.delivered.iter().map(|d| d.uid));
        }
        uids.sort_unstable();
        assert_eq!(uids, (1..=20).collect::<Vec<u32>>());

        let inbox = store.get_mailbox(bob.user_id, "INBOX").await.unwrap().unwrap();
        let stored: Vec<u32> = store
            .list_emails(inbox.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.uid)
            .collect();
        assert_eq!(stored, uids);
        assert_eq!(inbox.uid_next, 21);
    }
}
