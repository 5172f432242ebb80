//! SEARCH evaluation over stored messages.

use mailhold_core::{Email, MessageFlag};

use super::response::split_header;
use crate::command::SearchKey;

/// Returns the UIDs of `emails` matching every key, in mailbox order.
///
/// Messages marked deleted only match when some key asks for `DELETED`.
#[must_use]
pub fn search(criteria: &[SearchKey], emails: &[Email]) -> Vec<u32> {
    let include_deleted = criteria.iter().any(SearchKey::mentions_deleted);
    let last = emails.iter().map(|email| email.uid).max().unwrap_or(0);

    emails
        .iter()
        .filter(|email| include_deleted || !email.is_deleted)
        .filter(|email| criteria.iter().all(|key| key.matches(email, last)))
        .map(|email| email.uid)
        .collect()
}

impl SearchKey {
    /// Evaluates the key against one message; `last` is the highest UID in
    /// the mailbox.
    #[must_use]
    pub fn matches(&self, email: &Email, last: u32) -> bool {
        let has = |flag| email.flags.contains(flag);
        match self {
            Self::All => true,
            Self::Answered => has(MessageFlag::Answered),
            Self::Deleted => has(MessageFlag::Deleted),
            Self::Draft => has(MessageFlag::Draft),
            Self::Flagged => has(MessageFlag::Flagged),
            Self::New => has(MessageFlag::Recent) && !has(MessageFlag::Seen),
            Self::Old => !has(MessageFlag::Recent),
            Self::Recent => has(MessageFlag::Recent),
            Self::Seen => has(MessageFlag::Seen),
            Self::Unanswered => !has(MessageFlag::Answered),
            Self::Undeleted => !has(MessageFlag::Deleted),
            Self::Undraft => !has(MessageFlag::Draft),
            Self::Unflagged => !has(MessageFlag::Flagged),
            Self::Unseen => !has(MessageFlag::Seen),
            Self::Uid(set) => set.contains(email.uid, last),
            Self::From(needle) => contains(email.from_address.as_deref().unwrap_or(""), needle),
            Self::To(needle) => email.to.iter().any(|a| contains(a, needle)),
            Self::Cc(needle) => email.cc.iter().any(|a| contains(a, needle)),
            Self::Bcc(needle) => email.bcc.iter().any(|a| contains(a, needle)),
            Self::Subject(needle) => contains(email.subject.as_deref().unwrap_or(""), needle),
            Self::Body(needle) => match &email.text_body {
                Some(text) => contains(text, needle),
                None => {
                    let (_, body) = split_header(&email.raw_message);
                    contains(&String::from_utf8_lossy(body), needle)
                }
            },
            Self::Text(needle) => contains(&String::from_utf8_lossy(&email.raw_message), needle),
            Self::Before(day) => email.internal_date.date_naive() < *day,
            Self::On(day) => email.internal_date.date_naive() == *day,
            Self::Since(day) => email.internal_date.date_naive() >= *day,
            Self::Larger(size) => email.size_bytes > i64::from(*size),
            Self::Smaller(size) => email.size_bytes < i64::from(*size),
            Self::And(keys) => keys.iter().all(|key| key.matches(email, last)),
            Self::Or(a, b) => a.matches(email, last) || b.matches(email, last),
            Self::Not(key) => !key.matches(email, last),
        }
    }
}

/// Case-insensitive substring test.
fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::UidSet;
    use chrono::{NaiveDate, TimeZone, Utc};
    use mailhold_core::{EmailId, MailboxId, MessageFlags};

    fn email(uid: u32, flags: &[MessageFlag], subject: &str) -> Email {
        let raw = format!("From: bob@example.com\r\nSubject: {subject}\r\n\r\nHello there\r\n");
        Email {
            id: EmailId(i64::from(uid)),
            mailbox_id: MailboxId(1),
            uid,
            message_id: None,
            in_reply_to: None,
            references: None,
            subject: Some(subject.to_string()),
            from_address: Some("bob@example.com".to_string()),
            to: vec!["alice@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            text_body: None,
            html_body: None,
            size_bytes: i64::try_from(raw.len()).unwrap(),
            raw_message: raw.into_bytes(),
            flags: flags.iter().copied().collect::<MessageFlags>(),
            internal_date: Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
            is_deleted: flags.contains(&MessageFlag::Deleted),
        }
    }

    fn mailbox() -> Vec<Email> {
        vec![
            email(1, &[MessageFlag::Seen], "Lunch"),
            email(2, &[MessageFlag::Recent], "Quarterly report"),
            email(3, &[MessageFlag::Deleted, MessageFlag::Seen], "Old news"),
            email(5, &[MessageFlag::Flagged], "Report draft"),
        ]
    }

    #[test]
    fn test_bare_search_skips_deleted() {
        assert_eq!(search(&[], &mailbox()), vec![1, 2, 5]);
        assert_eq!(search(&[SearchKey::All], &mailbox()), vec![1, 2, 5]);
    }

    #[test]
    fn test_flag_keys() {
        assert_eq!(search(&[SearchKey::Unseen], &mailbox()), vec![2, 5]);
        assert_eq!(search(&[SearchKey::Deleted], &mailbox()), vec![3]);
        assert_eq!(search(&[SearchKey::Seen], &mailbox()), vec![1]);
        assert_eq!(search(&[SearchKey::New], &mailbox()), vec![2]);
        assert_eq!(
            search(&[SearchKey::Not(Box::new(SearchKey::Deleted))], &mailbox()),
            vec![1, 2, 5]
        );
    }

    #[test]
    fn test_text_keys() {
        assert_eq!(
            search(&[SearchKey::Subject("report".to_string())], &mailbox()),
            vec![2, 5]
        );
        assert_eq!(
            search(&[SearchKey::From("BOB@".to_string())], &mailbox()),
            vec![1, 2, 5]
        );
        assert_eq!(
            search(&[SearchKey::Body("hello".to_string())], &mailbox()),
            vec![1, 2, 5]
        );
        assert_eq!(
            search(&[SearchKey::Text("subject: lunch".to_string())], &mailbox()),
            vec![1]
        );
    }

    #[test]
    fn test_combinators_and_sets() {
        let key = SearchKey::Or(
            Box::new(SearchKey::Flagged),
            Box::new(SearchKey::Uid(UidSet::Single(1))),
        );
        assert_eq!(search(&[key], &mailbox()), vec![1, 5]);
        assert_eq!(search(&[SearchKey::Uid(UidSet::All)], &mailbox()), vec![5]);
        assert_eq!(
            search(
                &[SearchKey::And(vec![SearchKey::Unseen, SearchKey::Unflagged])],
                &mailbox()
            ),
            vec![2]
        );
    }

    #[test]
    fn test_dates_and_sizes() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(search(&[SearchKey::On(day)], &mailbox()).len(), 3);
        assert!(search(&[SearchKey::Before(day)], &mailbox()).is_empty());
        assert_eq!(search(&[SearchKey::Since(day)], &mailbox()).len(), 3);
        assert_eq!(search(&[SearchKey::Larger(10_000)], &mailbox()), Vec::<u32>::new());
        assert_eq!(search(&[SearchKey::Smaller(10_000)], &mailbox()).len(), 3);
    }
}
