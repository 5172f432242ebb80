//! UID sets for message ranges.

use std::fmt;

/// UID-based sequence set, as sent by the client.
///
/// `*` stands for the highest UID in the mailbox, so membership is always
/// checked against that value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSet {
    /// Single UID.
    Single(u32),
    /// Range of UIDs (inclusive, in either order).
    Range(u32, u32),
    /// Range from start to highest UID.
    RangeFrom(u32),
    /// The highest UID (`*`).
    All,
    /// Multiple UID specifications.
    Set(Vec<Self>),
}

impl UidSet {
    /// Parses `n`, `a:b`, `a:*`, `*` and comma-separated lists of those.
    ///
    /// Zero is not a valid UID. Returns `None` for malformed input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut items = s
            .split(',')
            .map(Self::parse_item)
            .collect::<Option<Vec<_>>>()?;
        if items.len() == 1 {
            items.pop()
        } else {
            Some(Self::Set(items))
        }
    }

    fn parse_item(s: &str) -> Option<Self> {
        match s.split_once(':') {
            None if s == "*" => Some(Self::All),
            None => parse_uid(s).map(Self::Single),
            Some(("*", "*")) => Some(Self::All),
            Some((start, "*") | ("*", start)) => parse_uid(start).map(Self::RangeFrom),
            Some((start, end)) => Some(Self::Range(parse_uid(start)?, parse_uid(end)?)),
        }
    }

    /// Returns true if `uid` is in the set, with `*` meaning `last`.
    #[must_use]
    pub fn contains(&self, uid: u32, last: u32) -> bool {
        match self {
            Self::Single(n) => uid == *n,
            Self::Range(a, b) => (*a.min(b)..=*a.max(b)).contains(&uid),
            Self::RangeFrom(start) => (*start.min(&last)..=*start.max(&last)).contains(&uid),
            Self::All => uid == last,
            Self::Set(items) => items.iter().any(|item| item.contains(uid, last)),
        }
    }

    /// Returns true if the set names exactly one concrete UID.
    #[must_use]
    pub const fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

fn parse_uid(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|n| *n > 0)
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::All => write!(f, "*"),
            Self::Set(items) => {
                let s: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", s.join(","))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_forms() {
        assert_eq!(UidSet::parse("5"), Some(UidSet::Single(5)));
        assert_eq!(UidSet::parse("1:10"), Some(UidSet::Range(1, 10)));
        assert_eq!(UidSet::parse("50:*"), Some(UidSet::RangeFrom(50)));
        assert_eq!(UidSet::parse("*:50"), Some(UidSet::RangeFrom(50)));
        assert_eq!(UidSet::parse("*"), Some(UidSet::All));
        assert_eq!(
            UidSet::parse("1,5:10"),
            Some(UidSet::Set(vec![UidSet::Single(1), UidSet::Range(5, 10)]))
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "0", "1:0", "a", "1:", ":2", "1,,2", "1:2:3", "-1", "+1", "1 2"] {
            assert_eq!(UidSet::parse(bad), None, "{bad}");
        }
    }

    #[test]
    fn contains_ranges() {
        let set = UidSet::parse("2,4:6").unwrap();
        assert!(!set.contains(1, 10));
        assert!(set.contains(2, 10));
        assert!(!set.contains(3, 10));
        assert!(set.contains(5, 10));
        assert!(!set.contains(7, 10));

        // Reversed ranges are equivalent
        assert!(UidSet::Range(6, 4).contains(5, 10));
    }

    #[test]
    fn contains_star() {
        assert!(UidSet::All.contains(9, 9));
        assert!(!UidSet::All.contains(8, 9));
        assert!(UidSet::RangeFrom(3).contains(9, 9));
        assert!(!UidSet::RangeFrom(3).contains(2, 9));
        // n:* with n past the end still includes the last message
        assert!(UidSet::RangeFrom(20).contains(9, 9));
        assert!(!UidSet::RangeFrom(20).contains(8, 9));
    }

    #[test]
    fn display() {
        assert_eq!(UidSet::parse("1,5:10,20:*").unwrap().to_string(), "1,5:10,20:*");
        assert_eq!(UidSet::All.to_string(), "*");
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in "[0-9:*,a]{0,24}") {
            let _ = UidSet::parse(&s);
        }

        #[test]
        fn range_contains_bounds(a in 1u32..10_000, b in 1u32..10_000) {
            let set = UidSet::parse(&format!("{a}:{b}")).unwrap();
            prop_assert!(set.contains(a, 10_000));
            prop_assert!(set.contains(b, 10_000));
            prop_assert!(!set.contains(a.max(b) + 1, 20_000));
        }

        #[test]
        fn display_reparses(items in proptest::collection::vec((1u32..500, 1u32..500), 1..5)) {
            let text = items
                .iter()
                .map(|(a, b)| format!("{a}:{b}"))
                .collect::<Vec<_>>()
                .join(",");
            let set = UidSet::parse(&text).unwrap();
            prop_assert_eq!(UidSet::parse(&set.to_string()), Some(set));
        }
    }
}
