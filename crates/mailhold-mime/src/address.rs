//! Address-list extraction from header values.

/// Extracts bare addresses from an RFC 5322 address-list header value.
///
/// Handles display names (quoted or not), angle-bracket addresses, comments
/// and groups (`undisclosed-recipients:;`). Entries without an `@` are
/// dropped.
///
/// ```
/// use mailhold_mime::parse_address_list;
///
/// let list = parse_address_list(r#""Doe, Jane" <jane@example.com>, bob@example.com"#);
/// assert_eq!(list, vec!["jane@example.com", "bob@example.com"]);
/// ```
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<String> {
    split_top_level(value)
        .into_iter()
        .filter_map(|entry| extract_address(&entry))
        .collect()
}

/// Splits on commas and group terminators outside quotes, angle brackets and
/// comments.
fn split_top_level(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0usize;
    let mut comment_depth = 0usize;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '"' if comment_depth == 0 => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => comment_depth += 1,
            ')' if !in_quotes && comment_depth > 0 => comment_depth -= 1,
            _ if comment_depth > 0 => {}
            '<' if !in_quotes => {
                angle_depth += 1;
                current.push(ch);
            }
            '>' if !in_quotes => {
                angle_depth = angle_depth.saturating_sub(1);
                current.push(ch);
            }
            // "group-name:" opens a group; its members follow
            ':' if !in_quotes && angle_depth == 0 => current.clear(),
            ',' | ';' if !in_quotes && angle_depth == 0 => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    entries.push(current);
    entries
}

fn extract_address(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let address = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => &entry[open + 1..close],
        _ => entry,
    };
    let address = address.trim().trim_matches('"');
    if address.contains('@') && !address.contains(char::is_whitespace) {
        Some(address.to_string())
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_addresses() {
        assert_eq!(
            parse_address_list("a@example.com, b@example.com"),
            vec!["a@example.com", "b@example.com"]
        );
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            parse_address_list("Alice <alice@example.com>, \"Bob B.\" <bob@example.com>"),
            vec!["alice@example.com", "bob@example.com"]
        );
    }

    #[test]
    fn test_comma_inside_quoted_name() {
        assert_eq!(
            parse_address_list("\"Smith, John\" <john@example.com>"),
            vec!["john@example.com"]
        );
    }

    #[test]
    fn test_comments_ignored() {
        assert_eq!(
            parse_address_list("carol@example.com (Carol, from sales)"),
            vec!["carol@example.com"]
        );
    }

    #[test]
    fn test_groups() {
        assert!(parse_address_list("undisclosed-recipients:;").is_empty());
        assert_eq!(
            parse_address_list("team: a@example.com, b@example.com;"),
            vec!["a@example.com", "b@example.com"]
        );
    }

    #[test]
    fn test_empty_and_junk() {
        assert!(parse_address_list("").is_empty());
        assert!(parse_address_list("not an address").is_empty());
    }
}
