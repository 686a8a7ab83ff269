//! Lossy compression: dedupe consecutive identical messages and truncate
//! oversized message bodies, per spec.md §4.H.

use crate::models::Message;

const MAX_MESSAGE_CHARS: usize = 2000;
const HEAD_CHARS: usize = 1000;
const TAIL_CHARS: usize = 1000;
const TRUNCATION_MARKER: &str = "... [truncated] ...";

/// Remove consecutive duplicate messages (same role, same content) and
/// truncate any message whose content exceeds 2000 characters to
/// `first1000 + marker + last1000`.
pub fn compress(messages: &[Message]) -> Vec<Message> {
    let mut deduped: Vec<Message> = Vec::with_capacity(messages.len());
    for m in messages {
        if let Some(prev) = deduped.last() {
            if prev.role == m.role && prev.content == m.content {
                continue;
            }
        }
        deduped.push(m.clone());
    }

    for m in &mut deduped {
        if m.content.chars().count() > MAX_MESSAGE_CHARS {
            let chars: Vec<char> = m.content.chars().collect();
            let head: String = chars[..HEAD_CHARS].iter().collect();
            let tail: String = chars[chars.len() - TAIL_CHARS..].iter().collect();
            m.content = format!("{head}{TRUNCATION_MARKER}{tail}");
        }
    }

    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn msg(role: Role, content: &str, ts: i64) -> Message {
        Message { role, content: content.to_string(), timestamp: ts }
    }

    #[test]
    fn removes_consecutive_duplicates_only() {
        let messages = vec![
            msg(Role::User, "hi", 1),
            msg(Role::User, "hi", 2),
            msg(Role::Assistant, "hello", 3),
            msg(Role::User, "hi", 4),
        ];
        let compressed = compress(&messages);
        assert_eq!(compressed.len(), 3);
    }

    #[test]
    fn truncates_oversized_content() {
        let long = "a".repeat(3000);
        let messages = vec![msg(Role::User, &long, 1)];
        let compressed = compress(&messages);
        assert!(compressed[0].content.len() < 3000);
        assert!(compressed[0].content.contains("[truncated]"));
        assert!(compressed[0].content.starts_with("aaaa"));
        assert!(compressed[0].content.ends_with("aaaa"));
    }

    #[test]
    fn no_adjacent_duplicates_and_no_oversized_content_invariant() {
        let long = "b".repeat(2500);
        let messages = vec![msg(Role::User, &long, 1), msg(Role::User, &long, 2), msg(Role::Assistant, "ok", 3)];
        let compressed = compress(&messages);
        for pair in compressed.windows(2) {
            assert!(!(pair[0].role == pair[1].role && pair[0].content == pair[1].content));
        }
        for m in &compressed {
            assert!(m.content.chars().count() <= MAX_MESSAGE_CHARS + TRUNCATION_MARKER.len());
        }
    }
}
