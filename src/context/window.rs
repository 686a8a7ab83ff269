//! Window-fit: trims a conversation's message list to a model's token
//! budget while preserving system messages and recency, per spec.md §4.H.

use crate::models::{Message, Role};

use super::estimate_tokens;

/// Fit `messages` into `window - reserved` estimated tokens.
///
/// 1. If already within budget, return unchanged.
/// 2. Otherwise include all system messages, newest-first, until they
///    would exceed budget (older system messages are dropped only if they
///    alone exceed budget).
/// 3. Include newest-first non-system messages while they fit.
/// 4. Re-sort retained messages into chronological order.
pub fn window_fit(messages: &[Message], window: u32, reserved_tokens: u32) -> Vec<Message> {
    let budget = window.saturating_sub(reserved_tokens);
    let total: u32 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let mut used = 0u32;
    let mut retained: Vec<Message> = Vec::new();

    let mut system_newest_first: Vec<&Message> = messages.iter().filter(|m| m.role == Role::System).collect();
    system_newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    for m in system_newest_first {
        let cost = estimate_tokens(&m.content);
        if used + cost > budget && used > 0 {
            break;
        }
        used += cost;
        retained.push(m.clone());
    }

    let mut non_system_newest_first: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();
    non_system_newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    for m in non_system_newest_first {
        let cost = estimate_tokens(&m.content);
        if used + cost > budget {
            break;
        }
        used += cost;
        retained.push(m.clone());
    }

    retained.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    retained
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str, ts: i64) -> Message {
        Message { role, content: content.to_string(), timestamp: ts }
    }

    #[test]
    fn within_budget_is_unchanged() {
        let messages = vec![msg(Role::User, "hi", 1), msg(Role::Assistant, "hello", 2)];
        let fitted = window_fit(&messages, 1000, 100);
        assert_eq!(fitted.len(), 2);
    }

    #[test]
    fn trims_oldest_first_and_keeps_chronological_order() {
        let big = "x".repeat(4000); // ~1000 tokens each
        let messages = vec![msg(Role::User, &big, 1), msg(Role::User, &big, 2), msg(Role::User, &big, 3)];
        let fitted = window_fit(&messages, 2000, 0);
        assert!(fitted.len() < 3);
        for pair in fitted.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        // the most recent message must be retained
        assert_eq!(fitted.last().unwrap().timestamp, 3);
    }

    #[test]
    fn system_messages_are_preserved_over_old_turns() {
        let big = "x".repeat(4000);
        let messages = vec![msg(Role::System, "you are terse", 0), msg(Role::User, &big, 1), msg(Role::User, &big, 2)];
        let fitted = window_fit(&messages, 1200, 0);
        assert!(fitted.iter().any(|m| m.role == Role::System));
    }

    #[test]
    fn hundred_large_messages_fit_under_budget() {
        let messages: Vec<Message> = (0..100).map(|i| msg(Role::User, &"x".repeat(10_000), i)).collect();
        let fitted = window_fit(&messages, 8192, 1000);
        let total: u32 = fitted.iter().map(|m| estimate_tokens(&m.content)).sum();
        assert!(total <= 8192 - 1000);
        for pair in fitted.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }
}
