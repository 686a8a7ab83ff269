//! Heuristic summarization, pinned from the original `ContextSummarizer`
//! (`examples/original_source/python-glue/unified_ai/context/advanced.py`):
//! when a conversation exceeds a message-count threshold, collapse the
//! oldest 80% into a single synthetic system message. Code-block spans
//! collapse to a marker; sentences carrying decision keywords are retained
//! verbatim.

use crate::models::{Message, Role};

pub const SUMMARIZATION_THRESHOLD: usize = 50;
const OLDEST_FRACTION: f64 = 0.8;
const DECISION_KEYWORDS: &[&str] = &["decided", "decision", "important", "note"];

fn heuristic_summarize_one(message: &Message) -> String {
    if message.content.contains("```") {
        return format!("[Code discussion: {}]", message.role.as_str());
    }

    let kept: Vec<&str> = message
        .content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| {
            let lower = s.to_lowercase();
            DECISION_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .collect();

    if kept.is_empty() {
        format!("[{} said {} characters]", message.role.as_str(), message.content.chars().count())
    } else {
        kept.join(". ")
    }
}

/// If `messages.len() > threshold`, collapse the oldest `OLDEST_FRACTION` of
/// them into one synthetic system message and keep the rest verbatim.
/// Otherwise returns `messages` unchanged.
pub fn summarize(messages: &[Message], threshold: usize) -> Vec<Message> {
    if messages.len() <= threshold {
        return messages.to_vec();
    }

    let cutoff = ((messages.len() as f64) * OLDEST_FRACTION).floor() as usize;
    let (to_summarize, rest) = messages.split_at(cutoff);

    let mut pieces: Vec<String> = Vec::new();
    for m in to_summarize {
        let piece = heuristic_summarize_one(m);
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }

    let summary_content = format!("Summary of {} earlier messages:\n{}", to_summarize.len(), pieces.join("\n"));
    let synthetic_timestamp = to_summarize.last().map(|m| m.timestamp).unwrap_or(0);
    let summary = Message { role: Role::System, content: summary_content, timestamp: synthetic_timestamp };

    let mut out = Vec::with_capacity(rest.len() + 1);
    out.push(summary);
    out.extend(rest.iter().cloned());
    out
}
