//! Lightweight statistics over a slice of exchanged messages.

use crate::envelope::{Message, MessageType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    pub message_count: usize,
    /// Number of distinct senders
    pub participants: usize,
    /// Distinct senders, sorted
    pub participant_ids: Vec<String>,
    pub by_type: BTreeMap<String, usize>,
    pub summary: String,
}

/// Count messages and distinct senders and produce a one-line summary.
pub fn analyze_conversation(messages: &[Message]) -> ConversationAnalysis {
    if messages.is_empty() {
        return ConversationAnalysis {
            message_count: 0,
            participants: 0,
            participant_ids: Vec::new(),
            by_type: BTreeMap::new(),
            summary: "No messages found".to_string(),
        };
    }

    let mut per_sender: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for m in messages {
        *per_sender.entry(m.sender_id.as_str()).or_insert(0) += 1;
        *by_type.entry(m.message_type.as_str().to_string()).or_insert(0) += 1;
    }

    // BTreeMap iteration makes the alphabetically first sender win ties
    let (top_sender, top_count) = per_sender
        .iter()
        .fold(("", 0usize), |best, (id, n)| {
            if *n > best.1 {
                (*id, *n)
            } else {
                best
            }
        });

    let requests = by_type
        .get(MessageType::Request.as_str())
        .copied()
        .unwrap_or(0);
    let summary = format!(
        "{} messages from {} participants ({} requests); most active: {} ({} messages)",
        messages.len(),
        per_sender.len(),
        requests,
        top_sender,
        top_count
    );

    ConversationAnalysis {
        message_count: messages.len(),
        participants: per_sender.len(),
        participant_ids: per_sender.keys().map(|s| s.to_string()).collect(),
        by_type,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_conversation() {
        let a = analyze_conversation(&[]);
        assert_eq!(a.message_count, 0);
        assert_eq!(a.summary, "No messages found");
    }

    #[test]
    fn test_counts_participants() {
        let messages: Vec<Message> = (0..10)
            .map(|i| Message::request(format!("user{}", i % 3), "bot", "chat", json!(i)))
            .collect();
        let a = analyze_conversation(&messages);
        assert_eq!(a.message_count, 10);
        assert_eq!(a.participants, 3);
        assert_eq!(a.by_type.get("request"), Some(&10));
        assert!(a.summary.contains("most active: user0 (4 messages)"));
    }
}
