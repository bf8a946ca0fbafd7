use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{now_ms, Result};

/// Well-known payload keys shared by the built-in capabilities and broadcasts.
pub mod keys {
    /// Broadcast urgency label ("urgent", "high", "normal", "low")
    pub const PRIORITY: &str = "priority";
    /// Chat message text
    pub const MESSAGE: &str = "message";
    /// Text to translate or analyze
    pub const TEXT: &str = "text";
    /// Target language for translation
    pub const TARGET_LANGUAGE: &str = "target_language";
    /// Instruction for analysis
    pub const INSTRUCTION: &str = "instruction";
    /// Whether a chat turn should consult stored context
    pub const USE_CONTEXT: &str = "use_context";
}

/// Kind of an agent-to-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Broadcast,
    Notification,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Broadcast => "broadcast",
            MessageType::Notification => "notification",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent-to-agent message.
///
/// Messages are transient: their effect on an agent is recorded as context entries,
/// the message itself is not retained.
///
/// # Fields
///
/// * `content` - JSON payload
/// * `role` - Free-form label of the sending side (e.g. "agent", "system")
/// * `sender_id` - Agent that built the message
/// * `receiver_id` - Addressee; `None` for broadcasts
/// * `timestamp_ms` - Creation time in milliseconds since epoch
/// * `message_type` - Request, response, broadcast or notification
/// * `correlation_id` - Links a response to its request; `None` for broadcasts
/// * `task` - Task name for requests and responses, topic for broadcasts
///
/// # Examples
///
/// ```
/// use concord_core::{Message, MessageType};
/// use serde_json::json;
///
/// let req = Message::request("agent.writer", "agent.translator", "translate", json!({"text": "hi"}));
/// assert_eq!(req.message_type, MessageType::Request);
/// assert!(req.correlation_id.is_some());
///
/// let resp = req.reply(json!("olá"));
/// assert_eq!(resp.message_type, MessageType::Response);
/// assert_eq!(resp.correlation_id, req.correlation_id);
/// assert_eq!(resp.receiver_id.as_deref(), Some("agent.writer"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: Value,
    pub role: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub timestamp_ms: i64,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub task: String,
}

impl Message {
    /// Build a request with a fresh correlation id.
    pub fn request(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        task: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            content,
            role: "agent".to_string(),
            sender_id: sender_id.into(),
            receiver_id: Some(receiver_id.into()),
            timestamp_ms: now_ms(),
            message_type: MessageType::Request,
            correlation_id: Some(next_correlation_id()),
            task: task.into(),
        }
    }

    /// Build the response to this request, swapping sender and receiver and keeping
    /// the correlation id.
    pub fn reply(&self, content: Value) -> Self {
        Self {
            content,
            role: "agent".to_string(),
            sender_id: self
                .receiver_id
                .clone()
                .unwrap_or_else(|| self.sender_id.clone()),
            receiver_id: Some(self.sender_id.clone()),
            timestamp_ms: now_ms(),
            message_type: MessageType::Response,
            correlation_id: self.correlation_id.clone(),
            task: self.task.clone(),
        }
    }

    /// Build a broadcast on `topic`. Broadcasts carry no receiver and no correlation id.
    ///
    /// # Examples
    ///
    /// ```
    /// use concord_core::Message;
    /// use serde_json::json;
    ///
    /// let b = Message::broadcast("agent.ops", "maintenance", json!({"priority": "urgent"}));
    /// assert!(b.receiver_id.is_none());
    /// assert!(b.correlation_id.is_none());
    /// assert_eq!(b.task, "maintenance");
    /// ```
    pub fn broadcast(sender_id: impl Into<String>, topic: impl Into<String>, content: Value) -> Self {
        Self {
            content,
            role: "agent".to_string(),
            sender_id: sender_id.into(),
            receiver_id: None,
            timestamp_ms: now_ms(),
            message_type: MessageType::Broadcast,
            correlation_id: None,
            task: topic.into(),
        }
    }

    /// One-way notice addressed to a single agent
    pub fn notification(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        topic: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            content,
            role: "system".to_string(),
            sender_id: sender_id.into(),
            receiver_id: Some(receiver_id.into()),
            timestamp_ms: now_ms(),
            message_type: MessageType::Notification,
            correlation_id: None,
            task: topic.into(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Read a string field of an object payload
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Text rendering of the payload: the string itself, or compact JSON
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            v => v.to_string(),
        }
    }
}

static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// `req_{millis}_{seq}`; unique within the process
pub fn next_correlation_id() -> String {
    let seq = CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("req_{}_{}", now_ms(), seq)
}

/// Encode a message for a transport (JSON bytes)
pub fn serialize(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a message produced by `serialize`
pub fn deserialize(bytes: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = next_correlation_id();
        let b = next_correlation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req_"));
    }

    #[test]
    fn test_wire_format_uses_lowercase_type() {
        let msg = Message::broadcast("a", "news", json!({}));
        let bytes = serialize(&msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""message_type":"broadcast""#));
        assert!(!text.contains("correlation_id"));
    }

    #[test]
    fn test_content_text() {
        let msg = Message::request("a", "b", "chat", json!({"message": "hi"}));
        assert_eq!(msg.content_str(keys::MESSAGE), Some("hi"));
        assert_eq!(Message::request("a", "b", "chat", json!("plain")).content_text(), "plain");
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(deserialize(b"not json").is_err());
    }
}
