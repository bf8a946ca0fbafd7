use concord_core::{deserialize, serialize, Message, MessageType};
use serde_json::json;

#[test]
fn transport_round_trip_preserves_message() {
    let req = Message::request(
        "agent.writer",
        "agent.translator",
        "translate",
        json!({"text": "bom dia", "target_language": "en"}),
    );
    let bytes = serialize(&req).unwrap();
    let back = deserialize(&bytes).unwrap();
    assert_eq!(back, req);
}

#[test]
fn reply_links_to_request() {
    let req = Message::request("a", "b", "chat", json!("hi"));
    let resp = req.reply(json!("hello"));
    assert_eq!(resp.message_type, MessageType::Response);
    assert_eq!(resp.sender_id, "b");
    assert_eq!(resp.receiver_id.as_deref(), Some("a"));
    assert_eq!(resp.correlation_id, req.correlation_id);
    assert_eq!(resp.task, "chat");
}

#[test]
fn notification_is_addressed_without_correlation() {
    let n = Message::notification("system", "agent.a", "reminder", json!({"at": "15:00"}));
    assert_eq!(n.message_type, MessageType::Notification);
    assert_eq!(n.role, "system");
    assert!(n.correlation_id.is_none());
    assert_eq!(n.receiver_id.as_deref(), Some("agent.a"));
}

#[test]
fn decoding_accepts_missing_optionals() {
    let raw = br#"{"content":{"priority":"urgent"},"role":"agent","sender_id":"ops","timestamp_ms":1,"message_type":"broadcast","task":"maintenance"}"#;
    let msg = deserialize(raw).unwrap();
    assert_eq!(msg.message_type, MessageType::Broadcast);
    assert!(msg.receiver_id.is_none());
    assert_eq!(msg.content_str("priority"), Some("urgent"));
}
