//! Helpers over stored message objects.
//!
//! Messages are JSON maps with `parentId` links forming a tree; the current
//! branch of a conversation is the ancestor path from the root down to one
//! message.

use serde_json::Value;
use std::collections::HashMap;

/// Reconstruct the ordered ancestor path leading to `message_id`, root
/// first. Returns an empty list when the id is unknown.
pub fn message_chain(messages: &HashMap<String, Value>, message_id: &str) -> Vec<Value> {
    let mut chain = Vec::new();
    let mut current = messages.get(message_id);

    while let Some(message) = current {
        chain.insert(0, message.clone());
        current = message
            .get("parentId")
            .and_then(Value::as_str)
            .and_then(|parent_id| messages.get(parent_id));
    }

    chain
}

/// Extract the text of a message's `content`, which is either a plain
/// string or a list of typed parts (the first `text` part wins).
pub fn content_text(message: &Value) -> Option<String> {
    match message.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => parts
            .iter()
            .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Latest user-authored message text in an ordered message list.
pub fn last_user_message(messages: &[Value]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .and_then(content_text)
}
