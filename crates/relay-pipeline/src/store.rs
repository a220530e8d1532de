use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

use relay_core::error::Result;

/// Durable chat/message store.
///
/// Messages are JSON objects keyed by `(chat_id, message_id)`; writes are
/// field-set upserts and must be applied in call order for one message —
/// later partial-content writes monotonically extend earlier ones, so the
/// store must not reorder or coalesce them.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Full message map of a chat, keyed by message id.
    async fn get_messages(&self, chat_id: &str) -> Result<HashMap<String, Value>>;

    async fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<Value>>;

    /// Merge the given fields into the message, creating it if absent.
    /// Last-writer-wins at field-set granularity.
    async fn upsert_message_fields(
        &self,
        chat_id: &str,
        message_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()>;

    async fn get_title(&self, chat_id: &str) -> Result<Option<String>>;

    async fn set_title(&self, chat_id: &str, title: &str) -> Result<()>;

    async fn set_tags(&self, chat_id: &str, tags: &[String], user_id: &str) -> Result<()>;
}
