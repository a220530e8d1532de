use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Best-effort outbound notification. Failures are logged and swallowed —
/// a missed webhook never affects the chat turn.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// `text` is the plain rendering, `payload` the structured one; which
    /// the receiver gets depends on the implementation.
    async fn send(&self, url: &str, text: &str, payload: Value);
}

/// Plain JSON-POST webhook sender.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, text: &str, payload: Value) {
        let mut body = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.entry("text".to_string())
            .or_insert_with(|| Value::String(text.to_string()));

        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(url, "webhook delivered");
            }
            Ok(resp) => {
                warn!(url, status = resp.status().as_u16(), "webhook rejected");
            }
            Err(e) => {
                warn!(url, err = %e, "webhook delivery failed");
            }
        }
    }
}
