use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::future::BoxFuture;
use serde_json::Value;

use relay_core::types::ModelDescriptor;

/// Newline-terminated chunks of a streaming response body. Each line may
/// carry an optional `data: ` marker in front of its JSON payload.
pub type LineStream = BoxStream<'static, Result<String, ClientError>>;

/// Content types treated as streaming by the dispatcher. Anything else is
/// passed through untouched.
pub const STREAMING_CONTENT_TYPES: [&str; 2] = ["text/event-stream", "application/x-ndjson"];

/// A streaming response from the model client: headers reduced to the one
/// field the dispatcher needs, a line-oriented body, and an optional
/// post-completion cleanup hook the consumer must run exactly once.
pub struct StreamingPayload {
    pub content_type: String,
    pub body: LineStream,
    pub cleanup: Option<BoxFuture<'static, ()>>,
}

impl StreamingPayload {
    pub fn is_event_stream(&self) -> bool {
        STREAMING_CONTENT_TYPES
            .iter()
            .any(|t| self.content_type.contains(t))
    }
}

impl std::fmt::Debug for StreamingPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPayload")
            .field("content_type", &self.content_type)
            .field("cleanup", &self.cleanup.is_some())
            .finish_non_exhaustive()
    }
}

/// What the upstream model call produced: either a complete response object
/// or an open-ended incremental stream.
#[derive(Debug)]
pub enum ModelResponse {
    Immediate(Value),
    Streaming(StreamingPayload),
}

impl ModelResponse {
    /// Assistant content of a sub-call result, whether immediate or
    /// streamed.
    ///
    /// A streamed body is drained fully — each parsed line may carry a
    /// complete response object and the last one wins, nothing is
    /// concatenated — and its cleanup hook runs before returning.
    pub async fn into_assistant_content(self) -> Option<String> {
        use futures_util::StreamExt;

        use crate::events::STREAM_DATA_PREFIX;

        match self {
            ModelResponse::Immediate(value) => assistant_message_content(&value),
            ModelResponse::Streaming(payload) => {
                let mut content = None;
                let mut body = payload.body;
                while let Some(line) = body.next().await {
                    let Ok(line) = line else { continue };
                    let line = line.trim();
                    let data = line.strip_prefix(STREAM_DATA_PREFIX).unwrap_or(line);
                    if data.is_empty() {
                        continue;
                    }
                    if let Ok(value) = serde_json::from_str::<Value>(data) {
                        if let Some(text) = assistant_message_content(&value) {
                            content = Some(text);
                        }
                    }
                }
                if let Some(cleanup) = payload.cleanup {
                    cleanup.await;
                }
                content
            }
        }
    }
}

/// `choices[0].message.content` of a complete response object.
pub(crate) fn assistant_message_content(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Client for the model-inference backend. The request envelope is sent as
/// built by the pipeline; whether the result streams is the backend's call
/// (usually the envelope's `stream` flag).
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, envelope: &Value) -> Result<ModelResponse, ClientError>;
}

/// Lookup of currently-known models, used for task-model resolution.
#[async_trait]
pub trait ModelTable: Send + Sync {
    async fn get(&self, id: &str) -> Option<ModelDescriptor>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    fn payload(content_type: &str) -> StreamingPayload {
        StreamingPayload {
            content_type: content_type.to_string(),
            body: Box::pin(stream::empty()),
            cleanup: None,
        }
    }

    #[test]
    fn event_stream_content_types() {
        assert!(payload("text/event-stream").is_event_stream());
        assert!(payload("text/event-stream; charset=utf-8").is_event_stream());
        assert!(payload("application/x-ndjson").is_event_stream());
        assert!(!payload("application/json").is_event_stream());
    }

    #[tokio::test]
    async fn immediate_content_extraction() {
        let response = ModelResponse::Immediate(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        }));
        assert_eq!(response.into_assistant_content().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn streamed_content_last_object_wins_and_cleanup_runs() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);

        let lines = vec![
            Ok("data: {\"choices\": [{\"message\": {\"content\": \"partial\"}}]}".to_string()),
            Ok("not json at all".to_string()),
            Ok("{\"choices\": [{\"message\": {\"content\": \"final\"}}]}".to_string()),
        ];
        let response = ModelResponse::Streaming(StreamingPayload {
            content_type: "application/x-ndjson".to_string(),
            body: Box::pin(stream::iter(lines)),
            cleanup: Some(Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            })),
        });

        assert_eq!(response.into_assistant_content().await.as_deref(), Some("final"));
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
