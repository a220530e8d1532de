//! OpenAI-compatible model client.
//!
//! The envelope built by the pipeline is forwarded as-is; whether the
//! response streams is decided by the server from the envelope's `stream`
//! flag and reported through the response content type.

use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::{ClientError, ModelClient, ModelResponse, StreamingPayload};

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, envelope: &Value) -> Result<ModelResponse, ClientError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(
            model = envelope.get("model").and_then(|v| v.as_str()).unwrap_or(""),
            "sending request to OpenAI-compatible backend"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(envelope)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream")
            || content_type.contains("application/x-ndjson")
        {
            Ok(ModelResponse::Streaming(StreamingPayload {
                content_type,
                body: Box::pin(line_stream(resp)),
                cleanup: None,
            }))
        } else {
            let value: Value = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(e.to_string()))?;
            Ok(ModelResponse::Immediate(value))
        }
    }
}

/// Re-chunk the raw byte stream into whole lines. Incomplete trailing data
/// is buffered until the next chunk; non-UTF-8 chunks are skipped.
fn line_stream(resp: reqwest::Response) -> impl futures_util::Stream<Item = Result<String, ClientError>> {
    use futures_util::StreamExt;

    stream! {
        let mut line_buf = String::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ClientError::Stream(e.to_string()));
                    return;
                }
            };

            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };
            line_buf.push_str(text);

            while let Some(pos) = line_buf.find('\n') {
                let line = line_buf[..pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=pos);
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }

        let tail = line_buf.trim();
        if !tail.is_empty() {
            yield Ok(tail.to_string());
        }
    }
}
