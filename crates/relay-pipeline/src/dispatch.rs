//! Response dispatcher — classifies the upstream response as immediate or
//! streaming and routes it to one of the terminal paths.

use futures_util::stream;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use relay_core::error::Result;
use relay_core::types::{RequestedTasks, TurnMetadata, UserSummary};

use crate::events::{Event, STREAM_DATA_PREFIX};
use crate::pipeline::ChatPipeline;
use crate::provider::{assistant_message_content, ModelResponse, StreamingPayload};

/// What one turn hands back to the calling layer.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The original response object, returned verbatim after any inline
    /// side effects ran.
    Immediate(Value),
    /// The (possibly event-prefixed) stream, for the caller to forward
    /// synchronously. No background task exists in this case.
    Passthrough(StreamingPayload),
    /// Stream consumption was detached; the caller returns immediately.
    Detached { task_id: String },
}

impl TurnOutcome {
    /// JSON surface for the non-passthrough cases: the response object
    /// itself, or `{"status": true, "task_id": ...}` for a detached turn.
    pub fn response_value(&self) -> Option<Value> {
        match self {
            TurnOutcome::Immediate(value) => Some(value.clone()),
            TurnOutcome::Passthrough(_) => None,
            TurnOutcome::Detached { task_id } => {
                Some(json!({"status": true, "task_id": task_id}))
            }
        }
    }
}

impl ChatPipeline {
    /// Post-processing entry point: route the upstream response.
    ///
    /// Immediate responses run their side effects inline; event streams
    /// with a live client are consumed by a detached background task and
    /// this returns at once with the task handle.
    pub async fn process_chat_response(
        self: &Arc<Self>,
        response: ModelResponse,
        metadata: TurnMetadata,
        user: &UserSummary,
        events: Vec<Value>,
        tasks: RequestedTasks,
    ) -> Result<TurnOutcome> {
        match response {
            ModelResponse::Immediate(value) => {
                self.dispatch_immediate(value, &metadata, user, tasks).await
            }
            ModelResponse::Streaming(payload) => {
                self.dispatch_streaming(payload, metadata, user, events, tasks)
            }
        }
    }

    async fn dispatch_immediate(
        &self,
        value: Value,
        metadata: &TurnMetadata,
        user: &UserSummary,
        tasks: RequestedTasks,
    ) -> Result<TurnOutcome> {
        // Without an addressable client there is nothing to do.
        let Some(emitter) = self.emitter_for(metadata) else {
            return Ok(TurnOutcome::Immediate(value));
        };
        let (Some(chat_id), Some(message_id)) = (&metadata.chat_id, &metadata.message_id) else {
            return Ok(TurnOutcome::Immediate(value));
        };

        if let Some(selected) = value.get("selected_model_id").cloned() {
            let mut fields = Map::new();
            fields.insert("selectedModelId".to_string(), selected);
            self.store
                .upsert_message_fields(chat_id, message_id, fields)
                .await?;
        }

        if let Some(content) = assistant_message_content(&value).filter(|c| !c.is_empty()) {
            emitter.send(Event::Completion(value.clone())).await;

            let title = self.store.get_title(chat_id).await?;
            emitter
                .send(Event::Completion(
                    json!({"done": true, "content": content, "title": title}),
                ))
                .await;

            self.persist_content(chat_id, message_id, &content).await;
            self.notify_idle_user(user, title.as_deref().unwrap_or_default(), &content, chat_id)
                .await;

            // Same completion routine the streaming path runs at its tail;
            // here it finishes before the response is returned.
            self.background_completion(metadata, user, &tasks, Some(&emitter))
                .await;
        }

        Ok(TurnOutcome::Immediate(value))
    }

    fn dispatch_streaming(
        self: &Arc<Self>,
        payload: StreamingPayload,
        metadata: TurnMetadata,
        user: &UserSummary,
        events: Vec<Value>,
        tasks: RequestedTasks,
    ) -> Result<TurnOutcome> {
        if !payload.is_event_stream() {
            // Unknown body shape: hands off, pass it through untouched.
            return Ok(TurnOutcome::Passthrough(payload));
        }

        let Some(emitter) = self.emitter_for(&metadata) else {
            debug!("no live-event target, passing stream through with replayed events");
            return Ok(TurnOutcome::Passthrough(prepend_events(payload, events)));
        };

        let pipeline = Arc::clone(self);
        let user = user.clone();
        let task_id = self.tasks.spawn(move |token| async move {
            pipeline
                .run_streaming_consumer(payload, events, metadata, user, tasks, emitter, token)
                .await;
        });
        debug!(task_id = %task_id, "streaming turn detached");

        Ok(TurnOutcome::Detached { task_id })
    }

    /// Best-effort offline notification: fires only when the user is absent
    /// from the live session pool entirely and has a webhook configured.
    pub(crate) async fn notify_idle_user(
        &self,
        user: &UserSummary,
        title: &str,
        content: &str,
        chat_id: &str,
    ) {
        if self.transport.is_user_active(&user.id).await.is_some() {
            return;
        }
        let Some(url) = &user.webhook_url else {
            return;
        };

        let chat_url = format!("{}/c/{}", self.config.pipeline.public_url, chat_id);
        let text = format!("{title} - {chat_url}\n\n{content}");
        let payload = json!({
            "action": "chat",
            "message": content,
            "title": title,
            "url": chat_url,
        });
        self.webhook.send(url, &text, payload).await;
    }

    /// Persist the message content, logging (not propagating) failures —
    /// the client already saw the content via the live event.
    pub(crate) async fn persist_content(&self, chat_id: &str, message_id: &str, content: &str) {
        let mut fields = Map::new();
        fields.insert("content".to_string(), Value::String(content.to_string()));
        if let Err(e) = self
            .store
            .upsert_message_fields(chat_id, message_id, fields)
            .await
        {
            warn!(chat_id, message_id, err = %e, "failed to persist content");
        }
    }
}

/// Wrap a raw stream so pre-accumulated events are replayed ahead of the
/// original lines, preserving headers and cleanup semantics.
fn prepend_events(payload: StreamingPayload, events: Vec<Value>) -> StreamingPayload {
    use futures_util::StreamExt;

    if events.is_empty() {
        return payload;
    }

    let replay = stream::iter(
        events
            .into_iter()
            .map(|event| Ok(format!("{STREAM_DATA_PREFIX}{event}"))),
    );
    StreamingPayload {
        content_type: payload.content_type,
        body: Box::pin(replay.chain(payload.body)),
        cleanup: payload.cleanup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn detached_response_surface() {
        let outcome = TurnOutcome::Detached { task_id: "t-1".into() };
        assert_eq!(
            outcome.response_value(),
            Some(json!({"status": true, "task_id": "t-1"}))
        );
    }

    #[tokio::test]
    async fn prepend_events_replays_ahead_of_body() {
        let payload = StreamingPayload {
            content_type: "text/event-stream".into(),
            body: Box::pin(stream::iter(vec![Ok("data: {\"x\": 1}".to_string())])),
            cleanup: None,
        };
        let wrapped = prepend_events(payload, vec![json!({"sources": []})]);

        let lines: Vec<String> = wrapped.body.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("data: "));
        assert!(lines[0].contains("sources"));
        assert_eq!(lines[1], "data: {\"x\": 1}");
    }
}
