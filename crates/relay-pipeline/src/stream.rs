//! Streaming consumer — the body of the detached background unit spawned
//! for a streaming turn.
//!
//! Replays pre-accumulated events, then walks the upstream stream line by
//! line: emit live, grow the running content, persist per the realtime-save
//! policy, and react to cancellation with a partial save instead of data
//! loss. Cleanup on the upstream response runs exactly once at the end,
//! whatever the outcome.

use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::types::{RequestedTasks, TurnMetadata, UserSummary};

use crate::events::{Event, STREAM_DATA_PREFIX, STREAM_DONE_SENTINEL};
use crate::pipeline::ChatPipeline;
use crate::provider::StreamingPayload;
use crate::transport::Emitter;

impl ChatPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_streaming_consumer(
        &self,
        payload: StreamingPayload,
        events: Vec<Value>,
        metadata: TurnMetadata,
        user: UserSummary,
        tasks: RequestedTasks,
        emitter: Emitter,
        token: CancellationToken,
    ) {
        let chat_id = metadata.chat_id.clone().unwrap_or_default();
        let message_id = metadata.message_id.clone().unwrap_or_default();
        let realtime = self.config.pipeline.realtime_chat_save;

        // Resume from whatever was already persisted for this message, so a
        // retried turn keeps displaying earlier partial progress.
        let mut content = match self.store.get_message(&chat_id, &message_id).await {
            Ok(Some(message)) => message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(err = %e, "could not read prior message state");
                String::new()
            }
        };

        for event in &events {
            emitter.send(Event::Completion(event.clone())).await;
            if let Value::Object(fields) = event {
                if let Err(e) = self
                    .store
                    .upsert_message_fields(&chat_id, &message_id, fields.clone())
                    .await
                {
                    warn!(err = %e, "failed to persist replayed event");
                }
            }
        }

        let mut body = payload.body;
        let cancelled = loop {
            tokio::select! {
                _ = token.cancelled() => break true,
                next = body.next() => match next {
                    None => break false,
                    Some(Err(e)) => {
                        warn!(err = %e, "stream chunk error, treating as end of stream");
                        break false;
                    }
                    Some(Ok(line)) => {
                        self.handle_stream_line(&line, &mut content, &chat_id, &message_id, realtime, &emitter)
                            .await;
                    }
                }
            }
        };

        if cancelled {
            info!(chat_id = %chat_id, message_id = %message_id, "streaming turn cancelled");
            emitter.send(Event::TaskCancelled).await;
            if !realtime {
                // Save partial progress rather than lose it.
                self.persist_content(&chat_id, &message_id, &content).await;
            }
        } else {
            let title = self.store.get_title(&chat_id).await.unwrap_or_else(|e| {
                warn!(err = %e, "could not read chat title");
                None
            });
            let terminal = json!({"done": true, "content": content, "title": title});

            emitter.send(Event::Completion(terminal.clone())).await;
            if !realtime {
                self.persist_content(&chat_id, &message_id, &content).await;
            }
            self.notify_idle_user(&user, title.as_deref().unwrap_or_default(), &content, &chat_id)
                .await;

            // The second emission is the officially observed completion
            // signal: by now the content is durable.
            emitter.send(Event::Completion(terminal)).await;

            self.background_completion(&metadata, &user, &tasks, Some(&emitter))
                .await;
        }

        if let Some(cleanup) = payload.cleanup {
            cleanup.await;
        }
    }

    /// Process one raw line of the upstream stream.
    async fn handle_stream_line(
        &self,
        line: &str,
        content: &mut String,
        chat_id: &str,
        message_id: &str,
        realtime: bool,
        emitter: &Emitter,
    ) {
        let data = line.trim();
        if data.is_empty() {
            return;
        }
        // Only marker-prefixed lines carry events.
        let Some(data) = data.strip_prefix(STREAM_DATA_PREFIX) else {
            return;
        };

        let mut event: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(_) => {
                // The terminal sentinel lands here and is deliberately not
                // acted on; termination is stream exhaustion. Anything else
                // unparsable is noise.
                if data.trim() != STREAM_DONE_SENTINEL {
                    debug!("skipping unparsable stream chunk");
                }
                return;
            }
        };

        if let Some(selected) = event.get("selected_model_id").cloned() {
            // Metadata-only update, no content change.
            let mut fields = Map::new();
            fields.insert("selectedModelId".to_string(), selected);
            if let Err(e) = self
                .store
                .upsert_message_fields(chat_id, message_id, fields)
                .await
            {
                warn!(err = %e, "failed to persist selected model id");
            }
        } else {
            let delta = event
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .map(str::to_string);

            if let Some(delta) = delta {
                content.push_str(&delta);
                if realtime {
                    self.persist_content(chat_id, message_id, content).await;
                } else {
                    // Deferred persistence: the client still needs the full
                    // running content to render.
                    event = json!({"content": content});
                }
            }
        }

        emitter.send(Event::Completion(event)).await;
    }
}
