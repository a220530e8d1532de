//! Pre-processing: request normalization and the `process_chat_payload`
//! entry point that runs the filter chain and the tool invocation round
//! before the upstream model call.

use serde_json::{json, Value};
use tracing::debug;

use relay_core::error::Result;
use relay_core::types::{ModelDescriptor, TurnDiagnostics, TurnMetadata, UserSummary};

use crate::pipeline::ChatPipeline;
use crate::tools::SourceRecord;

/// Sampling keys lifted from the nested `params` object onto the envelope's
/// top level. Everything else inside `params` is silently dropped.
const RECOGNIZED_PARAMS: [&str; 5] = ["seed", "stop", "temperature", "top_p", "frequency_penalty"];

/// Copy recognized sampling overrides from `params` onto the top level and
/// remove `params`. Pure data transform, no error conditions.
pub fn apply_params(body: &mut Value) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    let Some(Value::Object(params)) = object.remove("params") else {
        return;
    };

    for key in RECOGNIZED_PARAMS {
        if let Some(value) = params.get(key) {
            object.insert(key.to_string(), value.clone());
        }
    }
}

/// The envelope after pre-processing, ready for the upstream model call.
#[derive(Debug)]
pub struct PreparedRequest {
    pub body: Value,
    pub metadata: TurnMetadata,
    /// Citation-bearing records contributed by tool invocation. Side
    /// channel only — never model-visible message content.
    pub sources: Vec<SourceRecord>,
    /// Events accumulated before the model call, replayed to the client
    /// ahead of the response by the dispatcher.
    pub events: Vec<Value>,
    pub diagnostics: TurnDiagnostics,
}

impl ChatPipeline {
    /// Run the pre-call stages for one turn: normalize sampling params, run
    /// the filter chain, then the best-effort tool invocation round.
    ///
    /// A filter hook error aborts the whole turn; everything else degrades.
    pub async fn process_chat_payload(
        &self,
        mut body: Value,
        mut metadata: TurnMetadata,
        user: &UserSummary,
        model: &ModelDescriptor,
    ) -> Result<PreparedRequest> {
        let mut diagnostics = TurnDiagnostics::new();

        apply_params(&mut body);
        debug!(model = %model.id, "chat payload normalized");

        let emitter = self.transport.event_emitter(&metadata);
        let caller = self.transport.event_caller(&metadata);

        let (new_body, skip_files) = self
            .run_filter_chain(body, user, &metadata, model, emitter, caller, &mut diagnostics)
            .await?;
        body = new_body;

        // Filters may inject tool ids or files into the body; lift them into
        // the metadata the later stages read. The body's values win
        // unconditionally: a chain that strips them also clears any
        // caller-set ones.
        if let Some(object) = body.as_object_mut() {
            metadata.tool_ids = object
                .remove("tool_ids")
                .and_then(|ids| serde_json::from_value(ids).ok());
            metadata.files = match object.remove("files") {
                Some(Value::Array(files)) => Some(files),
                _ => None,
            };
        }
        if let Some(files) = metadata.files.take() {
            metadata.files = Some(dedup_files(files));
        }
        if skip_files {
            // At least one filter handles files itself.
            metadata.files = None;
        }

        let sources = self
            .run_tool_stage(&body, &mut metadata, user, model, &mut diagnostics)
            .await;

        let mut events = Vec::new();
        if !sources.is_empty() {
            events.push(json!({"sources": sources}));
        }

        Ok(PreparedRequest {
            body,
            metadata,
            sources,
            events,
            diagnostics,
        })
    }
}

/// De-duplicate attached files by their canonical JSON form, preserving
/// first-seen order.
fn dedup_files(files: Vec<Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    files
        .into_iter()
        .filter(|file| seen.insert(file.to_string()))
        .collect()
}
