//! Tool invocation stage — asks the model (via a constrained sub-call) to
//! select one of the declared tools, executes it, and folds its output into
//! a side channel of sources.
//!
//! Strictly best-effort: any failure here yields an unchanged envelope and
//! empty sources, never a failed turn.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use relay_core::config::FUNCTION_CALLING_HISTORY_TURNS;
use relay_core::error::RelayError;
use relay_core::types::{
    ConnectionKind, ModelDescriptor, TaskKind, TurnDiagnostics, TurnMetadata, UserSummary,
};
use relay_plugins::ToolContext;

use crate::messages::{content_text, last_user_message};
use crate::pipeline::ChatPipeline;

/// Default prompt instructing the task model to pick a tool, parameterized
/// with the serialized tool specs.
pub const DEFAULT_FUNCTION_CALLING_TEMPLATE: &str = r#"Available Tools: {{TOOLS}}
Return an empty string if no tools match the query. If a function tool matches, construct and return a JSON object in the format {"name": "functionName", "parameters": {"requiredFunctionParamKey": "requiredFunctionParamValue"}} using the appropriate tool and its parameters. Only return the object and limit the response to the JSON object without additional text."#;

/// One citation-bearing record of text contributed by a tool. Attached to
/// the turn, never persisted as model-visible message content.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRecord {
    pub source: Value,
    pub document: Vec<String>,
    pub metadata: Vec<Value>,
}

/// What the function-calling sub-call decided.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSelectionOutcome {
    /// The turn declared no tools at all.
    NotRequested,
    /// The sub-call produced no parsable selection — a no-op, not an error.
    NoToolChosen,
    Selected {
        name: String,
        parameters: Map<String, Value>,
    },
}

/// Locate the first `{...}` JSON object substring: from the first `{` to
/// the last `}`.
pub(crate) fn first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end >= start).then(|| &s[start..=end])
}

/// Parse the sub-call's content into a selection. Anything unparsable means
/// no tool was chosen.
pub(crate) fn parse_tool_selection(content: &str) -> ToolSelectionOutcome {
    let Some(raw) = first_json_object(content) else {
        return ToolSelectionOutcome::NoToolChosen;
    };
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ToolSelectionOutcome::NoToolChosen;
    };
    let Some(name) = value.get("name").and_then(Value::as_str) else {
        return ToolSelectionOutcome::NoToolChosen;
    };
    let parameters = match value.get("parameters") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    ToolSelectionOutcome::Selected {
        name: name.to_string(),
        parameters,
    }
}

impl ChatPipeline {
    /// Run the tool invocation round. No-op without declared tool ids; all
    /// failures are logged, recorded, and swallowed.
    pub(crate) async fn run_tool_stage(
        &self,
        body: &Value,
        metadata: &mut TurnMetadata,
        user: &UserSummary,
        model: &ModelDescriptor,
        diagnostics: &mut TurnDiagnostics,
    ) -> Vec<SourceRecord> {
        let Some(tool_ids) = metadata.tool_ids.clone().filter(|ids| !ids.is_empty()) else {
            return Vec::new();
        };

        match self
            .invoke_selected_tool(body, metadata, user, model, &tool_ids)
            .await
        {
            Ok((sources, skip_files)) => {
                if skip_files {
                    // The tool consumed the attachments itself.
                    metadata.files = None;
                }
                sources
            }
            Err(e) => {
                warn!(err = %e, "tool invocation degraded, continuing without sources");
                diagnostics.record("tools", e);
                Vec::new()
            }
        }
    }

    async fn invoke_selected_tool(
        &self,
        body: &Value,
        metadata: &TurnMetadata,
        user: &UserSummary,
        model: &ModelDescriptor,
        tool_ids: &[String],
    ) -> Result<(Vec<SourceRecord>, bool), RelayError> {
        let task_model = self.resolve_task_model(model).await;

        let ctx = ToolContext { user, metadata };
        let tools = self
            .tool_resolver
            .resolve(tool_ids, &ctx)
            .await
            .map_err(|e| RelayError::Internal(format!("tool resolution: {e}")))?;
        if tools.is_empty() {
            return Ok((Vec::new(), false));
        }

        let specs: Vec<_> = tools.iter().map(|tool| tool.spec()).collect();
        let template = self
            .config
            .tasks
            .function_calling_prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_FUNCTION_CALLING_TEMPLATE);
        let system = template.replace("{{TOOLS}}", &serde_json::to_string(&specs)?);

        let sub_request = build_sub_request(body, &task_model, &system, metadata);
        debug!(task_model = %task_model, tools = tools.len(), "function calling sub-call");

        let response = self
            .client
            .complete(&sub_request)
            .await
            .map_err(|e| RelayError::ModelClient(e.to_string()))?;
        let Some(content) = response.into_assistant_content().await else {
            return Ok((Vec::new(), false));
        };

        let ToolSelectionOutcome::Selected { name, parameters } = parse_tool_selection(&content)
        else {
            debug!("no tool selected");
            return Ok((Vec::new(), false));
        };

        let Some(tool) = tools.iter().find(|tool| tool.spec().name == name) else {
            debug!(tool = %name, "selected tool not among resolved tools");
            return Ok((Vec::new(), false));
        };

        // Only the parameters the spec marks required are forwarded.
        let mut args = Map::new();
        for param in tool.spec().required_params() {
            if let Some(value) = parameters.get(param) {
                args.insert(param.to_string(), value.clone());
            }
        }

        info!(tool = %name, "executing model-selected tool");
        let output = match tool.call(args).await {
            Ok(output) => output,
            // Tool output is untrusted content either way; a failure becomes
            // visible data instead of a pipeline error.
            Err(e) => e.to_string(),
        };

        let source = if tool.citation() {
            json!({ "name": name })
        } else {
            json!({})
        };
        let record = SourceRecord {
            source,
            document: vec![output],
            metadata: vec![json!({ "source": name })],
        };

        Ok((vec![record], tool.file_handler()))
    }

    /// Resolve the model used for sub-requests: the configured task model
    /// for the main model's connection kind, when set and known to the
    /// model table; otherwise the main model itself.
    pub(crate) async fn resolve_task_model(&self, model: &ModelDescriptor) -> String {
        let override_id = match model.connection {
            ConnectionKind::Local => self.config.tasks.task_model.as_deref(),
            ConnectionKind::External => self.config.tasks.task_model_external.as_deref(),
        };

        match override_id {
            Some(id) if !id.is_empty() && self.models.get(id).await.is_some() => id.to_string(),
            _ => model.id.clone(),
        }
    }
}

/// Build the function-calling sub-request: rendered system prompt, the last
/// few prior turns (newest first) plus the latest user query, non-streaming,
/// tagged as a function-calling task.
fn build_sub_request(body: &Value, task_model: &str, system: &str, metadata: &TurnMetadata) -> Value {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let prompt = last_user_message(&messages).unwrap_or_default();

    let prior = &messages[..messages.len().saturating_sub(1)];
    let history = prior
        .iter()
        .rev()
        .take(FUNCTION_CALLING_HISTORY_TURNS)
        .filter_map(|message| {
            let role = message.get("role").and_then(Value::as_str)?;
            let content = content_text(message)?;
            Some(format!("{}: \"\"\"{}\"\"\"", role.to_uppercase(), content))
        })
        .collect::<Vec<_>>()
        .join("\n");

    json!({
        "model": task_model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": format!("History:\n{history}\nQuery: {prompt}") },
        ],
        "stream": false,
        "metadata": {
            "task": TaskKind::FunctionCalling.to_string(),
            "chat_id": metadata.chat_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_json_object_spans_first_brace_to_last() {
        assert_eq!(first_json_object("noise {\"a\": 1} trailing"), Some("{\"a\": 1}"));
        assert_eq!(
            first_json_object("x {\"a\": {\"b\": 2}} y"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(first_json_object("no braces here"), None);
        assert_eq!(first_json_object("} backwards {"), None);
    }

    #[test]
    fn selection_parses_embedded_object() {
        let outcome = parse_tool_selection(
            "noise {\"name\": \"lookup\", \"parameters\": {\"q\": \"x\"}} trailing",
        );
        match outcome {
            ToolSelectionOutcome::Selected { name, parameters } => {
                assert_eq!(name, "lookup");
                assert_eq!(parameters.get("q"), Some(&json!("x")));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn malformed_selection_means_no_tool() {
        assert_eq!(parse_tool_selection(""), ToolSelectionOutcome::NoToolChosen);
        assert_eq!(
            parse_tool_selection("the model rambled with no json"),
            ToolSelectionOutcome::NoToolChosen
        );
        assert_eq!(
            parse_tool_selection("{\"not\": \"a selection\"}"),
            ToolSelectionOutcome::NoToolChosen
        );
        // First-to-last brace span with a dangling value is not valid JSON.
        assert_eq!(
            parse_tool_selection("{\"name\": } trailing {"),
            ToolSelectionOutcome::NoToolChosen
        );
    }

    #[test]
    fn span_recovers_first_object_when_tail_is_truncated() {
        // The last `}` closes the first object, so the span parses.
        assert_eq!(
            parse_tool_selection("{\"name\": \"a\"} {\"name\": \"b\""),
            ToolSelectionOutcome::Selected {
                name: "a".to_string(),
                parameters: Map::new(),
            }
        );
    }

    #[test]
    fn reversed_braces_yield_no_selection() {
        assert_eq!(
            parse_tool_selection("} backwards {"),
            ToolSelectionOutcome::NoToolChosen
        );
    }

    #[test]
    fn sub_request_carries_history_and_query() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "one"},
                {"role": "assistant", "content": "two"},
                {"role": "user", "content": "three"},
            ]
        });
        let metadata = TurnMetadata {
            chat_id: Some("c1".into()),
            ..Default::default()
        };
        let sub = build_sub_request(&body, "task-model", "SYSTEM", &metadata);

        assert_eq!(sub["model"], "task-model");
        assert_eq!(sub["stream"], json!(false));
        assert_eq!(sub["metadata"]["task"], "function_calling");
        let user_content = sub["messages"][1]["content"].as_str().unwrap();
        assert!(user_content.ends_with("Query: three"));
        // Prior turns are newest first.
        let history_pos = |s: &str| user_content.find(s).unwrap();
        assert!(history_pos("ASSISTANT") < history_pos("USER"));
    }
}
