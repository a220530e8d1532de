use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Minimal user summary passed through the pipeline for one turn.
///
/// The pipeline never loads users itself — the calling layer resolves the
/// authenticated user and hands this snapshot down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    /// Destination for offline-user notifications, when the user set one.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// How a model is reached. Decides which task-model override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Served by the local inference runtime.
    #[default]
    Local,
    /// Proxied to an external API.
    External,
}

/// Descriptor for one entry of the model table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection: ConnectionKind,
    /// Filter ids declared on the model itself, merged with the global set
    /// when the filter chain resolves its execution order.
    #[serde(default)]
    pub filter_ids: Vec<String>,
}

/// Per-turn request metadata carried alongside the envelope body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_ids: Option<Vec<String>>,
    /// Attached file references, kept as raw JSON — the pipeline only ever
    /// de-duplicates or suppresses them, never inspects their shape.
    #[serde(default)]
    pub files: Option<Vec<Value>>,
    /// Task tag for sub-requests (e.g. function calling, title generation).
    #[serde(default)]
    pub task: Option<TaskKind>,
}

impl TurnMetadata {
    /// A live-event target exists only when the full session/chat/message
    /// triple is present.
    pub fn has_event_target(&self) -> bool {
        self.session_id.is_some() && self.chat_id.is_some() && self.message_id.is_some()
    }
}

/// Background task kinds the completion handler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TitleGeneration,
    TagsGeneration,
    FunctionCalling,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::TitleGeneration => "title_generation",
            TaskKind::TagsGeneration => "tags_generation",
            TaskKind::FunctionCalling => "function_calling",
        };
        write!(f, "{s}")
    }
}

/// Which post-completion tasks the calling layer requested for this turn.
///
/// `title_generation: Some(false)` means the task was requested but inference
/// is disabled — the handler falls back to deriving a title from the first
/// exchange instead of calling the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestedTasks {
    #[serde(default)]
    pub title_generation: Option<bool>,
    #[serde(default)]
    pub tags_generation: Option<bool>,
}

impl RequestedTasks {
    pub fn is_empty(&self) -> bool {
        self.title_generation.is_none() && self.tags_generation.is_none()
    }
}

/// Non-fatal failures captured while a turn degrades gracefully.
///
/// Stages push a stage-tagged note instead of aborting; the list surfaces on
/// the turn result for observability and is never branched on.
#[derive(Debug, Clone, Default)]
pub struct TurnDiagnostics {
    entries: Vec<String>,
}

impl TurnDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &str, detail: impl fmt::Display) {
        self.entries.push(format!("{stage}: {detail}"));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_target_requires_full_triple() {
        let mut meta = TurnMetadata {
            chat_id: Some("c1".into()),
            message_id: Some("m1".into()),
            ..Default::default()
        };
        assert!(!meta.has_event_target());
        meta.session_id = Some("s1".into());
        assert!(meta.has_event_target());
    }

    #[test]
    fn task_kind_display_tags() {
        assert_eq!(TaskKind::TitleGeneration.to_string(), "title_generation");
        assert_eq!(TaskKind::FunctionCalling.to_string(), "function_calling");
    }

    #[test]
    fn diagnostics_accumulate() {
        let mut diag = TurnDiagnostics::new();
        assert!(diag.is_empty());
        diag.record("tools", "sub-call failed");
        assert_eq!(diag.entries(), ["tools: sub-call failed"]);
    }
}
