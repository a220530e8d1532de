use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use relay_core::types::{ModelDescriptor, TurnMetadata, UserSummary};

use crate::error::PluginError;

/// Optional interfaces a plugin can declare. The chain runner only invokes
/// what is declared — there is no reflective parameter inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// The plugin exposes a pre-call hook that may rewrite the request body.
    PreCallHook,
    /// The plugin wants per-user valve configuration materialized before
    /// its hook runs.
    UserValves,
    /// The plugin handles attached files itself; the pipeline suppresses
    /// them from the envelope after the chain runs.
    FileHandler,
}

/// Fire-and-forget event delivery handle. Given to filters so they can push
/// interim status to the connected client; also used by the pipeline itself.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event payload. Delivery failures are the transport's
    /// problem — implementations log and swallow them.
    async fn emit(&self, event: Value);
}

/// Request/response handle into the live transport: send a request to the
/// connected client and await its answer.
#[async_trait]
pub trait EventCaller: Send + Sync {
    async fn call(&self, request: Value) -> Result<Value, PluginError>;
}

/// Everything a filter's pre-call hook may look at, built fresh per
/// invocation.
pub struct FilterContext<'a> {
    pub filter_id: &'a str,
    pub user: &'a UserSummary,
    pub metadata: &'a TurnMetadata,
    pub model: &'a ModelDescriptor,
    /// Installation-level valve configuration, when stored.
    pub valves: Option<Value>,
    /// Per-(filter, user) valve configuration. Only materialized when the
    /// module declares [`Capability::UserValves`]; a materialization failure
    /// leaves this `None` without aborting the chain.
    pub user_valves: Option<Value>,
    pub emitter: Option<Arc<dyn EventSink>>,
    pub caller: Option<Arc<dyn EventCaller>>,
}

/// A loaded filter plugin. Loaded lazily per id and cached for the process
/// lifetime by [`crate::registry::FilterRegistry`].
#[async_trait]
pub trait FilterModule: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    /// Pre-call hook: receives the outgoing request body and returns its
    /// replacement. Invoked only when [`Capability::PreCallHook`] is
    /// declared. An error here aborts the whole turn.
    async fn inlet(&self, body: Value, ctx: &FilterContext<'_>) -> Result<Value, PluginError> {
        let _ = ctx;
        Ok(body)
    }
}

impl dyn FilterModule {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities().contains(&cap)
    }
}

/// One declared parameter of a tool spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

/// Declared shape of a tool, serialized into the function-calling prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ToolParam>,
}

impl ToolSpec {
    /// Names of the parameters marked required — the only arguments the
    /// pipeline forwards from a model-selected invocation.
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// A tool resolved for one turn. Never cached across turns — valves and
/// user context vary per request.
#[async_trait]
pub trait ToolModule: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// When set, the tool's output is recorded under a named source so the
    /// client can render a citation.
    fn citation(&self) -> bool {
        false
    }

    /// When set, the tool consumes attached files itself and the pipeline
    /// suppresses them from the envelope.
    fn file_handler(&self) -> bool {
        false
    }

    /// Execute the tool. An error here becomes the tool's textual output,
    /// not a pipeline failure — tool output is untrusted content either way.
    async fn call(&self, args: Map<String, Value>) -> Result<String, PluginError>;
}

/// Per-turn context handed to the tool resolver.
pub struct ToolContext<'a> {
    pub user: &'a UserSummary,
    pub metadata: &'a TurnMetadata,
}

/// Resolves declared tool ids to callable modules for one turn.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(
        &self,
        tool_ids: &[String],
        ctx: &ToolContext<'_>,
    ) -> Result<Vec<Arc<dyn ToolModule>>, PluginError>;
}
