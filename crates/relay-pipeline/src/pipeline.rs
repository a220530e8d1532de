use std::sync::Arc;

use relay_core::config::RelayConfig;
use relay_core::types::TurnMetadata;
use relay_plugins::{FilterRegistry, FilterStore, PluginLoader, ToolResolver};
use relay_tasks::TaskRegistry;

use crate::provider::{ModelClient, ModelTable};
use crate::store::ChatStore;
use crate::transport::{Emitter, LiveTransport};
use crate::webhook::WebhookSender;

/// External collaborators the pipeline drives. All are trait objects — the
/// host wires real implementations, tests wire mocks.
pub struct Collaborators {
    pub loader: Arc<dyn PluginLoader>,
    pub filter_store: Arc<dyn FilterStore>,
    pub tool_resolver: Arc<dyn ToolResolver>,
    pub models: Arc<dyn ModelTable>,
    pub client: Arc<dyn ModelClient>,
    pub store: Arc<dyn ChatStore>,
    pub transport: Arc<dyn LiveTransport>,
    pub webhook: Arc<dyn WebhookSender>,
}

/// The chat response pipeline. One instance per process, shared via Arc;
/// each call processes one turn and turns are independent of each other.
pub struct ChatPipeline {
    pub(crate) config: RelayConfig,
    pub(crate) filters: FilterRegistry,
    pub(crate) filter_store: Arc<dyn FilterStore>,
    pub(crate) tool_resolver: Arc<dyn ToolResolver>,
    pub(crate) models: Arc<dyn ModelTable>,
    pub(crate) client: Arc<dyn ModelClient>,
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) transport: Arc<dyn LiveTransport>,
    pub(crate) webhook: Arc<dyn WebhookSender>,
    pub(crate) tasks: TaskRegistry,
}

impl ChatPipeline {
    pub fn new(config: RelayConfig, collaborators: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            config,
            filters: FilterRegistry::new(collaborators.loader),
            filter_store: collaborators.filter_store,
            tool_resolver: collaborators.tool_resolver,
            models: collaborators.models,
            client: collaborators.client,
            store: collaborators.store,
            transport: collaborators.transport,
            webhook: collaborators.webhook,
            tasks: TaskRegistry::new(),
        })
    }

    /// The registry holding this pipeline's detached streaming tasks. The
    /// calling layer uses it to cancel a turn by its returned task id.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Typed emitter for this turn, present only when the full
    /// session/chat/message triple addresses a live client.
    pub(crate) fn emitter_for(&self, metadata: &TurnMetadata) -> Option<Emitter> {
        if !metadata.has_event_target() {
            return None;
        }
        self.transport.event_emitter(metadata).map(Emitter::new)
    }
}
