use async_trait::async_trait;
use std::sync::Arc;

use relay_core::types::TurnMetadata;
use relay_plugins::{EventCaller, EventSink};

use crate::events::Event;

/// The channel that delivers asynchronous events to a connected client and
/// optionally awaits client-side responses. Wire format is the host's
/// concern; the pipeline only sees the handles.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Event delivery handle for this turn's session/chat/message triple.
    /// `None` when no client is addressable for the metadata.
    fn event_emitter(&self, metadata: &TurnMetadata) -> Option<Arc<dyn EventSink>>;

    /// Request/response handle toward the connected client.
    fn event_caller(&self, metadata: &TurnMetadata) -> Option<Arc<dyn EventCaller>>;

    /// Whether the user currently has a live connection. `None` when the
    /// user is absent from the session pool entirely.
    async fn is_user_active(&self, user_id: &str) -> Option<bool>;
}

/// Typed wrapper over the raw event sink used throughout the pipeline.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn send(&self, event: Event) {
        self.sink.emit(event.to_value()).await;
    }

    /// The raw sink, for handing to filter hooks.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }
}
