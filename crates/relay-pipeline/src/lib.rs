//! Chat response pipeline — the layer between an upstream model call and a
//! connected client.
//!
//! Pre-processing runs the filter chain and an optional tool-invocation
//! round, post-processing fans the model's output out to three concurrent
//! concerns: live event delivery, incremental persistence, and
//! post-completion background work (title/tags, offline-user webhook).
//!
//! Flow: normalize params → filter chain → tool stage → model call
//! (caller's) → dispatch → {immediate | passthrough | detached stream
//! consumer} → background completion.

pub mod completion;
pub mod dispatch;
pub mod events;
pub mod filters;
pub mod messages;
pub mod openai;
pub mod payload;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod webhook;

pub use dispatch::TurnOutcome;
pub use events::Event;
pub use payload::PreparedRequest;
pub use pipeline::{ChatPipeline, Collaborators};
pub use provider::{ClientError, ModelClient, ModelResponse, ModelTable, StreamingPayload};
pub use store::ChatStore;
pub use tools::SourceRecord;
pub use transport::{Emitter, LiveTransport};
pub use webhook::{HttpWebhookSender, WebhookSender};
