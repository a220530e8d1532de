//! Plugin capability model for relay.
//!
//! Filters are pre-call plugins that may rewrite the outgoing request body;
//! tools are callables the model itself selects to fetch external
//! information. Both declare a static capability set instead of being
//! inspected reflectively — the chain runner only calls what a plugin
//! declares.

pub mod error;
pub mod registry;
pub mod types;

pub use error::PluginError;
pub use registry::{FilterRegistry, FilterStore, PluginLoader};
pub use types::{
    Capability, EventCaller, EventSink, FilterContext, FilterModule, ToolContext, ToolModule,
    ToolParam, ToolResolver, ToolSpec,
};
