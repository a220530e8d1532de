use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {id}")]
    NotFound { id: String },

    #[error("Failed to load plugin '{id}': {reason}")]
    Load { id: String, reason: String },

    #[error("Valve configuration error for '{id}': {reason}")]
    Valves { id: String, reason: String },

    #[error("Plugin execution failed: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
