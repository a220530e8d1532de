use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filter '{id}' failed: {reason}")]
    Filter { id: String, reason: String },

    #[error("Model client error: {0}")]
    ModelClient(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Live transport error: {0}")]
    Transport(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
