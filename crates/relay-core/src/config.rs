use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// How many prior turns of history the function-calling sub-request carries.
pub const FUNCTION_CALLING_HISTORY_TURNS: usize = 4;

/// Title used when neither generation nor the first-message fallback yields
/// non-empty text.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Persist every incremental content delta as it streams in. When false
    /// (the default) content is saved once at stream end — far fewer writes,
    /// at the cost of losing at most one in-flight delta on a crash.
    #[serde(default)]
    pub realtime_chat_save: bool,
    /// Public base URL used to build chat links in webhook notifications.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            realtime_chat_save: false,
            public_url: default_public_url(),
        }
    }
}

/// Task-model policy and prompt template overrides.
///
/// A `None` template falls back to the built-in default; a `None` model
/// override falls back to the conversation's main model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TasksConfig {
    /// Task model for locally-connected main models.
    #[serde(default)]
    pub task_model: Option<String>,
    /// Task model for externally-connected main models.
    #[serde(default)]
    pub task_model_external: Option<String>,
    #[serde(default)]
    pub title_prompt_template: Option<String>,
    #[serde(default)]
    pub tags_prompt_template: Option<String>,
    #[serde(default)]
    pub function_calling_prompt_template: Option<String>,
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deferred_save() {
        let config = RelayConfig::default();
        assert!(!config.pipeline.realtime_chat_save);
        assert!(config.tasks.task_model.is_none());
        assert_eq!(config.pipeline.public_url, "http://localhost:8080");
    }
}
