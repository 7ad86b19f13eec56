//! Model providers backing the agent.

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use agent_core::LlmProvider;
use thiserror::Error;

use crate::config::LlmConfig;

pub use openai::{OpenAiConfig, OpenAiProvider};

#[derive(Debug, Error)]
pub enum ProviderSetupError {
    #[error(
        "no API key configured for model '{0}'; set WEBPILOT_API_KEY or OPENAI_API_KEY, or llm.api_keys in the config file"
    )]
    MissingApiKey(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<&LlmConfig> for OpenAiConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            api_keys: config.api_keys.clone(),
            model: config.model.clone(),
            api_base: config.api_base.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Provider for an `llm` / `planner_llm` config section.
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderSetupError> {
    Ok(Arc::new(OpenAiProvider::new(config.into())?))
}
