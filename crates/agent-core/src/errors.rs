use thiserror::Error;

use crate::browser::BrowserError;
use crate::llm::LlmError;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when an agent is assembled without a required piece.
    #[error("invalid agent request: {0}")]
    InvalidRequest(String),

    /// Raised when [`AgentSettings::validate`](crate::AgentSettings::validate) rejects a value.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The language model call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The browser rejected or failed an operation.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// The model answered with something that is not a valid agent output.
    #[error("invalid model output: {0}")]
    ModelOutput(String),

    /// The model asked for an action that is not registered.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Action parameters did not match the registered schema.
    #[error("invalid parameters for action '{action}': {message}")]
    InvalidParams { action: String, message: String },

    /// An action handler failed.
    #[error("action '{action}' failed: {message}")]
    Action { action: String, message: String },

    /// The conversation cannot be trimmed under the configured budget.
    #[error("input of {tokens} tokens exceeds the budget of {limit}")]
    TokenBudget { tokens: usize, limit: usize },

    #[error("gif export failed: {0}")]
    Gif(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Helper for wrapping static string errors.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    pub fn model_output(message: impl Into<String>) -> Self {
        Self::ModelOutput(message.into())
    }

    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from the provider throttling requests.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Llm(err) if err.is_rate_limited())
    }
}
