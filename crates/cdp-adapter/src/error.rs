use std::fmt;

use agent_core::BrowserError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("navigation failed")]
    NavFailed,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("page script failed")]
    ScriptFailed,
    #[error("target not found")]
    TargetNotFound,
    #[error("option not found")]
    OptionNotFound,
    #[error("browser context closed")]
    Closed,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Internal).with_hint(hint)
    }

    pub fn io(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::CdpIo).with_hint(hint)
    }
}

impl From<AdapterError> for BrowserError {
    fn from(err: AdapterError) -> Self {
        let detail = err.hint.clone().unwrap_or_else(|| err.kind.to_string());
        match err.kind {
            AdapterErrorKind::NavTimeout | AdapterErrorKind::NavFailed => {
                BrowserError::Navigation(detail)
            }
            AdapterErrorKind::ScriptFailed => BrowserError::Script(detail),
            AdapterErrorKind::Closed => BrowserError::Closed,
            _ => BrowserError::Other(err.to_string()),
        }
    }
}
