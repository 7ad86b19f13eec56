//! Application configuration.
//!
//! A YAML document with one section per concern. Every section has defaults,
//! so an empty file (or no file at all) is a valid configuration. Secrets and
//! endpoints can be supplied through the environment instead of the file.

use std::path::{Path, PathBuf};

use agent_core::AgentSettings;
use cdp_adapter::BrowserConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const API_KEY_ENV: &str = "WEBPILOT_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const MODEL_ENV: &str = "WEBPILOT_MODEL";
pub const API_BASE_ENV: &str = "WEBPILOT_API_BASE";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Chat model endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    pub api_base: String,
    /// Tried in order; a rate-limited key hands over to the next one.
    pub api_keys: Vec<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_keys: Vec::new(),
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{section}.model is empty")));
        }
        let base = Url::parse(&self.api_base).map_err(|err| {
            ConfigError::Invalid(format!("{section}.api_base is not a URL: {err}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "{section}.api_base must use http or https"
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "{section}.temperature must be between 0 and 2"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}.timeout_secs must be positive"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Separate model for the planner; the planner is off when unset.
    pub planner_llm: Option<LlmConfig>,
    pub agent: AgentSettings,
    pub browser: BrowserConfig,
}

impl AppConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null rather than an empty map.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `WEBPILOT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// `WEBPILOT_API_KEY` (comma separated) replaces the configured keys;
    /// `OPENAI_API_KEY` only fills in when no key is configured at all.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(keys) = non_empty(API_KEY_ENV) {
            self.llm.api_keys = split_keys(&keys);
        } else if self.llm.api_keys.is_empty() {
            if let Some(key) = non_empty(OPENAI_API_KEY_ENV) {
                self.llm.api_keys = split_keys(&key);
            }
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            self.llm.model = model.trim().to_string();
        }
        if let Some(base) = non_empty(API_BASE_ENV) {
            self.llm.api_base = base.trim().to_string();
        }
    }

    /// Planner endpoint with keys and base URL inherited from `llm` when the
    /// planner section leaves them out.
    pub fn resolved_planner_llm(&self) -> Option<LlmConfig> {
        let mut planner = self.planner_llm.clone()?;
        if planner.api_keys.is_empty() {
            planner.api_keys = self.llm.api_keys.clone();
            if planner.api_base == LlmConfig::default().api_base {
                planner.api_base = self.llm.api_base.clone();
            }
        }
        Some(planner)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate("llm")?;
        if let Some(planner) = &self.planner_llm {
            planner.validate("planner_llm")?;
        }
        self.agent
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("agent: {err}")))?;
        if let Some(cdp_url) = &self.browser.cdp_url {
            let url = Url::parse(cdp_url).map_err(|err| {
                ConfigError::Invalid(format!("browser.cdp_url is not a URL: {err}"))
            })?;
            if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
                return Err(ConfigError::Invalid(
                    "browser.cdp_url must use ws, wss, http or https".to_string(),
                ));
            }
        }
        if self.browser.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "browser.command_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy safe to print: API keys are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        mask_keys(&mut copy.llm.api_keys);
        if let Some(planner) = copy.planner_llm.as_mut() {
            mask_keys(&mut planner.api_keys);
        }
        copy
    }
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn mask_keys(keys: &mut [String]) {
    for key in keys.iter_mut() {
        *key = REDACTED.to_string();
    }
}

/// Where the configuration is read from when `--config` is not given:
/// `./config/webpilot.yaml` if present, else the per-user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from("config/webpilot.yaml");
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(mut path) => {
            path.push("webpilot");
            path.push("config.yaml");
            path
        }
        None => local,
    }
}
