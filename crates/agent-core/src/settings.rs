//! Configuration for agent runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// How the model is asked to produce structured output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallingMethod {
    /// Pick the best mode for the provider; currently JSON mode.
    #[default]
    Auto,
    /// Request a JSON object response from the provider.
    JsonMode,
    /// Free-form completion; the JSON object is extracted from the text.
    Raw,
}

impl ToolCallingMethod {
    pub fn wants_json_mode(&self) -> bool {
        matches!(self, Self::Auto | Self::JsonMode)
    }
}

/// Behavioural settings for an [`Agent`](crate::Agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Step ceiling used by [`Agent::run`](crate::Agent::run) callers that do
    /// not pass their own limit.
    /// Default: 100
    pub max_steps: u32,

    /// Attach page screenshots to the model input.
    /// Default: true
    pub use_vision: bool,

    /// Upper bound on actions executed from a single model decision.
    /// Default: 10
    pub max_actions_per_step: u32,

    /// Consecutive failed steps before the run is aborted.
    /// Default: 3
    pub max_failures: u32,

    /// Pause after a rate-limited model call.
    /// Default: 10 seconds
    #[serde(rename = "retry_delay_secs", with = "duration_secs")]
    pub retry_delay: Duration,

    /// Write an animated replay of the run's screenshots.
    /// Default: false
    pub generate_gif: bool,

    /// Destination of the replay; `agent_history.gif` when unset.
    pub gif_path: Option<PathBuf>,

    /// Periodically fold older conversation into a procedural memory summary.
    /// Default: true
    pub enable_memory: bool,

    /// Steps between memory summaries.
    /// Default: 10
    pub memory_interval: u32,

    /// Steps between planner consultations (only with a planner model).
    /// Default: 1
    pub planner_interval: u32,

    /// Send screenshots to the planner model.
    /// Default: true
    pub use_vision_for_planner: bool,

    /// Strip `<think>` blocks from planner output.
    pub is_planner_reasoning: bool,

    pub extend_planner_system_message: Option<String>,

    /// Replace the default system prompt entirely.
    pub override_system_message: Option<String>,

    /// Append to the default system prompt.
    pub extend_system_message: Option<String>,

    /// Additional task context placed after the system prompt.
    pub message_context: Option<String>,

    /// Directory receiving one prompt/response dump per step.
    pub save_conversation_path: Option<PathBuf>,

    /// Token budget for the conversation sent to the model.
    /// Default: 128000
    pub max_input_tokens: usize,

    /// Element attributes rendered in the interactive element list.
    pub include_attributes: Vec<String>,

    pub tool_calling_method: ToolCallingMethod,

    /// Ask the model to confirm the final answer before finishing.
    /// Default: false
    pub validate_output: bool,

    /// Local files that custom actions are allowed to touch.
    pub available_file_paths: Vec<PathBuf>,

    /// Pause between consecutive actions of one step.
    /// Default: 500 ms
    #[serde(rename = "wait_between_actions_secs", with = "duration_secs")]
    pub wait_between_actions: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            use_vision: true,
            max_actions_per_step: 10,
            max_failures: 3,
            retry_delay: Duration::from_secs(10),
            generate_gif: false,
            gif_path: None,
            enable_memory: true,
            memory_interval: 10,
            planner_interval: 1,
            use_vision_for_planner: true,
            is_planner_reasoning: false,
            extend_planner_system_message: None,
            override_system_message: None,
            extend_system_message: None,
            message_context: None,
            save_conversation_path: None,
            max_input_tokens: 128_000,
            include_attributes: default_include_attributes(),
            tool_calling_method: ToolCallingMethod::Auto,
            validate_output: false,
            available_file_paths: Vec::new(),
            wait_between_actions: Duration::from_millis(500),
        }
    }
}

pub fn default_include_attributes() -> Vec<String> {
    [
        "title",
        "type",
        "name",
        "role",
        "tabindex",
        "aria-label",
        "placeholder",
        "value",
        "alt",
        "aria-expanded",
    ]
    .iter()
    .map(|attr| attr.to_string())
    .collect()
}

impl AgentSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set max steps.
    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder: set vision mode.
    pub fn vision(mut self, enabled: bool) -> Self {
        self.use_vision = enabled;
        self
    }

    /// Builder: set max actions per step.
    pub fn actions_per_step(mut self, count: u32) -> Self {
        self.max_actions_per_step = count;
        self
    }

    pub fn failures(mut self, max_failures: u32, retry_delay: Duration) -> Self {
        self.max_failures = max_failures;
        self.retry_delay = retry_delay;
        self
    }

    /// Builder: enable or disable memory summaries with the given cadence.
    pub fn memory(mut self, enabled: bool, interval: u32) -> Self {
        self.enable_memory = enabled;
        self.memory_interval = interval;
        self
    }

    pub fn planner(mut self, interval: u32, use_vision: bool) -> Self {
        self.planner_interval = interval;
        self.use_vision_for_planner = use_vision;
        self
    }

    /// Builder: write a GIF replay, optionally to a custom path.
    pub fn gif(mut self, path: Option<PathBuf>) -> Self {
        self.generate_gif = true;
        self.gif_path = path;
        self
    }

    pub fn wait_between_actions(mut self, wait: Duration) -> Self {
        self.wait_between_actions = wait;
        self
    }

    pub fn resolved_gif_path(&self) -> PathBuf {
        self.gif_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("agent_history.gif"))
    }

    /// Reject settings the agent loop cannot honour.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::invalid_settings("max_steps must be at least 1"));
        }
        if self.max_actions_per_step == 0 {
            return Err(AgentError::invalid_settings(
                "max_actions_per_step must be at least 1",
            ));
        }
        if self.max_failures == 0 {
            return Err(AgentError::invalid_settings(
                "max_failures must be at least 1",
            ));
        }
        if self.enable_memory && self.memory_interval <= 1 {
            return Err(AgentError::invalid_settings(
                "memory_interval must be greater than 1 when memory is enabled",
            ));
        }
        if self.planner_interval == 0 {
            return Err(AgentError::invalid_settings(
                "planner_interval must be at least 1",
            ));
        }
        if self.max_input_tokens == 0 {
            return Err(AgentError::invalid_settings(
                "max_input_tokens must be positive",
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|err| {
            serde::de::Error::custom(format!("invalid duration of {secs} seconds: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AgentSettings::default();
        assert_eq!(settings.max_steps, 100);
        assert!(settings.use_vision);
        assert_eq!(settings.max_actions_per_step, 10);
        assert_eq!(settings.max_failures, 3);
        assert_eq!(settings.retry_delay, Duration::from_secs(10));
        assert!(!settings.generate_gif);
        assert!(settings.enable_memory);
        assert_eq!(settings.memory_interval, 10);
        assert_eq!(settings.planner_interval, 1);
        assert!(settings.use_vision_for_planner);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let settings = AgentSettings::new()
            .max_steps(20)
            .vision(false)
            .actions_per_step(2)
            .gif(Some(PathBuf::from("out/run.gif")));

        assert_eq!(settings.max_steps, 20);
        assert!(!settings.use_vision);
        assert_eq!(settings.max_actions_per_step, 2);
        assert_eq!(settings.resolved_gif_path(), PathBuf::from("out/run.gif"));
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        assert!(AgentSettings::new().max_steps(0).validate().is_err());
        assert!(AgentSettings::new().actions_per_step(0).validate().is_err());
        assert!(AgentSettings::new().memory(true, 1).validate().is_err());
        assert!(AgentSettings::new().memory(false, 1).validate().is_ok());
        assert!(AgentSettings::new().planner(0, true).validate().is_err());
    }

    #[test]
    fn test_yaml_uses_seconds_for_durations() {
        let yaml = "max_steps: 7\nretry_delay_secs: 2.5\nuse_vision: false\n";
        let settings: AgentSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.max_steps, 7);
        assert_eq!(settings.retry_delay, Duration::from_millis(2500));
        assert!(!settings.use_vision);
        assert_eq!(settings.memory_interval, 10);

        let rendered = serde_yaml::to_string(&settings).unwrap();
        assert!(rendered.contains("retry_delay_secs: 2.5"));

        for bad in ["1e30", "-1.0", ".nan"] {
            let yaml = format!("retry_delay_secs: {bad}\n");
            let err = serde_yaml::from_str::<AgentSettings>(&yaml).unwrap_err();
            assert!(err.to_string().contains("invalid duration"), "{bad}: {err}");
        }
    }
}
