//! Model output and step bookkeeping types for the agent loop.

use serde::{Deserialize, Serialize};

use crate::controller::ActionInvocation;
use crate::errors::AgentError;
use crate::llm::extract_json_object;

/// The model's reading of the situation before acting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBrain {
    /// Whether the previous step achieved its goal.
    #[serde(default)]
    pub evaluation_previous_goal: String,

    /// Facts to carry forward to later steps.
    #[serde(default)]
    pub memory: String,

    /// Immediate objective of this step.
    #[serde(default)]
    pub next_goal: String,
}

/// LLM output for a single agent step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    #[serde(default)]
    pub current_state: AgentBrain,

    /// Actions to execute in order.
    #[serde(default)]
    pub action: Vec<ActionInvocation>,
}

impl AgentOutput {
    /// Parse a raw model reply, tolerating fences and surrounding prose.
    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        let json = extract_json_object(raw)
            .ok_or_else(|| AgentError::model_output("no JSON object in model reply"))?;
        let output: AgentOutput = serde_json::from_str(&json)
            .map_err(|err| AgentError::model_output(format!("{err}: {json}")))?;
        if output.action.is_empty() {
            return Err(AgentError::model_output("model reply contains no actions"));
        }
        Ok(output)
    }

    /// Keep at most `max_actions` actions.
    pub fn truncate(&mut self, max_actions: usize) {
        self.action.truncate(max_actions);
    }

    /// Check if output contains a done action.
    pub fn is_done(&self) -> bool {
        self.action.iter().any(|action| action.name == "done")
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.action.iter().map(|action| action.name.as_str()).collect()
    }
}

/// Position of the current step within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentStepInfo {
    /// 1-based step number.
    pub step_number: u32,
    pub max_steps: u32,
}

impl AgentStepInfo {
    pub fn new(step_number: u32, max_steps: u32) -> Self {
        Self {
            step_number,
            max_steps,
        }
    }

    pub fn is_last_step(&self) -> bool {
        self.step_number >= self.max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_output() {
        let raw = r#"Sure.
```json
{
  "current_state": {
    "evaluation_previous_goal": "Success",
    "memory": "On the search page",
    "next_goal": "Type the query"
  },
  "action": [
    {"input_text": {"index": 2, "text": "rust"}},
    {"click_element": {"index": 3}}
  ]
}
```"#;
        let output = AgentOutput::parse(raw).unwrap();
        assert_eq!(output.current_state.next_goal, "Type the query");
        assert_eq!(output.action_names(), vec!["input_text", "click_element"]);
        assert!(!output.is_done());
    }

    #[test]
    fn test_parse_rejects_empty_action_list() {
        let err = AgentOutput::parse(r#"{"current_state": {}, "action": []}"#).unwrap_err();
        assert!(matches!(err, AgentError::ModelOutput(_)));
        assert!(AgentOutput::parse("I am not sure").is_err());
    }

    #[test]
    fn test_truncate_and_done() {
        let mut output = AgentOutput::parse(
            r#"{"action": [{"go_back": {}}, {"wait": {}}, {"done": {"text": "ok"}}]}"#,
        )
        .unwrap();
        assert!(output.is_done());
        output.truncate(2);
        assert_eq!(output.action.len(), 2);
        assert!(!output.is_done());
    }

    #[test]
    fn test_last_step() {
        assert!(!AgentStepInfo::new(1, 3).is_last_step());
        assert!(AgentStepInfo::new(3, 3).is_last_step());
    }
}
