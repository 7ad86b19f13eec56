//! Structured record of an agent run.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AgentBrain, AgentOutput};
use crate::browser::{DomElement, TabInfo};
use crate::controller::{ActionInvocation, ActionResult};
use crate::errors::AgentError;

/// Page snapshot kept with every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserStateHistory {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
    /// Element targeted by each action of the step, `None` for index-less actions.
    #[serde(default)]
    pub interacted_elements: Vec<Option<DomElement>>,
    /// Base64-encoded PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step_number: u32,
    pub step_start_time: DateTime<Utc>,
    pub step_end_time: DateTime<Utc>,
    /// Estimated tokens sent to the model for this step.
    #[serde(default)]
    pub input_tokens: usize,
}

impl StepMetadata {
    pub fn duration_seconds(&self) -> f64 {
        (self.step_end_time - self.step_start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// One step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory {
    pub model_output: Option<AgentOutput>,
    #[serde(default)]
    pub result: Vec<ActionResult>,
    pub state: BrowserStateHistory,
    pub metadata: Option<StepMetadata>,
}

/// An action together with the element it targeted when recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAction {
    pub action: ActionInvocation,
    pub interacted_element: Option<DomElement>,
}

/// Ordered record of every step of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryList {
    pub history: Vec<AgentHistory>,
}

impl AgentHistoryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: AgentHistory) {
        self.history.push(item);
    }

    pub fn last(&self) -> Option<&AgentHistory> {
        self.history.last()
    }

    fn last_result(&self) -> Option<&ActionResult> {
        self.history.last().and_then(|item| item.result.last())
    }

    /// The final step ended with `done`.
    pub fn is_done(&self) -> bool {
        self.last_result().map(|r| r.is_done).unwrap_or(false)
    }

    /// Success flag of `done`; `None` while the run is not done.
    pub fn is_successful(&self) -> Option<bool> {
        self.last_result()
            .filter(|r| r.is_done)
            .map(|r| r.success.unwrap_or(false))
    }

    pub fn final_result(&self) -> Option<String> {
        self.last_result().and_then(|r| r.extracted_content.clone())
    }

    /// First error of each step, `None` for clean steps.
    pub fn errors(&self) -> Vec<Option<String>> {
        self.history
            .iter()
            .map(|item| item.result.iter().find_map(|r| r.error.clone()))
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().iter().any(Option::is_some)
    }

    pub fn urls(&self) -> Vec<String> {
        self.history.iter().map(|item| item.state.url.clone()).collect()
    }

    pub fn screenshots(&self) -> Vec<Option<String>> {
        self.history
            .iter()
            .map(|item| item.state.screenshot.clone())
            .collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.model_actions()
            .into_iter()
            .map(|entry| entry.action.name)
            .collect()
    }

    pub fn model_thoughts(&self) -> Vec<AgentBrain> {
        self.history
            .iter()
            .filter_map(|item| item.model_output.as_ref())
            .map(|output| output.current_state.clone())
            .collect()
    }

    pub fn model_outputs(&self) -> Vec<AgentOutput> {
        self.history
            .iter()
            .filter_map(|item| item.model_output.clone())
            .collect()
    }

    pub fn model_actions(&self) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        for item in &self.history {
            let Some(output) = &item.model_output else {
                continue;
            };
            for (i, action) in output.action.iter().enumerate() {
                actions.push(ModelAction {
                    action: action.clone(),
                    interacted_element: item
                        .state
                        .interacted_elements
                        .get(i)
                        .cloned()
                        .flatten(),
                });
            }
        }
        actions
    }

    pub fn extracted_content(&self) -> Vec<String> {
        self.history
            .iter()
            .flat_map(|item| item.result.iter())
            .filter_map(|r| r.extracted_content.clone())
            .collect()
    }

    pub fn action_results(&self) -> Vec<ActionResult> {
        self.history
            .iter()
            .flat_map(|item| item.result.iter().cloned())
            .collect()
    }

    pub fn number_of_steps(&self) -> usize {
        self.history.len()
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.history
            .iter()
            .filter_map(|item| item.metadata.as_ref())
            .map(StepMetadata::duration_seconds)
            .sum()
    }

    pub fn total_input_tokens(&self) -> usize {
        self.history
            .iter()
            .filter_map(|item| item.metadata.as_ref())
            .map(|m| m.input_tokens)
            .sum()
    }

    /// Write the history as pretty JSON, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn step(
        number: u32,
        url: &str,
        actions: serde_json::Value,
        result: Vec<ActionResult>,
        tokens: usize,
    ) -> AgentHistory {
        let start = Utc::now();
        AgentHistory {
            model_output: Some(
                serde_json::from_value(json!({
                    "current_state": {"next_goal": format!("goal {number}")},
                    "action": actions
                }))
                .unwrap(),
            ),
            result,
            state: BrowserStateHistory {
                url: url.to_string(),
                interacted_elements: vec![Some(DomElement::new(1, "button")), None],
                ..BrowserStateHistory::default()
            },
            metadata: Some(StepMetadata {
                step_number: number,
                step_start_time: start,
                step_end_time: start + Duration::milliseconds(1500),
                input_tokens: tokens,
            }),
        }
    }

    fn sample() -> AgentHistoryList {
        let mut list = AgentHistoryList::new();
        list.push(step(
            1,
            "https://a.test",
            json!([{"click_element": {"index": 1}}, {"wait": {}}]),
            vec![
                ActionResult::memory("Clicked"),
                ActionResult::error("timed out"),
            ],
            100,
        ));
        list.push(step(
            2,
            "https://b.test",
            json!([{"done": {"text": "answer"}}]),
            vec![ActionResult::done("answer", true)],
            50,
        ));
        list
    }

    #[test]
    fn test_completion_queries() {
        let list = sample();
        assert!(list.is_done());
        assert_eq!(list.is_successful(), Some(true));
        assert_eq!(list.final_result().as_deref(), Some("answer"));
        assert_eq!(list.number_of_steps(), 2);
        assert!(AgentHistoryList::new().is_successful().is_none());
    }

    #[test]
    fn test_errors_are_per_step() {
        let list = sample();
        assert_eq!(list.errors(), vec![Some("timed out".to_string()), None]);
        assert!(list.has_errors());
    }

    #[test]
    fn test_action_accessors() {
        let list = sample();
        assert_eq!(list.action_names(), vec!["click_element", "wait", "done"]);
        assert_eq!(list.urls(), vec!["https://a.test", "https://b.test"]);
        assert_eq!(list.extracted_content(), vec!["Clicked", "answer"]);
        assert_eq!(list.action_results().len(), 3);

        let actions = list.model_actions();
        assert_eq!(actions[0].interacted_element.as_ref().map(|e| e.index), Some(1));
        assert!(actions[1].interacted_element.is_none());
        assert_eq!(list.model_thoughts()[1].next_goal, "goal 2");
    }

    #[test]
    fn test_totals() {
        let list = sample();
        assert_eq!(list.total_input_tokens(), 150);
        assert!((list.total_duration_seconds() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("history.json");
        let list = sample();
        list.save_to_file(&path).unwrap();

        let loaded = AgentHistoryList::load_from_file(&path).unwrap();
        assert_eq!(loaded, list);
    }
}
