//! Periodic high-level planning with a secondary model.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::prompt;
use crate::errors::AgentError;
use crate::llm::{extract_json_object, ChatMessage, CompletionOptions, LlmProvider, Role};
use crate::settings::AgentSettings;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"));

pub struct Planner {
    llm: Arc<dyn LlmProvider>,
    interval: u32,
    use_vision: bool,
    is_reasoning: bool,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: &AgentSettings) -> Self {
        Self {
            llm,
            interval: settings.planner_interval.max(1),
            use_vision: settings.use_vision_for_planner,
            is_reasoning: settings.is_planner_reasoning,
            system_prompt: prompt::format_planner_prompt(
                settings.extend_planner_system_message.as_deref(),
            ),
        }
    }

    /// Whether the planner runs on step `n_steps` (1-based).
    pub fn is_due(&self, n_steps: u32) -> bool {
        n_steps % self.interval == 0
    }

    /// Ask the planner model for the next high-level steps.
    ///
    /// `conversation` is the agent's input; its system prompt is swapped
    /// for the planner prompt.
    pub async fn plan(&self, conversation: &[ChatMessage]) -> Result<String, AgentError> {
        let mut messages = vec![ChatMessage::system(self.system_prompt.clone())];
        messages.extend(
            conversation
                .iter()
                .filter(|message| message.role != Role::System)
                .map(|message| {
                    if self.use_vision {
                        message.clone()
                    } else {
                        message.without_images()
                    }
                }),
        );

        let response = self
            .llm
            .complete(&messages, &CompletionOptions::default())
            .await?;
        let plan = self.clean(&response.content);
        info!(model = self.llm.model_name(), "planner produced a plan");
        debug!(plan = %plan, "planner output");
        Ok(plan)
    }

    fn clean(&self, raw: &str) -> String {
        let text = if self.is_reasoning {
            THINK_BLOCK.replace_all(raw, "").trim().to_string()
        } else {
            raw.trim().to_string()
        };
        extract_json_object(&text)
            .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmProvider;

    fn planner(mock: Arc<MockLlmProvider>, settings: AgentSettings) -> Planner {
        Planner::new(mock, &settings)
    }

    #[test]
    fn due_on_interval_multiples() {
        let mock = Arc::new(MockLlmProvider::new());
        let planner = planner(mock, AgentSettings::new().planner(3, true));
        assert!(!planner.is_due(1));
        assert!(planner.is_due(3));
        assert!(planner.is_due(6));
    }

    #[tokio::test]
    async fn strips_reasoning_and_pretty_prints() {
        let mock = Arc::new(MockLlmProvider::with_replies([
            "<think>hmm\nlong thought</think>{\"next_steps\":\"search\"}",
        ]));
        let mut settings = AgentSettings::new();
        settings.is_planner_reasoning = true;
        let planner = planner(mock, settings);

        let plan = planner.plan(&[ChatMessage::user("state")]).await.unwrap();
        assert!(!plan.contains("think"));
        assert_eq!(plan, "{\n  \"next_steps\": \"search\"\n}");
    }

    #[tokio::test]
    async fn replaces_system_prompt_and_strips_images() {
        let mock = Arc::new(MockLlmProvider::with_replies(["plain text plan"]));
        let planner = planner(mock.clone(), AgentSettings::new().planner(1, false));

        let conversation = vec![
            ChatMessage::system("agent prompt"),
            ChatMessage::user_with_image("state", "aGk="),
        ];
        let plan = planner.plan(&conversation).await.unwrap();
        assert_eq!(plan, "plain text plan");

        let sent = &mock.requests().await[0];
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text().contains("planning agent"));
        assert_eq!(sent[1].content.image_count(), 0);
    }
}
