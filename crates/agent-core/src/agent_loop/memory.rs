//! Procedural memory: fold older conversation turns into a summary.

use std::sync::Arc;

use tracing::{info, warn};

use super::message_manager::MessageManager;
use super::prompt;
use crate::errors::AgentError;
use crate::llm::{ChatMessage, CompletionOptions, LlmProvider, Role};

/// Minimum number of eligible messages worth summarizing.
const MIN_MESSAGES: usize = 2;

pub struct ProceduralMemory {
    llm: Arc<dyn LlmProvider>,
    interval: u32,
}

impl ProceduralMemory {
    pub fn new(llm: Arc<dyn LlmProvider>, interval: u32) -> Self {
        Self {
            llm,
            interval: interval.max(1),
        }
    }

    pub fn is_due(&self, n_steps: u32) -> bool {
        n_steps % self.interval == 0
    }

    /// Summarize and replace the eligible messages.
    ///
    /// Returns `false` when there was too little history to summarize.
    pub async fn summarize(&self, manager: &mut MessageManager) -> Result<bool, AgentError> {
        let candidates = manager.memory_candidates();
        if candidates.len() < MIN_MESSAGES {
            return Ok(false);
        }

        let transcript = candidates
            .iter()
            .map(|&i| {
                let message = &manager.messages()[i].message;
                let speaker = match message.role {
                    Role::Assistant => "agent",
                    Role::User | Role::System => "environment",
                };
                format!("{speaker}: {}", message.text())
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = [
            ChatMessage::system(prompt::MEMORY_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Task: {}\n\nConversation to summarize:\n{transcript}",
                manager.task()
            )),
        ];
        let response = self
            .llm
            .complete(&request, &CompletionOptions::default())
            .await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(AgentError::model_output("memory summary is empty"));
        }

        let before = manager.total_tokens();
        manager.replace_with_memory(&candidates, summary);
        info!(
            summarized = candidates.len(),
            tokens_before = before,
            tokens_after = manager.total_tokens(),
            "created procedural memory"
        );
        Ok(true)
    }

    /// Like [`summarize`](Self::summarize) but only logs failures.
    pub async fn summarize_logged(&self, manager: &mut MessageManager) {
        if let Err(err) = self.summarize(manager).await {
            warn!(error = %err, "procedural memory creation failed");
        }
    }
}
