//! Conversation state sent to the model on every step.
//!
//! Messages are tagged with a [`MessageKind`] so the loop can replace the
//! per-step state message, insert plans, and fold older turns into memory.
//! A running token estimate keeps the conversation under
//! `max_input_tokens`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt;
use super::types::{AgentOutput, AgentStepInfo};
use crate::browser::BrowserState;
use crate::controller::ActionResult;
use crate::errors::AgentError;
use crate::llm::{ChatMessage, ContentPart, MessageContent, Role};

const CHARS_PER_TOKEN: usize = 3;
const IMAGE_TOKENS: usize = 800;

/// Role a message plays in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// System prompt, task and other setup that is never summarized.
    Init,
    /// Browser observation for the current step.
    State,
    /// Model decision.
    Model,
    Plan,
    /// Procedural memory summary.
    Memory,
    /// Action results and notes fed back to the model.
    Result,
}

#[derive(Debug, Clone)]
pub struct ManagedMessage {
    pub message: ChatMessage,
    pub tokens: usize,
    pub kind: MessageKind,
}

/// Knobs for [`MessageManager`].
#[derive(Debug, Clone)]
pub struct MessageManagerSettings {
    pub max_input_tokens: usize,
    pub include_attributes: Vec<String>,
    pub message_context: Option<String>,
    pub sensitive_data: HashMap<String, String>,
    pub available_file_paths: Vec<PathBuf>,
}

impl Default for MessageManagerSettings {
    fn default() -> Self {
        Self {
            max_input_tokens: 128_000,
            include_attributes: crate::settings::default_include_attributes(),
            message_context: None,
            sensitive_data: HashMap::new(),
            available_file_paths: Vec::new(),
        }
    }
}

pub struct MessageManager {
    task: String,
    settings: MessageManagerSettings,
    messages: Vec<ManagedMessage>,
    total_tokens: usize,
}

impl MessageManager {
    pub fn new(
        task: impl Into<String>,
        system_prompt: impl Into<String>,
        settings: MessageManagerSettings,
    ) -> Self {
        let mut manager = Self {
            task: task.into(),
            settings,
            messages: Vec::new(),
            total_tokens: 0,
        };
        manager.add_initial_messages(system_prompt.into());
        manager
    }

    fn add_initial_messages(&mut self, system_prompt: String) {
        self.push(ChatMessage::system(system_prompt), MessageKind::Init);

        if let Some(context) = self.settings.message_context.clone() {
            self.push(
                ChatMessage::user(format!("Context for the task: {context}")),
                MessageKind::Init,
            );
        }

        self.push(
            ChatMessage::user(prompt::format_task(&self.task)),
            MessageKind::Init,
        );

        if !self.settings.sensitive_data.is_empty() {
            let mut names: Vec<_> = self.settings.sensitive_data.keys().cloned().collect();
            names.sort();
            self.push(
                ChatMessage::user(format!(
                    "Here are placeholders for sensitive data: {names:?}\nTo use them, write <secret>the placeholder name</secret>"
                )),
                MessageKind::Init,
            );
        }

        self.push(ChatMessage::user("Example output:"), MessageKind::Init);
        self.push(
            ChatMessage::assistant(EXAMPLE_OUTPUT),
            MessageKind::Init,
        );
        self.push(
            ChatMessage::user("[Your task history memory starts here]"),
            MessageKind::Init,
        );

        if !self.settings.available_file_paths.is_empty() {
            let paths = self
                .settings
                .available_file_paths
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            self.push(
                ChatMessage::user(format!("Here are file paths you can use: {paths}")),
                MessageKind::Init,
            );
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Switch to a follow-up task while keeping the conversation.
    pub fn add_new_task(&mut self, task: impl Into<String>) {
        self.task = task.into();
        let message = ChatMessage::user(prompt::format_new_task(&self.task));
        self.push(message, MessageKind::Init);
    }

    /// Add the browser observation for this step.
    ///
    /// Results flagged `include_in_memory` become their own messages and are
    /// then left out of the state message.
    pub fn add_state_message(
        &mut self,
        state: &BrowserState,
        results: &[ActionResult],
        step_info: Option<&AgentStepInfo>,
        use_vision: bool,
    ) {
        let mut inline_results = results;
        for result in results {
            if !result.include_in_memory {
                continue;
            }
            if let Some(content) = &result.extracted_content {
                self.push(
                    ChatMessage::user(format!("Action result: {content}")),
                    MessageKind::Result,
                );
            }
            if let Some(error) = &result.error {
                let tail: String = {
                    let count = error.chars().count();
                    error.chars().skip(count.saturating_sub(300)).collect()
                };
                self.push(
                    ChatMessage::user(format!("Action error: {tail}")),
                    MessageKind::Result,
                );
            }
            inline_results = &[];
        }

        let text = prompt::format_state_message(
            state,
            inline_results,
            step_info,
            &self.settings.include_attributes,
        );
        let message = match (&state.screenshot, use_vision) {
            (Some(screenshot), true) => ChatMessage::user_with_image(text, screenshot.clone()),
            _ => ChatMessage::user(text),
        };
        self.push(message, MessageKind::State);
    }

    pub fn add_model_output(&mut self, output: &AgentOutput) -> Result<(), AgentError> {
        let rendered = serde_json::to_string(output)?;
        self.push(ChatMessage::assistant(rendered), MessageKind::Model);
        Ok(())
    }

    /// Insert a plan just before the current state message.
    pub fn add_plan(&mut self, plan: &str) {
        let managed = self.managed(ChatMessage::assistant(plan), MessageKind::Plan);
        let position = match self.messages.last() {
            Some(last) if last.kind == MessageKind::State => self.messages.len() - 1,
            _ => self.messages.len(),
        };
        self.total_tokens += managed.tokens;
        self.messages.insert(position, managed);
    }

    /// Free-form user note, e.g. validation feedback.
    pub fn add_user_note(&mut self, note: impl Into<String>) {
        self.push(ChatMessage::user(note.into()), MessageKind::Result);
    }

    /// Drop the state message if it is the latest message.
    pub fn remove_last_state_message(&mut self) {
        if matches!(self.messages.last(), Some(last) if last.kind == MessageKind::State) {
            if let Some(removed) = self.messages.pop() {
                self.total_tokens -= removed.tokens;
            }
        }
    }

    pub fn messages(&self) -> &[ManagedMessage] {
        &self.messages
    }

    /// Conversation in model order.
    pub fn get_messages(&self) -> Vec<ChatMessage> {
        debug!(
            messages = self.messages.len(),
            tokens = self.total_tokens,
            "assembled model input"
        );
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Keep the conversation within `max_input_tokens`.
    ///
    /// The latest message is shrunk first by dropping its images and then by
    /// truncating its text proportionally to the overshoot.
    pub fn cut_messages(&mut self) -> Result<(), AgentError> {
        let limit = self.settings.max_input_tokens;
        if self.total_tokens <= limit {
            return Ok(());
        }

        let Some(last) = self.messages.pop() else {
            return Err(AgentError::TokenBudget {
                tokens: self.total_tokens,
                limit,
            });
        };
        self.total_tokens -= last.tokens;
        let mut last = last;

        if last.message.content.image_count() > 0 {
            last.message = last.message.without_images();
            last.tokens = self.count_tokens(&last.message);
            debug!("dropped screenshot to fit the token budget");
            if self.total_tokens + last.tokens <= limit {
                self.total_tokens += last.tokens;
                self.messages.push(last);
                return Ok(());
            }
        }

        let overshoot = (self.total_tokens + last.tokens).saturating_sub(limit);
        let proportion = overshoot as f64 / last.tokens.max(1) as f64;
        if proportion > 0.99 {
            let tokens = self.total_tokens + last.tokens;
            self.total_tokens += last.tokens;
            self.messages.push(last);
            return Err(AgentError::TokenBudget { tokens, limit });
        }

        let text = last.message.text();
        let char_count = text.chars().count();
        let remove = ((proportion * char_count as f64).ceil() as usize).min(char_count);
        let kept: String = text.chars().take(char_count - remove).collect();
        debug!(removed_chars = remove, "truncated latest message to fit the token budget");

        last.message = ChatMessage {
            role: last.message.role,
            content: MessageContent::Text(kept),
        };
        last.tokens = self.count_tokens(&last.message);
        self.total_tokens += last.tokens;
        self.messages.push(last);

        if self.total_tokens > limit {
            return Err(AgentError::TokenBudget {
                tokens: self.total_tokens,
                limit,
            });
        }
        Ok(())
    }

    /// Indices of messages eligible for a memory summary.
    pub(crate) fn memory_candidates(&self) -> Vec<usize> {
        let first_non_init = self
            .messages
            .iter()
            .position(|m| m.kind != MessageKind::Init)
            .unwrap_or(self.messages.len());
        (first_non_init..self.messages.len())
            .filter(|&i| !matches!(self.messages[i].kind, MessageKind::Init | MessageKind::Memory))
            .collect()
    }

    /// Replace the given messages with a single memory message placed where
    /// the first of them was.
    pub(crate) fn replace_with_memory(&mut self, indices: &[usize], summary: &str) {
        let Some(&first) = indices.first() else {
            return;
        };
        let memory = self.managed(
            ChatMessage::user(format!("Memory of previous steps:\n{summary}")),
            MessageKind::Memory,
        );

        let mut kept = Vec::with_capacity(self.messages.len());
        for (i, message) in self.messages.drain(..).enumerate() {
            if i == first {
                kept.push(memory.clone());
            }
            if !indices.contains(&i) {
                kept.push(message);
            }
        }
        self.messages = kept;
        self.total_tokens = self.messages.iter().map(|m| m.tokens).sum();
    }

    /// Plain-text dump of the conversation.
    pub fn conversation_text(&self) -> String {
        let mut out = String::new();
        for managed in &self.messages {
            let role = match managed.message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str(&format!(" {role} \n"));
            out.push_str(&managed.message.text());
            if managed.message.content.image_count() > 0 {
                out.push_str("\n[image]");
            }
            out.push_str("\n\n");
        }
        out
    }

    fn push(&mut self, message: ChatMessage, kind: MessageKind) {
        let managed = self.managed(message, kind);
        self.total_tokens += managed.tokens;
        self.messages.push(managed);
    }

    fn managed(&self, message: ChatMessage, kind: MessageKind) -> ManagedMessage {
        let message = self.filter_sensitive(message);
        let tokens = self.count_tokens(&message);
        ManagedMessage {
            message,
            tokens,
            kind,
        }
    }

    fn count_tokens(&self, message: &ChatMessage) -> usize {
        match &message.content {
            MessageContent::Text(text) => text.chars().count() / CHARS_PER_TOKEN,
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.chars().count() / CHARS_PER_TOKEN,
                    ContentPart::Image { .. } => IMAGE_TOKENS,
                })
                .sum(),
        }
    }

    fn filter_sensitive(&self, message: ChatMessage) -> ChatMessage {
        if self.settings.sensitive_data.is_empty() {
            return message;
        }
        let scrub = |text: &str| {
            let mut scrubbed = text.to_string();
            for (name, value) in &self.settings.sensitive_data {
                if !value.is_empty() {
                    scrubbed = scrubbed.replace(value, &format!("<secret>{name}</secret>"));
                }
            }
            scrubbed
        };
        let content = match message.content {
            MessageContent::Text(text) => MessageContent::Text(scrub(&text)),
            MessageContent::Parts(parts) => MessageContent::Parts(
                parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ContentPart::Text { text: scrub(&text) },
                        image => image,
                    })
                    .collect(),
            ),
        };
        ChatMessage {
            role: message.role,
            content,
        }
    }
}

const EXAMPLE_OUTPUT: &str = r#"{"current_state": {"evaluation_previous_goal": "Success - I opened the first page", "memory": "Starting with the new task. I have completed 1/10 steps", "next_goal": "Click on company a"}, "action": [{"click_element": {"index": 0}}]}"#;
