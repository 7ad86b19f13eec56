use std::time::Duration;

use agent_core::{
    ChatMessage, CompletionOptions, ContentPart, LlmError, LlmProvider, LlmResponse,
    MessageContent, Role, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ProviderSetupError;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Chat completions client for OpenAI and compatible endpoints.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderSetupError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: OpenAiConfig, client: Client) -> Result<Self, ProviderSetupError> {
        if config.api_keys.is_empty() {
            return Err(ProviderSetupError::MissingApiKey(config.model));
        }
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let url = self.endpoint();
        let body = ChatCompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            response_format: options.json_mode.then(|| ResponseFormat {
                r#type: "json_object",
            }),
            messages: messages.iter().map(WireMessage::from).collect(),
        };
        debug!(
            target: "openai",
            model = %self.config.model,
            messages = messages.len(),
            json_mode = options.json_mode,
            "sending chat completion"
        );

        let key_count = self.config.api_keys.len();
        let mut last_error: Option<LlmError> = None;
        for (index, key) in self.config.api_keys.iter().enumerate() {
            let response = match self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(target: "openai", %err, attempt = index + 1, "chat completion request failed");
                    last_error = Some(LlmError::Transport(err.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status.as_u16() == 429 {
                    let friendly = openai_rate_limit_message(&text);
                    if index + 1 < key_count {
                        warn!(
                            target: "openai",
                            message = %friendly,
                            raw = %text,
                            attempt = index + 1,
                            remaining = key_count - index - 1,
                            "rate limited; switching API key"
                        );
                        last_error = Some(LlmError::RateLimited(friendly));
                        continue;
                    }
                    return Err(LlmError::RateLimited(friendly));
                }
                return Err(LlmError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let response: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
            let content = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
                .and_then(ChatCompletionContent::as_text)
                .filter(|text| !text.trim().is_empty())
                .ok_or(LlmError::EmptyResponse)?;
            let usage = response.usage.map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
            return Ok(LlmResponse { content, usage });
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Transport("no API key available".to_string())))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = match &message.content {
            MessageContent::Text(text) => WireContent::Text(text.clone()),
            MessageContent::Parts(parts) => WireContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => WirePart::Text { text: text.clone() },
                        ContentPart::Image { base64_png } => WirePart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/png;base64,{base64_png}"),
                            },
                        },
                    })
                    .collect(),
            ),
        };
        Self { role, content }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<ChatCompletionContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorMessage {
    message: Option<String>,
}

fn openai_rate_limit_message(raw: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<OpenAiErrorEnvelope>(raw) {
        if let Some(message) = envelope.error.message {
            return format!(
                "rate limit exceeded: {}. Retry later or configure a higher tier.",
                message.trim()
            );
        }
    }
    "rate limit exceeded; retry later or reduce usage.".to_string()
}
