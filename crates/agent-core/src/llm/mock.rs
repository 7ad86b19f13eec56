use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChatMessage, CompletionOptions, LlmError, LlmProvider, LlmResponse};

enum MockReply {
    Text(String),
    RateLimited,
    Failure(String),
}

/// Deterministic provider used for tests and offline development.
///
/// Replies are served in the order they were queued; once the queue is empty
/// the fallback reply (if any) is repeated.
#[derive(Default)]
pub struct MockLlmProvider {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|reply| MockReply::Text(reply.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Reply repeated once the queue is drained.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .await
            .push_back(MockReply::Text(reply.into()));
    }

    pub async fn push_rate_limit(&self) {
        self.replies.lock().await.push_back(MockReply::RateLimited);
    }

    pub async fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .await
            .push_back(MockReply::Failure(message.into()));
    }

    /// Every conversation received so far.
    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().await.push(messages.to_vec());

        let next = self.replies.lock().await.pop_front();
        match next {
            Some(MockReply::Text(text)) => Ok(LlmResponse::text(text)),
            Some(MockReply::RateLimited) => {
                Err(LlmError::RateLimited("mock provider throttled".into()))
            }
            Some(MockReply::Failure(message)) => Err(LlmError::Transport(message)),
            None => self
                .fallback
                .clone()
                .map(LlmResponse::text)
                .ok_or(LlmError::EmptyResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_replies_in_order_then_fallback() {
        let provider = MockLlmProvider::with_replies(["first", "second"]).with_fallback("again");
        let options = CompletionOptions::default();
        let messages = [ChatMessage::user("hi")];

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(provider.complete(&messages, &options).await.unwrap().content);
        }
        assert_eq!(seen, vec!["first", "second", "again", "again"]);
        assert_eq!(provider.request_count().await, 4);
    }

    #[tokio::test]
    async fn queued_failures_surface_as_errors() {
        let provider = MockLlmProvider::new();
        provider.push_rate_limit().await;
        let err = provider
            .complete(&[], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());

        let err = provider
            .complete(&[], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
