//! [`MockBackend`] – answers without any network access.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cortex_types::LlmResponse;
use tracing::trace;

use super::{ChatMessage, LlmBackend, LlmError, ProviderKind, ResponseMode, Role, word_count};
use crate::config::LlmConfig;

/// Offline backend.
///
/// Each call waits `latency`, then fails with probability `error_rate`, then
/// replies with either the prompt's user message ([`ResponseMode::Echo`]) or a
/// fixed template.  `tokens_used` is the reply's word count.
#[derive(Debug, Clone)]
pub struct MockBackend {
    model: String,
    latency: Duration,
    error_rate: f64,
    mode: ResponseMode,
    template: String,
}

impl MockBackend {
    pub fn new(mode: ResponseMode) -> Self {
        Self {
            model: "mock".to_string(),
            latency: Duration::ZERO,
            error_rate: 0.0,
            mode,
            template: String::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            latency: Duration::from_millis(config.mock_latency_ms),
            error_rate: config.error_rate.clamp(0.0, 1.0),
            mode: config.response_mode,
            template: config.response_template.clone(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    fn reply(&self, messages: &[ChatMessage]) -> String {
        match self.mode {
            ResponseMode::Template => self.template.clone(),
            ResponseMode::Echo => messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&mut self) -> Result<(), LlmError> {
        Ok(())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        // `random::<f64>()` is in [0, 1): a rate of 1.0 always fails, 0.0 never does.
        if self.error_rate > 0.0 && rand::random::<f64>() < self.error_rate {
            trace!(error_rate = self.error_rate, "mock backend injecting failure");
            return Err(LlmError::Simulated);
        }
        let content = self.reply(messages);
        Ok(LlmResponse {
            tokens_used: word_count(&content),
            content,
            model: self.model.clone(),
            provider: ProviderKind::Mock.to_string(),
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> Vec<ChatMessage> {
        vec![ChatMessage::system("be brief"), ChatMessage::user("temp is 20 degrees")]
    }

    #[tokio::test]
    async fn echo_returns_user_message_and_word_count() {
        let backend = MockBackend::new(ResponseMode::Echo);
        let reply = backend.complete(&prompt()).await.unwrap();
        assert_eq!(reply.content, "temp is 20 degrees");
        assert_eq!(reply.tokens_used, 4);
        assert_eq!(reply.provider, "mock");
    }

    #[tokio::test]
    async fn template_mode_ignores_prompt() {
        let backend = MockBackend::new(ResponseMode::Template).with_template("Hello there");
        let reply = backend.complete(&prompt()).await.unwrap();
        assert_eq!(reply.content, "Hello there");
        assert_eq!(reply.tokens_used, 2);
    }

    #[tokio::test]
    async fn full_error_rate_always_fails() {
        let backend = MockBackend::new(ResponseMode::Echo).with_error_rate(1.0);
        for _ in 0..20 {
            assert!(matches!(backend.complete(&prompt()).await, Err(LlmError::Simulated)));
        }
    }

    #[tokio::test]
    async fn zero_error_rate_never_fails() {
        let backend = MockBackend::new(ResponseMode::Echo).with_error_rate(0.0);
        for _ in 0..20 {
            assert!(backend.complete(&prompt()).await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_simulated() {
        let backend = MockBackend::new(ResponseMode::Echo).with_latency(Duration::from_millis(300));
        let started = tokio::time::Instant::now();
        backend.complete(&prompt()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn config_values_are_applied() {
        let config = LlmConfig {
            error_rate: 3.0,
            mock_latency_ms: 40,
            ..LlmConfig::default()
        };
        let backend = MockBackend::from_config(&config);
        assert_eq!(backend.error_rate, 1.0, "rate is clamped");
        assert_eq!(backend.latency, Duration::from_millis(40));
        assert_eq!(backend.model(), config.model);
    }
}
