//! HTTP backends.
//!
//! | Backend | Endpoint | Credential |
//! |---|---|---|
//! | [`ChatCompletionsBackend`] (`ollama`) | `POST {base}/v1/chat/completions`, probe `GET {base}/api/tags` | none |
//! | [`ChatCompletionsBackend`] (`openai`) | `POST {base}/v1/chat/completions` | bearer key from `api_key_env` |
//! | [`AnthropicBackend`] | `POST {base}/v1/messages` | `x-api-key` from `api_key_env` |
//!
//! Keys are read from the environment in `initialize()` and held in
//! [`Zeroizing`] buffers; `Debug` output never shows them.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use cortex_types::LlmResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use super::{ChatMessage, LlmBackend, LlmError, ProviderKind, Role, word_count};
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn read_key(var: &str) -> Result<Zeroizing<String>, LlmError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(Zeroizing::new(key)),
        _ => Err(LlmError::MissingCredential(var.to_string())),
    }
}

fn redacted(key: &Option<Zeroizing<String>>) -> &'static str {
    if key.is_some() { "<redacted>" } else { "<not set>" }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn parse_chat_response(response: ChatResponse) -> Result<(String, Option<u32>), LlmError> {
    let tokens = response.usage.map(|u| u.total_tokens);
    response
        .choices
        .into_iter()
        .next()
        .map(|c| (c.message.content, tokens))
        .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
}

fn parse_messages_response(response: MessagesResponse) -> Result<(String, Option<u32>), LlmError> {
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(LlmError::BadResponse("no text content block".into()));
    }
    let tokens = response.usage.map(|u| u.input_tokens.saturating_add(u.output_tokens));
    Ok((text.join("\n"), tokens))
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible chat completions
// ─────────────────────────────────────────────────────────────────────────────

/// Ollama or OpenAI through the shared `/v1/chat/completions` route.
pub struct ChatCompletionsBackend {
    kind: ProviderKind,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key_env: Option<String>,
    api_key: Option<Zeroizing<String>>,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    /// `kind` must be [`ProviderKind::Ollama`] or [`ProviderKind::OpenAi`].
    pub fn new(kind: ProviderKind, config: &LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .or_else(|| kind.default_base_url().map(str::to_string))
            .unwrap_or_default();
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key_env: config
                .api_key_env
                .clone()
                .or_else(|| kind.default_api_key_env().map(str::to_string)),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }

    async fn probe_ollama(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LlmError::Unreachable {
                endpoint: url.clone(),
                details: e.to_string(),
            })?;
        debug!(endpoint = %url, "ollama reachable");
        Ok(())
    }
}

impl fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &redacted(&self.api_key))
            .finish()
    }
}

#[async_trait]
impl LlmBackend for ChatCompletionsBackend {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&mut self) -> Result<(), LlmError> {
        match self.kind {
            ProviderKind::Ollama => self.probe_ollama().await,
            _ => {
                let var = self
                    .api_key_env
                    .clone()
                    .ok_or_else(|| LlmError::MissingCredential("api_key_env".into()))?;
                self.api_key = Some(read_key(&var)?);
                Ok(())
            }
        }
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        if self.kind != ProviderKind::Ollama && self.api_key.is_none() {
            return Err(LlmError::NotInitialized);
        }
        let started = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&self.request_body(messages));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.as_str());
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;
        let (content, tokens) = parse_chat_response(response)?;
        Ok(LlmResponse {
            tokens_used: tokens.unwrap_or_else(|| word_count(&content)),
            content,
            model: self.model.clone(),
            provider: self.kind.to_string(),
            latency: started.elapsed(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API
// ─────────────────────────────────────────────────────────────────────────────

pub struct AnthropicBackend {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key_env: String,
    api_key: Option<Zeroizing<String>>,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(config: &LlmConfig) -> Self {
        let kind = ProviderKind::Anthropic;
        let base_url = config
            .base_url
            .clone()
            .or_else(|| kind.default_base_url().map(str::to_string))
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key_env: config
                .api_key_env
                .clone()
                .or_else(|| kind.default_api_key_env().map(str::to_string))
                .unwrap_or_default(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// System messages move to the top-level `system` field.
    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages.iter().filter(|m| m.role != Role::System).collect(),
        }
    }
}

impl fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &redacted(&self.api_key))
            .finish()
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&mut self) -> Result<(), LlmError> {
        self.api_key = Some(read_key(&self.api_key_env)?);
        Ok(())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        let key = self.api_key.as_ref().ok_or(LlmError::NotInitialized)?;
        let started = Instant::now();
        let url = format!("{}/v1/messages", self.base_url);
        let response: MessagesResponse = self
            .client
            .post(&url)
            .header("x-api-key", key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(messages))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let (content, tokens) = parse_messages_response(response)?;
        Ok(LlmResponse {
            tokens_used: tokens.unwrap_or_else(|| word_count(&content)),
            content,
            model: self.model.clone(),
            provider: ProviderKind::Anthropic.to_string(),
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "test-model".into(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn chat_request_body_shape() {
        let backend = ChatCompletionsBackend::new(ProviderKind::OpenAi, &config("openai"));
        let messages = [ChatMessage::system("sys"), ChatMessage::user("hi")];
        let body = serde_json::to_value(backend.request_body(&messages)).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn chat_response_parsing() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "total_tokens": 42 }
        }))
        .unwrap();
        assert_eq!(parse_chat_response(response).unwrap(), ("hello".to_string(), Some(42)));

        let empty: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(parse_chat_response(empty), Err(LlmError::BadResponse(_))));
    }

    #[test]
    fn anthropic_moves_system_prompt_out_of_messages() {
        let backend = AnthropicBackend::new(&config("anthropic"));
        let messages = [ChatMessage::system("be a robot"), ChatMessage::user("status?")];
        let body = serde_json::to_value(backend.request_body(&messages)).unwrap();
        assert_eq!(body["system"], "be a robot");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn anthropic_response_joins_text_blocks() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "one" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "two" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        }))
        .unwrap();
        assert_eq!(parse_messages_response(response).unwrap(), ("one\ntwo".to_string(), Some(15)));
    }

    #[tokio::test]
    async fn missing_credential_fails_initialize() {
        let mut cfg = config("openai");
        cfg.api_key_env = Some("CORTEX_TEST_KEY_THAT_IS_NEVER_SET".into());
        let mut backend = ChatCompletionsBackend::new(ProviderKind::OpenAi, &cfg);
        let err = backend.initialize().await.unwrap_err();
        assert!(matches!(err, LlmError::MissingCredential(ref v) if v == "CORTEX_TEST_KEY_THAT_IS_NEVER_SET"));

        let mut anthropic = AnthropicBackend::new(&cfg);
        assert!(anthropic.initialize().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_ollama_fails_initialize() {
        let mut cfg = config("ollama");
        cfg.base_url = Some("http://127.0.0.1:1/".into());
        let mut backend = ChatCompletionsBackend::new(ProviderKind::Ollama, &cfg);
        assert!(matches!(backend.initialize().await, Err(LlmError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn uninitialized_keyed_backend_refuses_calls() {
        let backend = AnthropicBackend::new(&config("anthropic"));
        let result = backend.complete(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(LlmError::NotInitialized)));
    }

    #[test]
    fn debug_output_redacts_key() {
        let mut backend = AnthropicBackend::new(&config("anthropic"));
        backend.api_key = Some(Zeroizing::new("sk-secret".into()));
        let shown = format!("{backend:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("sk-secret"));
    }
}
