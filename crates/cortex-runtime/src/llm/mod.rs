//! Language-model backends and the [`LlmProvider`] facade.
//!
//! - [`mock`] – [`MockBackend`]: offline backend with simulated latency and
//!   failure rate.
//! - [`http`] – [`ChatCompletionsBackend`] (Ollama / OpenAI) and
//!   [`AnthropicBackend`] over `reqwest`.
//! - [`provider`] – [`LlmProvider`]: primary/fallback selection, per-call
//!   timeout, status counters.

pub mod http;
pub mod mock;
pub mod provider;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use cortex_types::{CortexError, LlmResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{AnthropicBackend, ChatCompletionsBackend};
pub use mock::MockBackend;
pub use provider::{LlmProvider, build_messages, render_context};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures of a single backend.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The environment variable holding the API key is unset or empty.
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
    #[error("{endpoint} is unreachable: {details}")]
    Unreachable { endpoint: String, details: String },
    #[error("no reply within {0} ms")]
    Timeout(u64),
    /// Injected by the mock backend's `error_rate`.
    #[error("simulated failure")]
    Simulated,
    #[error("backend is not initialized")]
    NotInitialized,
}

impl From<LlmError> for CortexError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(ms) => CortexError::Timeout {
                component: "llm".to_string(),
                timeout_ms: ms,
            },
            other => CortexError::LlmInferenceFailed(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider and mode names
// ─────────────────────────────────────────────────────────────────────────────

/// Every supported backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Mock,
    Ollama,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::Mock => None,
            ProviderKind::Ollama => Some("http://localhost:11434"),
            ProviderKind::OpenAi => Some("https://api.openai.com"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com"),
        }
    }

    /// Environment variable consulted for the API key when `api_key_env` is unset.
    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Mock | ProviderKind::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(ProviderKind::Mock),
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(CortexError::Config(format!(
                "unsupported LLM provider '{other}' (expected mock, ollama, openai, anthropic)"
            ))),
        }
    }
}

/// How the mock backend builds its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Reply with the prompt's user message.
    Echo,
    /// Reply with `response_template`.
    #[default]
    Template,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages and the backend trait
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// One concrete language-model endpoint.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Check credentials and reachability.  A failure here makes the
    /// provider switch to its fallback.
    async fn initialize(&mut self) -> Result<(), LlmError>;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError>;
}

/// Whitespace-separated word count, used when a backend reports no usage.
pub fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}
