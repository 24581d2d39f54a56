//! [`LlmProvider`] – one logical model made of a primary backend and an
//! optional fallback.
//!
//! Selection happens in [`initialize`](LlmProvider::initialize):
//!
//! | Primary init | Fallback init | Result |
//! |---|---|---|
//! | ok | ok | primary active, fallback on standby |
//! | ok | failed / none | primary active, no retry |
//! | failed | ok | fallback substituted (`warn!`) |
//! | failed | failed / none | `Err(Initialization)` |
//!
//! A failed call on the primary is retried once on a standby fallback.
//!
//! # Example
//!
//! ```rust
//! use cortex_runtime::llm::{LlmProvider, MockBackend, ResponseMode};
//! use cortex_types::FusedContext;
//! use std::time::Duration;
//!
//! # tokio_test_block(async {
//! let mut provider = LlmProvider::new(
//!     Box::new(MockBackend::new(ResponseMode::Template).with_template("hi")),
//!     None,
//!     Duration::from_secs(1),
//! );
//! provider.initialize().await.unwrap();
//! let reply = provider.process(&FusedContext::default(), "be brief").await.unwrap();
//! assert_eq!(reply.content, "hi");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cortex_types::{CortexError, FusedContext, LlmResponse, LlmStatus};
use tracing::{debug, info, warn};

use super::http::{AnthropicBackend, ChatCompletionsBackend};
use super::mock::MockBackend;
use super::{ChatMessage, LlmBackend, LlmError, ProviderKind};
use crate::config::LlmConfig;

fn backend_for(kind: ProviderKind, config: &LlmConfig) -> Box<dyn LlmBackend> {
    match kind {
        ProviderKind::Mock => Box::new(MockBackend::from_config(config)),
        ProviderKind::Ollama | ProviderKind::OpenAi => Box::new(ChatCompletionsBackend::new(kind, config)),
        ProviderKind::Anthropic => Box::new(AnthropicBackend::new(config)),
    }
}

/// Render a fused context as the user message of a prompt.
pub fn render_context(context: &FusedContext) -> String {
    if context.is_empty() {
        return "No sensor data this tick.".to_string();
    }
    let mut out = format!(
        "Sensor context ({} sources, confidence {:.2}), highest priority first:\n",
        context.ordered_data.len(),
        context.confidence
    );
    for datum in &context.ordered_data {
        let _ = writeln!(out, "- {}: {}", datum.source_name, datum.payload);
    }
    out
}

/// System prompt followed by the rendered context.
pub fn build_messages(context: &FusedContext, system_prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system_prompt), ChatMessage::user(render_context(context))]
}

pub struct LlmProvider {
    primary: Box<dyn LlmBackend>,
    fallback: Option<Box<dyn LlmBackend>>,
    timeout: Duration,
    primary_ready: bool,
    fallback_ready: bool,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl LlmProvider {
    pub fn new(primary: Box<dyn LlmBackend>, fallback: Option<Box<dyn LlmBackend>>, timeout: Duration) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            primary_ready: false,
            fallback_ready: false,
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Build the backends named by `config`.  Nothing is contacted yet.
    pub fn from_config(config: &LlmConfig) -> Result<Self, CortexError> {
        let primary = ProviderKind::from_str(&config.provider)?;
        let fallback = config
            .fallback_provider
            .as_deref()
            .map(ProviderKind::from_str)
            .transpose()?;
        Ok(Self::new(
            backend_for(primary, config),
            fallback.map(|kind| backend_for(kind, config)),
            config.timeout(),
        ))
    }

    /// Initialize the primary and, when configured, the fallback.
    ///
    /// # Errors
    ///
    /// [`CortexError::Initialization`] when neither backend is usable.
    pub async fn initialize(&mut self) -> Result<(), CortexError> {
        let primary_kind = self.primary.kind();
        match self.primary.initialize().await {
            Ok(()) => {
                self.primary_ready = true;
                info!(provider = %primary_kind, model = self.primary.model(), "LLM provider ready");
                if let Some(fallback) = self.fallback.as_mut() {
                    match fallback.initialize().await {
                        Ok(()) => {
                            self.fallback_ready = true;
                            debug!(fallback = %fallback.kind(), "fallback LLM provider on standby");
                        }
                        Err(e) => warn!(fallback = %fallback.kind(), error = %e, "fallback LLM provider unavailable"),
                    }
                }
                Ok(())
            }
            Err(primary_err) => {
                let Some(fallback) = self.fallback.as_mut() else {
                    return Err(CortexError::Initialization {
                        component: format!("llm:{primary_kind}"),
                        details: primary_err.to_string(),
                    });
                };
                fallback.initialize().await.map_err(|e| CortexError::Initialization {
                    component: format!("llm:{primary_kind}"),
                    details: format!("primary failed ({primary_err}); fallback {} failed ({e})", fallback.kind()),
                })?;
                self.fallback_ready = true;
                warn!(
                    primary = %primary_kind,
                    fallback = %fallback.kind(),
                    error = %primary_err,
                    "primary LLM provider unavailable, substituting fallback"
                );
                Ok(())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.primary_ready || self.fallback_ready
    }

    /// `true` when the fallback replaced the primary at initialization.
    pub fn using_fallback(&self) -> bool {
        !self.primary_ready && self.fallback_ready
    }

    fn active(&self) -> Option<&dyn LlmBackend> {
        if self.primary_ready {
            Some(self.primary.as_ref())
        } else if self.fallback_ready {
            self.fallback.as_deref()
        } else {
            None
        }
    }

    fn standby(&self) -> Option<&dyn LlmBackend> {
        if self.primary_ready && self.fallback_ready {
            self.fallback.as_deref()
        } else {
            None
        }
    }

    async fn call(&self, backend: &dyn LlmBackend, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tokio::time::timeout(self.timeout, backend.complete(messages))
            .await
            .map_err(|_| LlmError::Timeout(timeout_ms))?
    }

    /// Prompt the model with `system_prompt` and the rendered context.
    ///
    /// # Errors
    ///
    /// [`CortexError::LlmInferenceFailed`] or [`CortexError::Timeout`] when
    /// the active backend (and the standby, if any) fail.
    pub async fn process(&self, context: &FusedContext, system_prompt: &str) -> Result<LlmResponse, CortexError> {
        let active = self
            .active()
            .ok_or_else(|| CortexError::LlmInferenceFailed(LlmError::NotInitialized.to_string()))?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        let messages = build_messages(context, system_prompt);

        let first = match self.call(active, &messages).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        let Some(standby) = self.standby() else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(first.into());
        };
        warn!(
            primary = %active.kind(),
            fallback = %standby.kind(),
            error = %first,
            "LLM call failed, retrying on fallback"
        );
        self.call(standby, &messages).await.map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            e.into()
        })
    }

    pub fn get_status(&self) -> LlmStatus {
        let active = self.active().unwrap_or(self.primary.as_ref());
        LlmStatus {
            active_provider: active.kind().to_string(),
            model: active.model().to_string(),
            primary_provider: self.primary.kind().to_string(),
            fallback_provider: self.fallback.as_ref().map(|f| f.kind().to_string()),
            using_fallback: self.using_fallback(),
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Mark both backends unusable.  Idempotent.
    pub fn stop(&mut self) {
        if self.is_ready() {
            debug!(provider = %self.primary.kind(), "LLM provider stopped");
        }
        self.primary_ready = false;
        self.fallback_ready = false;
    }
}
