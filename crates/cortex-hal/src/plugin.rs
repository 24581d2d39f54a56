//! Input and action plugin traits plus the configuration block every plugin
//! is built from.
//!
//! Plugins are shared as `Arc<dyn InputPlugin>` / `Arc<dyn ActionPlugin>`
//! and every method takes `&self`.  That lets the input orchestrator poll
//! them concurrently and lets the emergency path reach every action plugin
//! while a dispatch is still in flight.  Implementations keep their mutable
//! state behind a `Mutex` or atomics (see [`PluginState`]).

use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::{CortexError, InputDatum, PluginStatus, RobotMode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration block
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of `agent_inputs` / `agent_actions`.
///
/// The entry's key in the configuration file becomes [`name`](Self::name);
/// [`kind`](Self::kind) defaults to that key.  Keys not listed here are kept
/// in [`options`](Self::options) for the plugin's constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bind the plugin to a private simulated session instead of the shared
    /// hardware session.
    #[serde(default)]
    pub mock_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub required_mode: Option<RobotMode>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

fn deserialize_mode<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RobotMode>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|s| RobotMode::from_str(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl PluginSpec {
    /// An enabled spec with no options; `kind` defaults to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            enabled: true,
            mock_mode: false,
            priority: None,
            timeout_ms: None,
            required_mode: None,
            options: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_mock_mode(mut self, mock_mode: bool) -> Self {
        self.mock_mode = mock_mode;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// The kind name used for registry lookup.
    pub fn kind_name(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Typed access to a plugin-specific option.
    ///
    /// # Errors
    ///
    /// [`CortexError::Config`] when the key exists but has the wrong shape.
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CortexError> {
        self.options
            .get(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| {
                    CortexError::Config(format!("plugin '{}' option '{key}': {e}", self.name))
                })
            })
            .transpose()
    }

    /// Like [`option`](Self::option) with a fallback value.
    pub fn option_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, CortexError> {
        Ok(self.option(key)?.unwrap_or(default))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

/// Bookkeeping every plugin needs for `get_status()`.
#[derive(Debug)]
pub struct PluginState {
    name: String,
    kind: &'static str,
    mock_mode: bool,
    initialized: AtomicBool,
    calls: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl PluginState {
    pub fn new(spec: &PluginSpec, kind: &'static str) -> Self {
        Self {
            name: spec.name.clone(),
            kind,
            mock_mode: spec.mock_mode,
            initialized: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Fail with [`CortexError::PluginFailure`] unless `initialize()` ran.
    pub fn require_initialized(&self) -> Result<(), CortexError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CortexError::PluginFailure {
                plugin: self.name.clone(),
                details: "plugin is not initialized".to_string(),
            })
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Count one call and remember its outcome.  Returns `result` unchanged.
    pub fn track<T>(&self, result: Result<T, CortexError>) -> Result<T, CortexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = &result {
            *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
        }
        result
    }

    /// Build a status record with plugin-specific `details`.
    pub fn status(&self, details: Value) -> PluginStatus {
        PluginStatus {
            name: self.name.clone(),
            kind: self.kind.to_string(),
            initialized: self.is_initialized(),
            mock_mode: self.mock_mode,
            last_error: self.last_error.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            details,
        }
    }

    /// Shorthand for a [`CortexError::PluginFailure`] attributed to this plugin.
    pub fn failure(&self, details: impl Into<String>) -> CortexError {
        CortexError::PluginFailure {
            plugin: self.name.clone(),
            details: details.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A polymorphic perception source polled once per tick.
#[async_trait]
pub trait InputPlugin: Send + Sync {
    /// Registered name; becomes [`InputDatum::source_name`].
    fn name(&self) -> &str;

    /// Per-plugin poll timeout overriding the orchestrator default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn initialize(&self) -> Result<(), CortexError>;

    /// Produce this tick's observation, or `Ok(None)` when there is nothing
    /// new to report.
    async fn poll(&self) -> Result<Option<InputDatum>, CortexError>;

    fn get_status(&self) -> PluginStatus;

    async fn stop(&self) -> Result<(), CortexError>;
}

/// A polymorphic actuator invoked by name from LLM directives.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
    /// Registered name; the `"action"` field of a directive.
    fn name(&self) -> &str;

    /// One-line parameter guide included in the LLM's system prompt.
    fn usage(&self) -> String;

    async fn initialize(&self) -> Result<(), CortexError>;

    /// Carry out one command.  Any `Err` is reported as a failed
    /// [`ActionResult`][cortex_types::ActionResult] by the orchestrator.
    async fn execute(&self, params: &Value) -> Result<(), CortexError>;

    /// Put the actuator into its neutral, relaxed state.
    async fn fail_safe(&self) -> Result<(), CortexError>;

    fn get_status(&self) -> PluginStatus;

    async fn stop(&self) -> Result<(), CortexError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_collects_unknown_keys_as_options() {
        let spec: PluginSpec = serde_json::from_value(json!({
            "priority": 10,
            "mock_mode": true,
            "required_mode": "Main Operation Control",
            "gestures": {"wave": 26},
        }))
        .unwrap();
        assert!(spec.enabled, "enabled defaults to true");
        assert!(spec.mock_mode);
        assert_eq!(spec.priority, Some(10.0));
        assert_eq!(spec.required_mode, Some(RobotMode::MainOperationControl));
        assert!(spec.options.contains_key("gestures"));
        assert!(!spec.options.contains_key("priority"));
    }

    #[test]
    fn kind_name_defaults_to_name() {
        let spec = PluginSpec::new("G1Speech");
        assert_eq!(spec.kind_name(), "G1Speech");
        assert_eq!(spec.with_kind("speech").kind_name(), "speech");
    }

    #[test]
    fn typed_option_access() {
        let spec = PluginSpec::new("arms")
            .with_option("max_linear", json!(0.8))
            .with_option("gestures", json!("not a map"));
        assert_eq!(spec.option::<f32>("max_linear").unwrap(), Some(0.8));
        assert_eq!(spec.option_or::<f32>("missing", 1.0).unwrap(), 1.0);
        assert!(
            spec.option::<std::collections::HashMap<String, u32>>("gestures").is_err(),
            "wrong shape must be a config error"
        );
    }

    #[test]
    fn state_tracks_calls_and_last_error() {
        let state = PluginState::new(&PluginSpec::new("cam"), "vision");
        assert!(state.require_initialized().is_err());
        state.set_initialized(true);

        let _ = state.track::<()>(Ok(()));
        let _ = state.track::<()>(Err(state.failure("lens cap on")));
        assert_eq!(state.calls(), 2);

        let status = state.status(json!({}));
        assert!(status.initialized);
        assert_eq!(status.kind, "vision");
        assert!(status.last_error.unwrap().contains("lens cap on"));
    }
}
