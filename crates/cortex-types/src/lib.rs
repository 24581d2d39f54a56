//! `cortex-types` – shared data model for the G1 cortex runtime.
//!
//! Every type in here is transient: produced during one tick of the fusion
//! loop and dropped at the end of it.  The only long-lived values are the
//! [`RuntimeMetrics`] counters owned by the runtime itself.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Perception
// ────────────────────────────────────────────────────────────────────────────

/// One observation produced by one input plugin during a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDatum {
    /// Name under which the producing plugin is registered.
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
    /// Source-specific structured value.
    pub payload: Value,
    /// Static priority from configuration.  `None` falls back to the fuser's
    /// baseline priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_hint: Option<f64>,
}

impl InputDatum {
    /// Create a datum stamped with the current time and no priority hint.
    pub fn new(source_name: impl Into<String>, payload: Value) -> Self {
        Self {
            source_name: source_name.into(),
            timestamp: Utc::now(),
            payload,
            priority_hint: None,
        }
    }

    /// Attach a priority hint (builder-style).
    pub fn with_priority(mut self, priority: Option<f64>) -> Self {
        self.priority_hint = priority;
        self
    }
}

/// The single ranked context handed to the LLM each tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedContext {
    /// Descending priority, ties in registration order, one entry per source.
    pub ordered_data: Vec<InputDatum>,
    /// Fraction of registered sources that reported this tick, in `[0, 1]`.
    pub confidence: f64,
    pub fusion_timestamp: DateTime<Utc>,
}

impl FusedContext {
    pub fn is_empty(&self) -> bool {
        self.ordered_data.is_empty()
    }

    /// Source names in fused order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.ordered_data.iter().map(|d| d.source_name.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cognition
// ────────────────────────────────────────────────────────────────────────────

/// Result of one LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Free text, possibly carrying embedded action directives.
    pub content: String,
    pub model: String,
    /// Identity of the backend that actually answered (`"mock"`, `"ollama"` …).
    pub provider: String,
    pub tokens_used: u32,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Actuation
// ────────────────────────────────────────────────────────────────────────────

/// A directive naming a registered action plugin and its parameters.
///
/// This is also the JSON shape the LLM is asked to embed in its replies:
///
/// ```json
/// {"action": "speech", "params": {"text": "Hello!"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionCommand {
    /// Registered name of the target action plugin.
    #[serde(rename = "action")]
    pub action_name: String,
    /// Plugin-specific parameters.
    #[serde(default)]
    pub params: Value,
}

impl ActionCommand {
    pub fn new(action_name: impl Into<String>, params: Value) -> Self {
        Self {
            action_name: action_name.into(),
            params,
        }
    }
}

/// Outcome of dispatching one [`ActionCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    pub fn succeeded(action_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            action_name: action_name.into(),
            success: true,
            error: None,
            duration,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(action_name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            action_name: action_name.into(),
            success: false,
            error: Some(error.into()),
            duration,
            timestamp: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot FSM modes
// ────────────────────────────────────────────────────────────────────────────

/// Physical operating mode of the robot, as reported by the motion switcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    /// Motors unpowered; the robot is limp.
    ZeroTorque,
    /// Joints damped.  The universal safe state.
    Damping,
    /// Standing and holding posture.
    Ready,
    /// Balance controller active; gestures and locomotion accepted.
    MainOperationControl,
}

impl RobotMode {
    /// Position on the start-up ladder `ZeroTorque → Damping → Ready → MainOperationControl`.
    pub fn rank(self) -> u8 {
        match self {
            RobotMode::ZeroTorque => 0,
            RobotMode::Damping => 1,
            RobotMode::Ready => 2,
            RobotMode::MainOperationControl => 3,
        }
    }

    pub const LADDER: [RobotMode; 4] = [
        RobotMode::ZeroTorque,
        RobotMode::Damping,
        RobotMode::Ready,
        RobotMode::MainOperationControl,
    ];
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RobotMode::ZeroTorque => "zero_torque",
            RobotMode::Damping => "damping",
            RobotMode::Ready => "ready",
            RobotMode::MainOperationControl => "main_operation_control",
        };
        f.write_str(s)
    }
}

impl FromStr for RobotMode {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "zero_torque" | "zerotorque" => Ok(RobotMode::ZeroTorque),
            "damping" => Ok(RobotMode::Damping),
            "ready" => Ok(RobotMode::Ready),
            "main_operation_control" | "mainoperationcontrol" | "main" => {
                Ok(RobotMode::MainOperationControl)
            }
            other => Err(CortexError::Config(format!("unknown robot mode '{other}'"))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status & metrics
// ────────────────────────────────────────────────────────────────────────────

/// Status reported by a plugin's `get_status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub name: String,
    pub kind: String,
    pub initialized: bool,
    pub mock_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Plugin-specific extras (call counters, last reading …).
    #[serde(default)]
    pub details: Value,
}

/// Status of the LLM provider facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmStatus {
    /// Identity of the backend currently answering requests.
    pub active_provider: String,
    pub model: String,
    pub primary_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
    /// `true` when the fallback was substituted at initialization.
    pub using_fallback: bool,
    pub requests: u64,
    pub failures: u64,
}

/// Process-wide loop counters owned by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// Ticks executed since the last `start()`.
    pub loop_count: u64,
    /// Ticks executed since the process started.
    pub total_loops: u64,
    /// Exponential moving average of tick duration.
    #[serde(with = "duration_ms")]
    pub avg_loop_time: Duration,
    /// Recoverable failures observed across all ticks.
    pub errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl RuntimeMetrics {
    /// Smoothing factor of the loop-time moving average.
    pub const AVG_ALPHA: f64 = 0.1;

    /// Account for one finished tick that took `elapsed` and observed
    /// `failures` recoverable errors.
    pub fn record_tick(&mut self, elapsed: Duration, failures: &[String]) {
        self.loop_count += 1;
        self.total_loops += 1;
        self.avg_loop_time = if self.total_loops == 1 {
            elapsed
        } else {
            let avg = self.avg_loop_time.as_secs_f64();
            Duration::from_secs_f64(
                Self::AVG_ALPHA * elapsed.as_secs_f64() + (1.0 - Self::AVG_ALPHA) * avg,
            )
        };
        self.errors += failures.len() as u64;
        if let Some(last) = failures.last() {
            self.last_error = Some(last.clone());
        }
        self.last_tick_at = Some(Utc::now());
    }
}

/// Snapshot of the whole runtime, served by `status` and the debug interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub name: String,
    pub running: bool,
    pub hertz: f64,
    pub metrics: RuntimeMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_mode: Option<RobotMode>,
    pub inputs: Vec<PluginStatus>,
    pub actions: Vec<PluginStatus>,
    /// Most recent command results, oldest first.
    pub history: Vec<ActionResult>,
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., `"cortex-runtime::cortex"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Published by the runtime at the end of every tick.
    Status(Box<RuntimeStatus>),
    /// One dispatched action finished.
    ActionCompleted(ActionResult),
    /// Raw LLM output of the last tick.
    AgentThought(String),
    /// Operator-issued command to be dispatched on the next tick.
    ManualCommand(ActionCommand),
    /// Operator-issued emergency stop.
    EmergencyStop { reason: String },
    Fault { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning configuration, plugin, hardware and LLM failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CortexError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Initialization of {component} failed: {details}")]
    Initialization { component: String, details: String },

    #[error("Plugin {plugin} failed: {details}")]
    PluginFailure { plugin: String, details: String },

    #[error("{component} timed out after {timeout_ms} ms")]
    Timeout { component: String, timeout_ms: u64 },

    #[error("LLM Error: {0}")]
    LlmInferenceFailed(String),

    #[error("Mode precondition failed: requires {required}, robot is in {actual}")]
    ModePrecondition { required: RobotMode, actual: RobotMode },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Unknown plugin kind '{0}'")]
    UnknownPlugin(String),

    #[error("Event Bus Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Serde helpers
// ────────────────────────────────────────────────────────────────────────────

/// (De)serialize a [`Duration`] as fractional milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}
