//! Built-in action plugins.
//!
//! | Kind | Parameters | Fail-safe |
//! |---|---|---|
//! | [`MovementAction`] | `{"vx", "vy", "vyaw", "duration_ms"}` or `{"command": "stop"}` | stop motion |
//! | [`ArmsAction`] | `{"gesture": name}`, `{"action_id": n}` or `{"command": "release"}` | release arm |
//! | [`SpeechAction`] | `{"text", "volume"}` | stop audio |
//! | [`EmotionAction`] | `{"emotion": name}` or `{"rgb": [r, g, b]}` | neutral colour |
//! | [`RecordingAction`] | anything | counted |
//!
//! Movement and arm gestures call
//! [`ModeController::ensure_mode`][crate::mode::ModeController::ensure_mode]
//! before touching the session; the required mode defaults to
//! `MainOperationControl` and can be overridden with `required_mode`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::{CortexError, PluginStatus, RobotMode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::mode::ModeController;
use crate::plugin::{ActionPlugin, PluginSpec, PluginState};
use crate::registry::PluginContext;
use crate::session::{LocomotionService, SessionBinding, VelocityCommand};

// ─────────────────────────────────────────────────────────────────────────────
// Shared core
// ─────────────────────────────────────────────────────────────────────────────

struct ActuatorCore {
    state: PluginState,
    binding: SessionBinding,
    modes: ModeController,
    required_mode: Option<RobotMode>,
}

impl ActuatorCore {
    fn new(
        spec: &PluginSpec,
        kind: &'static str,
        ctx: &PluginContext,
        default_mode: Option<RobotMode>,
    ) -> Self {
        let binding = ctx.binding(spec);
        Self {
            state: PluginState::new(spec, kind),
            modes: ModeController::new(Arc::clone(binding.session()), ctx.auto_switch_mode),
            binding,
            required_mode: spec.required_mode.or(default_mode),
        }
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.binding.open().await?;
        self.state.set_initialized(true);
        debug!(plugin = self.state.name(), kind = self.state.kind(), "action initialized");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.state.set_initialized(false);
        self.binding.close().await
    }

    async fn ensure_mode(&self) -> Result<(), CortexError> {
        match self.required_mode {
            Some(mode) => self.modes.ensure_mode(mode).await,
            None => Ok(()),
        }
    }

    fn params<T: DeserializeOwned>(&self, params: &Value) -> Result<T, CortexError> {
        serde_json::from_value(params.clone())
            .map_err(|e| self.state.failure(format!("invalid parameters: {e}")))
    }
}

fn command_of(params: &Value) -> Option<&str> {
    params.get("command").and_then(Value::as_str)
}

// ─────────────────────────────────────────────────────────────────────────────
// MovementAction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MoveParams {
    #[serde(default)]
    vx: f32,
    #[serde(default)]
    vy: f32,
    #[serde(default)]
    vyaw: f32,
    duration_ms: Option<u64>,
}

/// Body velocity commands with speed caps, stopped after a bounded duration.
///
/// Options: `max_linear` (m/s, default 0.5), `max_angular` (rad/s, default
/// 1.0), `default_duration_ms` (1000), `max_duration_ms` (5000), `service`
/// (`"sport"` | `"loco"`, default from the runtime configuration).
pub struct MovementAction {
    core: ActuatorCore,
    service: LocomotionService,
    max_linear: f32,
    max_angular: f32,
    default_duration: u64,
    max_duration: u64,
}

impl MovementAction {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
        let service = match spec.option::<String>("service")? {
            Some(s) => s.parse()?,
            None => ctx.locomotion,
        };
        Ok(Arc::new(Self {
            service,
            max_linear: spec.option_or("max_linear", 0.5)?,
            max_angular: spec.option_or("max_angular", 1.0)?,
            default_duration: spec.option_or("default_duration_ms", 1000)?,
            max_duration: spec.option_or("max_duration_ms", 5000)?,
            core: ActuatorCore::new(&spec, "movement", ctx, Some(RobotMode::MainOperationControl)),
        }))
    }

    fn validate(&self, p: &MoveParams) -> Result<VelocityCommand, CortexError> {
        let linear_ok = |v: f32| v.is_finite() && v.abs() <= self.max_linear;
        if !linear_ok(p.vx) || !linear_ok(p.vy) {
            return Err(self.core.state.failure(format!(
                "linear velocity ({}, {}) exceeds cap {} m/s",
                p.vx, p.vy, self.max_linear
            )));
        }
        if !p.vyaw.is_finite() || p.vyaw.abs() > self.max_angular {
            return Err(self.core.state.failure(format!(
                "yaw rate {} exceeds cap {} rad/s",
                p.vyaw, self.max_angular
            )));
        }
        Ok(VelocityCommand {
            vx: p.vx,
            vy: p.vy,
            vyaw: p.vyaw,
        })
    }

    async fn run(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.require_initialized()?;
        let session = self.core.binding.session();
        if command_of(params) == Some("stop") {
            return session.stop_motion().await;
        }

        let p: MoveParams = self.core.params(params)?;
        let command = self.validate(&p)?;
        let duration = p.duration_ms.unwrap_or(self.default_duration).min(self.max_duration);

        self.core.ensure_mode().await?;
        info!(plugin = self.name(), ?command, duration_ms = duration, service = %self.service, "moving");
        session.move_velocity(self.service, command).await?;
        tokio::time::sleep(Duration::from_millis(duration)).await;
        session.stop_motion().await
    }
}

#[async_trait]
impl ActionPlugin for MovementAction {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn usage(&self) -> String {
        format!(
            "{{\"vx\": m/s, \"vy\": m/s, \"vyaw\": rad/s, \"duration_ms\": ms}} (|v| <= {}, |vyaw| <= {}) or {{\"command\": \"stop\"}}",
            self.max_linear, self.max_angular
        )
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn execute(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.track(self.run(params).await)
    }

    async fn fail_safe(&self) -> Result<(), CortexError> {
        self.core.binding.session().stop_motion().await
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({
            "commands": self.core.state.calls(),
            "service": self.service,
            "required_mode": self.core.required_mode,
        }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArmsAction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ArmParams {
    gesture: Option<String>,
    action_id: Option<u32>,
}

/// Arm gestures by name or numeric action ID.
///
/// Gesture names resolve only through the `gestures` option
/// (`{"wave": 26, ...}`); there is no built-in table because action
/// numbering differs between firmware revisions.  Option
/// `release_after_ms` returns the arms to rest after each gesture.
pub struct ArmsAction {
    core: ActuatorCore,
    gestures: HashMap<String, u32>,
    release_after: Option<Duration>,
}

impl ArmsAction {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
        let gestures: HashMap<String, u32> = spec.option_or("gestures", HashMap::new())?;
        Ok(Arc::new(Self {
            gestures: gestures.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
            release_after: spec.option::<u64>("release_after_ms")?.map(Duration::from_millis),
            core: ActuatorCore::new(&spec, "arms", ctx, Some(RobotMode::MainOperationControl)),
        }))
    }

    fn resolve(&self, p: &ArmParams) -> Result<u32, CortexError> {
        match (p.action_id, &p.gesture) {
            (Some(id), _) => Ok(id),
            (None, Some(name)) => self
                .gestures
                .get(&name.to_lowercase())
                .copied()
                .ok_or_else(|| self.core.state.failure(format!("unknown gesture '{name}'"))),
            (None, None) => Err(self.core.state.failure("expected 'gesture' or 'action_id'")),
        }
    }

    async fn run(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.require_initialized()?;
        let session = self.core.binding.session();
        if command_of(params) == Some("release") {
            return session.release_arm().await;
        }

        let p: ArmParams = self.core.params(params)?;
        let action_id = self.resolve(&p)?;
        self.core.ensure_mode().await?;
        info!(plugin = self.name(), action_id, gesture = ?p.gesture, "arm gesture");
        session.arm_action(action_id).await?;

        if let Some(delay) = self.release_after {
            tokio::time::sleep(delay).await;
            session.release_arm().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ActionPlugin for ArmsAction {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn usage(&self) -> String {
        let mut names: Vec<&str> = self.gestures.keys().map(String::as_str).collect();
        names.sort_unstable();
        format!(
            "{{\"gesture\": one of [{}]}} or {{\"command\": \"release\"}}",
            names.join(", ")
        )
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn execute(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.track(self.run(params).await)
    }

    async fn fail_safe(&self) -> Result<(), CortexError> {
        self.core.binding.session().release_arm().await
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({
            "gestures": self.gestures.len(),
            "commands": self.core.state.calls(),
            "required_mode": self.core.required_mode,
        }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpeechAction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SpeechParams {
    text: String,
    volume: Option<u8>,
}

/// Text-to-speech through the robot speaker.
///
/// Options: `default_volume` (0–100), `max_chars` (default 500; longer text
/// is truncated).
pub struct SpeechAction {
    core: ActuatorCore,
    default_volume: Option<u8>,
    max_chars: usize,
}

impl SpeechAction {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
        Ok(Arc::new(Self {
            default_volume: spec.option("default_volume")?,
            max_chars: spec.option_or("max_chars", 500)?,
            core: ActuatorCore::new(&spec, "speech", ctx, None),
        }))
    }

    async fn run(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.require_initialized()?;
        let p: SpeechParams = self.core.params(params)?;
        let text = p.text.trim();
        if text.is_empty() {
            return Err(self.core.state.failure("nothing to say"));
        }
        let text: String = text.chars().take(self.max_chars).collect();
        let volume = p.volume.or(self.default_volume).map(|v| v.min(100));

        self.core.ensure_mode().await?;
        info!(plugin = self.name(), chars = text.chars().count(), "speaking");
        self.core.binding.session().speak(&text, volume).await
    }
}

#[async_trait]
impl ActionPlugin for SpeechAction {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn usage(&self) -> String {
        "{\"text\": what to say, \"volume\": 0-100 (optional)}".to_string()
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn execute(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.track(self.run(params).await)
    }

    async fn fail_safe(&self) -> Result<(), CortexError> {
        self.core.binding.session().stop_audio().await
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({ "utterances": self.core.state.calls() }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EmotionAction
// ─────────────────────────────────────────────────────────────────────────────

const NEUTRAL: [u8; 3] = [128, 128, 128];

fn default_palette() -> HashMap<String, [u8; 3]> {
    [
        ("neutral", NEUTRAL),
        ("happy", [255, 255, 0]),
        ("sad", [0, 0, 255]),
        ("excited", [255, 0, 0]),
        ("calm", [0, 255, 0]),
        ("thinking", [255, 165, 0]),
        ("surprised", [255, 0, 255]),
        ("focused", [0, 255, 255]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Deserialize)]
struct EmotionParams {
    emotion: Option<String>,
    rgb: Option<[u8; 3]>,
}

/// Shows an emotion as an LED colour.
///
/// Option `colors` adds or overrides palette entries (`{"curious": [0, 128, 255]}`).
pub struct EmotionAction {
    core: ActuatorCore,
    palette: HashMap<String, [u8; 3]>,
}

impl EmotionAction {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
        let mut palette = default_palette();
        let overrides: HashMap<String, [u8; 3]> = spec.option_or("colors", HashMap::new())?;
        palette.extend(overrides.into_iter().map(|(k, v)| (k.to_lowercase(), v)));
        Ok(Arc::new(Self {
            palette,
            core: ActuatorCore::new(&spec, "emotion", ctx, None),
        }))
    }

    async fn run(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.require_initialized()?;
        let p: EmotionParams = self.core.params(params)?;
        let rgb = match (p.rgb, &p.emotion) {
            (Some(rgb), _) => rgb,
            (None, Some(name)) => *self
                .palette
                .get(&name.to_lowercase())
                .ok_or_else(|| self.core.state.failure(format!("unknown emotion '{name}'")))?,
            (None, None) => return Err(self.core.state.failure("expected 'emotion' or 'rgb'")),
        };
        self.core.ensure_mode().await?;
        debug!(plugin = self.name(), ?rgb, "led colour");
        self.core.binding.session().set_led(rgb).await
    }
}

#[async_trait]
impl ActionPlugin for EmotionAction {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn usage(&self) -> String {
        let mut names: Vec<&str> = self.palette.keys().map(String::as_str).collect();
        names.sort_unstable();
        format!("{{\"emotion\": one of [{}]}}", names.join(", "))
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn execute(&self, params: &Value) -> Result<(), CortexError> {
        self.core.state.track(self.run(params).await)
    }

    async fn fail_safe(&self) -> Result<(), CortexError> {
        self.core.binding.session().set_led(NEUTRAL).await
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({ "changes": self.core.state.calls() }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordingAction
// ─────────────────────────────────────────────────────────────────────────────

/// Records every command it receives.  For tests and dry runs.
///
/// Options: `fail` (every execute errors), `latency_ms`.
pub struct RecordingAction {
    state: PluginState,
    fail: bool,
    latency: Duration,
    received: Mutex<Vec<Value>>,
    fail_safes: AtomicU64,
}

impl RecordingAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: PluginState::new(&PluginSpec::new(name), "mock"),
            fail: false,
            latency: Duration::ZERO,
            received: Mutex::new(Vec::new()),
            fail_safes: AtomicU64::new(0),
        }
    }

    pub fn from_spec(spec: &PluginSpec) -> Result<Self, CortexError> {
        Ok(Self {
            state: PluginState::new(spec, "mock"),
            fail: spec.option_or("fail", false)?,
            latency: Duration::from_millis(spec.option_or("latency_ms", 0u64)?),
            received: Mutex::new(Vec::new()),
            fail_safes: AtomicU64::new(0),
        })
    }

    /// Make every `execute` wait `latency` before returning.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every `execute` fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn build(spec: PluginSpec, _ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
        Ok(Arc::new(Self::from_spec(&spec)?))
    }

    /// Parameters of every `execute` call, oldest first.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn fail_safe_count(&self) -> u64 {
        self.fail_safes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionPlugin for RecordingAction {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn usage(&self) -> String {
        "any JSON object".to_string()
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.state.set_initialized(true);
        Ok(())
    }

    async fn execute(&self, params: &Value) -> Result<(), CortexError> {
        self.received.lock().unwrap_or_else(|p| p.into_inner()).push(params.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = if self.fail {
            Err(self.state.failure("simulated action failure"))
        } else {
            Ok(())
        };
        self.state.track(result)
    }

    async fn fail_safe(&self) -> Result<(), CortexError> {
        self.fail_safes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_status(&self) -> PluginStatus {
        self.state.status(json!({
            "calls": self.state.calls(),
            "fail_safes": self.fail_safe_count(),
            "last_params": self.received().last(),
        }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.state.set_initialized(false);
        Ok(())
    }
}
