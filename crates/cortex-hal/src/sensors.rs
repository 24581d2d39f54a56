//! Built-in input plugins.
//!
//! | Kind | Reads | Payload |
//! |---|---|---|
//! | [`MockInput`] | nothing | the configured `payload` (default `{"status": "ok"}`) |
//! | [`RobotStateInput`] | `read_state` | mode, battery, temperature, IMU |
//! | [`VisionInput`] | `capture_frame` | frame size, brightness, `lighting` label |
//! | [`MicrophoneInput`] | `audio_level` | level in dBFS, `speech_detected` |
//! | [`GpsInput`] | `gps_fix` | latitude, longitude, altitude, satellites |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::{CortexError, InputDatum, PluginStatus};
use serde_json::{Value, json};
use tracing::debug;

use crate::plugin::{InputPlugin, PluginSpec, PluginState};
use crate::registry::PluginContext;
use crate::session::SessionBinding;

// ─────────────────────────────────────────────────────────────────────────────
// Shared core of the session-backed sensors
// ─────────────────────────────────────────────────────────────────────────────

struct SensorCore {
    state: PluginState,
    binding: SessionBinding,
    priority: Option<f64>,
    timeout: Option<Duration>,
}

impl SensorCore {
    fn new(spec: &PluginSpec, kind: &'static str, ctx: &PluginContext) -> Self {
        Self {
            state: PluginState::new(spec, kind),
            binding: ctx.binding(spec),
            priority: spec.priority,
            timeout: spec.timeout(),
        }
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.binding.open().await?;
        self.state.set_initialized(true);
        debug!(plugin = self.state.name(), kind = self.state.kind(), "input initialized");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.state.set_initialized(false);
        self.binding.close().await
    }

    fn datum(&self, payload: Value) -> InputDatum {
        InputDatum::new(self.state.name(), payload).with_priority(self.priority)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MockInput
// ─────────────────────────────────────────────────────────────────────────────

/// Emits a fixed payload every tick.
///
/// Options: `payload` (any JSON), `latency_ms` (simulated poll latency),
/// `fail` (always error).
pub struct MockInput {
    state: PluginState,
    payload: Value,
    latency: Duration,
    fail: bool,
    priority: Option<f64>,
    timeout: Option<Duration>,
}

impl MockInput {
    pub fn from_spec(spec: &PluginSpec) -> Result<Self, CortexError> {
        Ok(Self {
            state: PluginState::new(spec, "mock"),
            payload: spec.option_or("payload", json!({"status": "ok"}))?,
            latency: Duration::from_millis(spec.option_or("latency_ms", 0u64)?),
            fail: spec.option_or("fail", false)?,
            priority: spec.priority,
            timeout: spec.timeout(),
        })
    }

    pub(crate) fn build(spec: PluginSpec, _ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
        Ok(Arc::new(Self::from_spec(&spec)?))
    }
}

#[async_trait]
impl InputPlugin for MockInput {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.state.set_initialized(true);
        Ok(())
    }

    async fn poll(&self) -> Result<Option<InputDatum>, CortexError> {
        self.state.require_initialized()?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = if self.fail {
            Err(self.state.failure("simulated input failure"))
        } else {
            Ok(Some(
                InputDatum::new(self.state.name(), self.payload.clone()).with_priority(self.priority),
            ))
        };
        self.state.track(result)
    }

    fn get_status(&self) -> PluginStatus {
        self.state.status(json!({ "polls": self.state.calls(), "fail": self.fail }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.state.set_initialized(false);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RobotStateInput
// ─────────────────────────────────────────────────────────────────────────────

/// Robot telemetry: FSM mode, battery, temperature and IMU attitude.
///
/// Options: `low_battery_percent` (default 20) adds `"battery_low": true`
/// to the payload below that level.
pub struct RobotStateInput {
    core: SensorCore,
    low_battery: f32,
}

impl RobotStateInput {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
        Ok(Arc::new(Self {
            low_battery: spec.option_or("low_battery_percent", 20.0)?,
            core: SensorCore::new(&spec, "robot_state", ctx),
        }))
    }
}

#[async_trait]
impl InputPlugin for RobotStateInput {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn timeout(&self) -> Option<Duration> {
        self.core.timeout
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn poll(&self) -> Result<Option<InputDatum>, CortexError> {
        self.core.state.require_initialized()?;
        let result = self.core.binding.session().read_state().await.map(|s| {
            Some(self.core.datum(json!({
                "mode": s.mode,
                "battery_percent": s.battery_percent,
                "battery_low": s.battery_percent < self.low_battery,
                "temperature_c": s.temperature_c,
                "imu_rpy": s.imu_rpy,
            })))
        });
        self.core.state.track(result)
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({ "polls": self.core.state.calls() }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionInput
// ─────────────────────────────────────────────────────────────────────────────

/// Camera frame summary.
///
/// Options: `dark_threshold` (default 50) and `bright_threshold` (default
/// 200) on mean brightness decide the `lighting` label.
pub struct VisionInput {
    core: SensorCore,
    dark_threshold: f32,
    bright_threshold: f32,
}

impl VisionInput {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
        Ok(Arc::new(Self {
            dark_threshold: spec.option_or("dark_threshold", 50.0)?,
            bright_threshold: spec.option_or("bright_threshold", 200.0)?,
            core: SensorCore::new(&spec, "vision", ctx),
        }))
    }

    fn lighting(&self, brightness: f32) -> &'static str {
        if brightness < self.dark_threshold {
            "dark"
        } else if brightness > self.bright_threshold {
            "bright"
        } else {
            "normal"
        }
    }
}

#[async_trait]
impl InputPlugin for VisionInput {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn timeout(&self) -> Option<Duration> {
        self.core.timeout
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn poll(&self) -> Result<Option<InputDatum>, CortexError> {
        self.core.state.require_initialized()?;
        let result = self.core.binding.session().capture_frame().await.map(|f| {
            Some(self.core.datum(json!({
                "frame_id": f.frame_id,
                "width": f.width,
                "height": f.height,
                "mean_brightness": f.mean_brightness,
                "lighting": self.lighting(f.mean_brightness),
            })))
        });
        self.core.state.track(result)
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({ "frames": self.core.state.calls() }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MicrophoneInput
// ─────────────────────────────────────────────────────────────────────────────

/// Microphone level with a simple voice-activity threshold.
///
/// Options: `threshold_db` (default −40), `report_silence` (default false;
/// when false, quiet ticks produce no datum).
pub struct MicrophoneInput {
    core: SensorCore,
    threshold_db: f32,
    report_silence: bool,
}

impl MicrophoneInput {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
        Ok(Arc::new(Self {
            threshold_db: spec.option_or("threshold_db", -40.0)?,
            report_silence: spec.option_or("report_silence", false)?,
            core: SensorCore::new(&spec, "microphone", ctx),
        }))
    }
}

#[async_trait]
impl InputPlugin for MicrophoneInput {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn timeout(&self) -> Option<Duration> {
        self.core.timeout
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn poll(&self) -> Result<Option<InputDatum>, CortexError> {
        self.core.state.require_initialized()?;
        let result = self.core.binding.session().audio_level().await.map(|level| {
            let speech = level.rms_db >= self.threshold_db;
            (speech || self.report_silence).then(|| {
                self.core.datum(json!({
                    "rms_db": level.rms_db,
                    "speech_detected": speech,
                }))
            })
        });
        self.core.state.track(result)
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({
            "polls": self.core.state.calls(),
            "threshold_db": self.threshold_db,
        }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GpsInput
// ─────────────────────────────────────────────────────────────────────────────

/// GNSS position.  Produces no datum until the receiver has a fix.
pub struct GpsInput {
    core: SensorCore,
}

impl GpsInput {
    pub(crate) fn build(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
        Ok(Arc::new(Self {
            core: SensorCore::new(&spec, "gps", ctx),
        }))
    }
}

#[async_trait]
impl InputPlugin for GpsInput {
    fn name(&self) -> &str {
        self.core.state.name()
    }

    fn timeout(&self) -> Option<Duration> {
        self.core.timeout
    }

    async fn initialize(&self) -> Result<(), CortexError> {
        self.core.initialize().await
    }

    async fn poll(&self) -> Result<Option<InputDatum>, CortexError> {
        self.core.state.require_initialized()?;
        let result = self.core.binding.session().gps_fix().await.map(|fix| {
            fix.map(|f| {
                self.core.datum(json!({
                    "latitude": f.latitude,
                    "longitude": f.longitude,
                    "altitude_m": f.altitude_m,
                    "satellites": f.satellites,
                }))
            })
        });
        self.core.state.track(result)
    }

    fn get_status(&self) -> PluginStatus {
        self.core.state.status(json!({ "polls": self.core.state.calls() }))
    }

    async fn stop(&self) -> Result<(), CortexError> {
        self.core.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HardwareSession;
    use crate::sim_session::SimSession;
    use cortex_types::RobotMode;

    fn ctx_with(session: SimSession) -> PluginContext {
        PluginContext::new(Arc::new(session))
    }

    #[tokio::test]
    async fn mock_input_emits_configured_payload() {
        let spec = PluginSpec::new("thermo")
            .with_priority(3.0)
            .with_option("payload", json!({"temp": 20}));
        let input = MockInput::from_spec(&spec).unwrap();
        input.initialize().await.unwrap();

        let datum = input.poll().await.unwrap().expect("datum");
        assert_eq!(datum.source_name, "thermo");
        assert_eq!(datum.payload, json!({"temp": 20}));
        assert_eq!(datum.priority_hint, Some(3.0));
    }

    #[tokio::test]
    async fn mock_input_refuses_to_poll_before_initialize() {
        let input = MockInput::from_spec(&PluginSpec::new("thermo")).unwrap();
        assert!(input.poll().await.is_err());
    }

    #[tokio::test]
    async fn failing_mock_input_records_last_error() {
        let spec = PluginSpec::new("flaky").with_option("fail", json!(true));
        let input = MockInput::from_spec(&spec).unwrap();
        input.initialize().await.unwrap();
        assert!(input.poll().await.is_err());
        assert!(input.get_status().last_error.is_some());
    }

    #[tokio::test]
    async fn robot_state_reports_mode() {
        let ctx = ctx_with(SimSession::builder().connected().with_mode(RobotMode::Ready).build());
        let input = RobotStateInput::build(PluginSpec::new("G1State"), &ctx).unwrap();
        input.initialize().await.unwrap();
        let datum = input.poll().await.unwrap().expect("datum");
        assert_eq!(datum.payload["mode"], "ready");
        assert_eq!(datum.payload["battery_low"], false);
    }

    #[tokio::test]
    async fn robot_state_flags_low_battery() {
        let ctx = ctx_with(SimSession::builder().connected().with_battery(5.0).build());
        let input = RobotStateInput::build(PluginSpec::new("state"), &ctx).unwrap();
        input.initialize().await.unwrap();
        let datum = input.poll().await.unwrap().expect("datum");
        assert_eq!(datum.payload["battery_low"], true);
    }

    #[tokio::test]
    async fn vision_labels_lighting() {
        let ctx = ctx_with(SimSession::builder().connected().build());
        let spec = PluginSpec::new("camera").with_option("dark_threshold", json!(255.0));
        let input = VisionInput::build(spec, &ctx).unwrap();
        input.initialize().await.unwrap();
        let datum = input.poll().await.unwrap().expect("datum");
        assert_eq!(datum.payload["lighting"], "dark");
        assert_eq!(datum.payload["width"], 640);
    }

    #[tokio::test]
    async fn microphone_is_silent_below_threshold() {
        let ctx = ctx_with(SimSession::builder().connected().with_audio_level(-70.0).build());
        let input = MicrophoneInput::build(PluginSpec::new("mic"), &ctx).unwrap();
        input.initialize().await.unwrap();
        assert!(input.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn microphone_detects_speech() {
        let ctx = ctx_with(SimSession::builder().connected().with_audio_level(-20.0).build());
        let input = MicrophoneInput::build(PluginSpec::new("mic"), &ctx).unwrap();
        input.initialize().await.unwrap();
        let datum = input.poll().await.unwrap().expect("speech");
        assert_eq!(datum.payload["speech_detected"], true);
    }

    #[tokio::test]
    async fn gps_reports_nothing_without_fix() {
        let ctx = ctx_with(SimSession::builder().connected().build());
        let input = GpsInput::build(PluginSpec::new("gps"), &ctx).unwrap();
        input.initialize().await.unwrap();
        assert!(input.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_fault_surfaces_as_poll_error() {
        let ctx = ctx_with(SimSession::builder().build()); // disconnected shared session
        let input = GpsInput::build(PluginSpec::new("gps"), &ctx).unwrap();
        input.initialize().await.unwrap();
        assert!(matches!(
            input.poll().await,
            Err(CortexError::HardwareFault { .. })
        ));
    }

    #[tokio::test]
    async fn mock_mode_uses_private_session() {
        let shared = Arc::new(SimSession::builder().build());
        let ctx = PluginContext::new(shared.clone());
        let spec = PluginSpec::new("gps").with_mock_mode(true);
        let input = GpsInput::build(spec, &ctx).unwrap();
        input.initialize().await.unwrap();

        input.poll().await.expect("private session is connected");
        assert!(!shared.is_connected(), "shared session untouched");
        input.stop().await.unwrap();
    }
}
