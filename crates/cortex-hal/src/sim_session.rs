//! [`SimSession`] – in-process hardware session for tests, CI and
//! development without a robot.
//!
//! Records every command it receives as a [`SessionCall`] and produces
//! plausible sensor readings.  Mode switches obey the same transition rules
//! as the real motion switcher, and every call fails with
//! [`CortexError::HardwareFault`] until [`HardwareSession::connect`] has run.
//!
//! # Stub behaviour
//!
//! | Reading | Stub behaviour |
//! |---|---|
//! | `read_state` | Current mode, battery draining 0.01 % per read, 36 °C |
//! | `capture_frame` | 640×480 frame with a slowly varying mean brightness |
//! | `audio_level` | The configured level (default −60 dBFS) |
//! | `gps_fix` | The configured fix, or `None` |
//!
//! # Example
//!
//! ```rust
//! use cortex_hal::sim_session::SimSession;
//! use cortex_types::RobotMode;
//!
//! let session = SimSession::builder()
//!     .connected()
//!     .with_mode(RobotMode::MainOperationControl)
//!     .with_gps(-23.55, -46.63)
//!     .build();
//! assert!(session.calls().is_empty());
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use cortex_types::{CortexError, RobotMode};
use tracing::debug;

use crate::mode::can_transition;
use crate::session::{
    AudioLevel, FrameSummary, GpsFix, HardwareSession, LocomotionService, RobotState,
    VelocityCommand,
};

/// One command received by a [`SimSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Connect,
    Disconnect,
    SwitchMode(RobotMode),
    Move {
        service: LocomotionService,
        command: VelocityCommand,
    },
    StopMotion,
    ArmAction(u32),
    ReleaseArm,
    SetLed([u8; 3]),
    Speak { text: String, volume: Option<u8> },
    StopAudio,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    mode: RobotMode,
    battery_percent: f32,
    frame_id: u64,
    led: [u8; 3],
    calls: Vec<SessionCall>,
}

/// Simulated G1 hardware session.
#[derive(Debug)]
pub struct SimSession {
    interface: String,
    audio_db: f32,
    gps: Option<GpsFix>,
    state: Mutex<SimState>,
}

impl SimSession {
    /// Start building a session.  Defaults: disconnected, `Damping`, 100 %
    /// battery, no GPS fix.
    pub fn builder() -> SimSessionBuilder {
        SimSessionBuilder::default()
    }

    /// Every command received so far, oldest first.
    pub fn calls(&self) -> Vec<SessionCall> {
        self.lock().calls.clone()
    }

    /// Last LED colour set.
    pub fn led(&self) -> [u8; 3] {
        self.lock().led
    }

    /// Network interface the session was configured for.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-call; the state is
        // still a plain record.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connected_state(&self) -> Result<std::sync::MutexGuard<'_, SimState>, CortexError> {
        let state = self.lock();
        if state.connected {
            Ok(state)
        } else {
            Err(CortexError::HardwareFault {
                component: "sim-session".to_string(),
                details: "session is not connected".to_string(),
            })
        }
    }

    fn record(&self, call: SessionCall) -> Result<(), CortexError> {
        let mut state = self.connected_state()?;
        debug!(?call, "sim session call");
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl HardwareSession for SimSession {
    fn name(&self) -> &str {
        "sim"
    }

    async fn connect(&self) -> Result<(), CortexError> {
        let mut state = self.lock();
        if !state.connected {
            state.connected = true;
            state.calls.push(SessionCall::Connect);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CortexError> {
        let mut state = self.lock();
        if state.connected {
            state.connected = false;
            state.calls.push(SessionCall::Disconnect);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn current_mode(&self) -> Result<RobotMode, CortexError> {
        Ok(self.connected_state()?.mode)
    }

    async fn switch_mode(&self, mode: RobotMode) -> Result<(), CortexError> {
        let mut state = self.connected_state()?;
        if !can_transition(state.mode, mode) {
            return Err(CortexError::HardwareFault {
                component: "motion-switcher".to_string(),
                details: format!("transition {} → {} rejected", state.mode, mode),
            });
        }
        state.mode = mode;
        state.calls.push(SessionCall::SwitchMode(mode));
        Ok(())
    }

    async fn move_velocity(
        &self,
        service: LocomotionService,
        command: VelocityCommand,
    ) -> Result<(), CortexError> {
        self.record(SessionCall::Move { service, command })
    }

    async fn stop_motion(&self) -> Result<(), CortexError> {
        self.record(SessionCall::StopMotion)
    }

    async fn arm_action(&self, action_id: u32) -> Result<(), CortexError> {
        self.record(SessionCall::ArmAction(action_id))
    }

    async fn release_arm(&self) -> Result<(), CortexError> {
        self.record(SessionCall::ReleaseArm)
    }

    async fn set_led(&self, rgb: [u8; 3]) -> Result<(), CortexError> {
        let mut state = self.connected_state()?;
        state.led = rgb;
        state.calls.push(SessionCall::SetLed(rgb));
        Ok(())
    }

    async fn speak(&self, text: &str, volume: Option<u8>) -> Result<(), CortexError> {
        self.record(SessionCall::Speak {
            text: text.to_string(),
            volume,
        })
    }

    async fn stop_audio(&self) -> Result<(), CortexError> {
        self.record(SessionCall::StopAudio)
    }

    async fn read_state(&self) -> Result<RobotState, CortexError> {
        let mut state = self.connected_state()?;
        state.battery_percent = (state.battery_percent - 0.01).max(0.0);
        Ok(RobotState {
            mode: state.mode,
            battery_percent: state.battery_percent,
            temperature_c: 36.0,
            imu_rpy: [0.0, 0.0, 0.0],
        })
    }

    async fn capture_frame(&self) -> Result<FrameSummary, CortexError> {
        let mut state = self.connected_state()?;
        state.frame_id += 1;
        let phase = (state.frame_id % 64) as f32 / 64.0;
        Ok(FrameSummary {
            frame_id: state.frame_id,
            width: 640,
            height: 480,
            mean_brightness: 96.0 + 64.0 * (phase * std::f32::consts::TAU).sin(),
        })
    }

    async fn audio_level(&self) -> Result<AudioLevel, CortexError> {
        self.connected_state()?;
        Ok(AudioLevel { rms_db: self.audio_db })
    }

    async fn gps_fix(&self) -> Result<Option<GpsFix>, CortexError> {
        self.connected_state()?;
        Ok(self.gps)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimSession`].
#[derive(Debug)]
pub struct SimSessionBuilder {
    interface: String,
    connected: bool,
    mode: RobotMode,
    battery_percent: f32,
    audio_db: f32,
    gps: Option<GpsFix>,
}

impl Default for SimSessionBuilder {
    fn default() -> Self {
        Self {
            interface: "lo".to_string(),
            connected: false,
            mode: RobotMode::Damping,
            battery_percent: 100.0,
            audio_db: -60.0,
            gps: None,
        }
    }
}

impl SimSessionBuilder {
    /// Start already connected (skips the recorded `Connect` call).
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_mode(mut self, mode: RobotMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_battery(mut self, percent: f32) -> Self {
        self.battery_percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_audio_level(mut self, rms_db: f32) -> Self {
        self.audio_db = rms_db;
        self
    }

    pub fn with_gps(mut self, latitude: f64, longitude: f64) -> Self {
        self.gps = Some(GpsFix {
            latitude,
            longitude,
            altitude_m: 760.0,
            satellites: 9,
        });
        self
    }

    pub fn build(self) -> SimSession {
        SimSession {
            interface: self.interface,
            audio_db: self.audio_db,
            gps: self.gps,
            state: Mutex::new(SimState {
                connected: self.connected,
                mode: self.mode,
                battery_percent: self.battery_percent,
                frame_id: 0,
                led: [0, 0, 0],
                calls: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_fail_until_connected() {
        let session = SimSession::builder().build();
        assert!(session.arm_action(1).await.is_err());

        session.connect().await.unwrap();
        session.arm_action(1).await.expect("connected");
        assert_eq!(session.calls(), vec![SessionCall::Connect, SessionCall::ArmAction(1)]);
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_idempotent() {
        let session = SimSession::builder().build();
        session.connect().await.unwrap();
        session.connect().await.unwrap();
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.calls(), vec![SessionCall::Connect, SessionCall::Disconnect]);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn switch_mode_rejects_ladder_skips() {
        let session = SimSession::builder().connected().with_mode(RobotMode::ZeroTorque).build();
        let err = session
            .switch_mode(RobotMode::MainOperationControl)
            .await
            .expect_err("skip must be rejected");
        assert!(matches!(err, CortexError::HardwareFault { .. }));
        assert_eq!(session.current_mode().await.unwrap(), RobotMode::ZeroTorque);
    }

    #[tokio::test]
    async fn read_state_reports_mode_and_drains_battery() {
        let session = SimSession::builder()
            .connected()
            .with_mode(RobotMode::Ready)
            .with_battery(50.0)
            .build();
        let first = session.read_state().await.unwrap();
        let second = session.read_state().await.unwrap();
        assert_eq!(first.mode, RobotMode::Ready);
        assert!(second.battery_percent < first.battery_percent);
    }

    #[tokio::test]
    async fn frames_are_numbered_and_bounded() {
        let session = SimSession::builder().connected().build();
        for expected in 1..=3 {
            let frame = session.capture_frame().await.unwrap();
            assert_eq!(frame.frame_id, expected);
            assert!((0.0..=255.0).contains(&frame.mean_brightness));
        }
    }

    #[tokio::test]
    async fn gps_fix_is_none_unless_configured() {
        let session = SimSession::builder().connected().build();
        assert!(session.gps_fix().await.unwrap().is_none());

        let session = SimSession::builder().connected().with_gps(1.5, 2.5).build();
        let fix = session.gps_fix().await.unwrap().expect("fix");
        assert_eq!(fix.latitude, 1.5);
    }

    #[tokio::test]
    async fn set_led_is_remembered() {
        let session = SimSession::builder().connected().build();
        session.set_led([1, 2, 3]).await.unwrap();
        assert_eq!(session.led(), [1, 2, 3]);
    }
}
