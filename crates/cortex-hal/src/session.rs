//! [`HardwareSession`] – the single handle to the robot's vendor SDK.
//!
//! The session is constructed once during runtime initialization and shared
//! as `Arc<dyn HardwareSession>` with every plugin that touches hardware.
//! Nothing else in the workspace opens SDK channels, so the session's
//! lifetime is exactly the span between [`HardwareSession::connect`] and
//! [`HardwareSession::disconnect`].
//!
//! Only [`SimSession`][crate::sim_session::SimSession] ships with this
//! crate.  A binding to the real SDK implements the same trait.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cortex_types::{CortexError, RobotMode};
use serde::{Deserialize, Serialize};

/// Which locomotion service receives velocity commands.
///
/// Firmware revisions disagree on this, so it is always a configuration
/// choice and never inferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocomotionService {
    #[default]
    Sport,
    Loco,
}

impl fmt::Display for LocomotionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocomotionService::Sport => f.write_str("sport"),
            LocomotionService::Loco => f.write_str("loco"),
        }
    }
}

impl FromStr for LocomotionService {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sport" => Ok(LocomotionService::Sport),
            "loco" => Ok(LocomotionService::Loco),
            other => Err(CortexError::Config(format!(
                "unknown locomotion service '{other}' (expected 'sport' or 'loco')"
            ))),
        }
    }
}

/// Body velocity command in the robot frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward velocity (m/s).
    pub vx: f32,
    /// Lateral velocity (m/s).
    pub vy: f32,
    /// Yaw rate (rad/s).
    pub vyaw: f32,
}

/// Low-rate robot telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub mode: RobotMode,
    pub battery_percent: f32,
    pub temperature_c: f32,
    /// Roll, pitch, yaw (radians).
    pub imu_rpy: [f32; 3],
}

/// Summary statistics of one camera frame.  Raw pixels never leave the
/// session; the LLM only needs a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// Mean luminance in `[0, 255]`.
    pub mean_brightness: f32,
}

/// Microphone level reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioLevel {
    /// RMS level in dBFS (0 is full scale, more negative is quieter).
    pub rms_db: f32,
}

/// A GNSS position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub satellites: u8,
}

/// Access to the robot's clients (locomotion, arm actions, audio, LEDs, the
/// motion-mode switcher) and its sensors.
///
/// Every method may fail with [`CortexError::HardwareFault`]; callers treat
/// that as a recoverable per-tick failure.
#[async_trait]
pub trait HardwareSession: Send + Sync {
    /// Short identity used in logs and status (`"sim"`, `"g1-sdk"` …).
    fn name(&self) -> &str;

    /// Open the SDK channels.  Calling it twice is a no-op.
    async fn connect(&self) -> Result<(), CortexError>;

    /// Release every channel opened by [`connect`](Self::connect).
    async fn disconnect(&self) -> Result<(), CortexError>;

    fn is_connected(&self) -> bool;

    async fn current_mode(&self) -> Result<RobotMode, CortexError>;

    /// Request a single FSM transition.
    async fn switch_mode(&self, mode: RobotMode) -> Result<(), CortexError>;

    async fn move_velocity(
        &self,
        service: LocomotionService,
        command: VelocityCommand,
    ) -> Result<(), CortexError>;

    async fn stop_motion(&self) -> Result<(), CortexError>;

    /// Trigger a numbered arm action.  Numbering is firmware specific.
    async fn arm_action(&self, action_id: u32) -> Result<(), CortexError>;

    /// Return the arms to their relaxed pose.
    async fn release_arm(&self) -> Result<(), CortexError>;

    async fn set_led(&self, rgb: [u8; 3]) -> Result<(), CortexError>;

    /// Speak `text` through the robot's speaker.  `volume` is 0–100.
    async fn speak(&self, text: &str, volume: Option<u8>) -> Result<(), CortexError>;

    async fn stop_audio(&self) -> Result<(), CortexError>;

    async fn read_state(&self) -> Result<RobotState, CortexError>;

    async fn capture_frame(&self) -> Result<FrameSummary, CortexError>;

    async fn audio_level(&self) -> Result<AudioLevel, CortexError>;

    /// `Ok(None)` when the receiver has no fix yet.
    async fn gps_fix(&self) -> Result<Option<GpsFix>, CortexError>;
}

/// A plugin's handle on a session.
///
/// Plugins built with `mock_mode` get a private simulated session which they
/// open in `initialize()` and close in `stop()`.  The shared session is
/// opened and closed by the runtime only.
#[derive(Clone)]
pub struct SessionBinding {
    session: Arc<dyn HardwareSession>,
    private: bool,
}

impl SessionBinding {
    pub fn shared(session: Arc<dyn HardwareSession>) -> Self {
        Self { session, private: false }
    }

    pub fn private(session: Arc<dyn HardwareSession>) -> Self {
        Self { session, private: true }
    }

    pub fn session(&self) -> &Arc<dyn HardwareSession> {
        &self.session
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub async fn open(&self) -> Result<(), CortexError> {
        if self.private {
            self.session.connect().await?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), CortexError> {
        if self.private {
            self.session.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locomotion_service_parses_case_insensitively() {
        assert_eq!("Sport".parse::<LocomotionService>().unwrap(), LocomotionService::Sport);
        assert_eq!("LOCO".parse::<LocomotionService>().unwrap(), LocomotionService::Loco);
        assert!("walk".parse::<LocomotionService>().is_err());
    }

    #[test]
    fn locomotion_service_default_is_sport() {
        assert_eq!(LocomotionService::default(), LocomotionService::Sport);
        assert_eq!(LocomotionService::Loco.to_string(), "loco");
    }
}
