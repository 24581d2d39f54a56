//! Plugin registry – maps configuration names to constructors.
//!
//! Each entry of `agent_inputs` / `agent_actions` names a plugin kind (its
//! `kind` field, or the entry key when absent).  The kind is resolved once at
//! startup to an [`InputKind`] / [`ActionKind`] variant, and each variant
//! owns exactly one constructor function.  Resolution is case-insensitive
//! and ignores `_` and `-`, so `"G1Speech"`, `"g1_speech"` and `"speech"` all
//! name the same plugin.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cortex_hal::plugin::PluginSpec;
//! use cortex_hal::registry::{ActionKind, PluginContext, build_action};
//! use cortex_hal::sim_session::SimSession;
//!
//! let ctx = PluginContext::new(Arc::new(SimSession::builder().build()));
//! assert_eq!(ActionKind::resolve("G1Speech").unwrap(), ActionKind::Speech);
//!
//! let speech = build_action(PluginSpec::new("G1Speech"), &ctx).unwrap();
//! assert_eq!(speech.name(), "G1Speech");
//! ```

use std::fmt;
use std::sync::Arc;

use cortex_types::{CortexError, RobotMode};
use tracing::debug;

use crate::actuators::{ArmsAction, EmotionAction, MovementAction, RecordingAction, SpeechAction};
use crate::plugin::{ActionPlugin, InputPlugin, PluginSpec};
use crate::sensors::{GpsInput, MicrophoneInput, MockInput, RobotStateInput, VisionInput};
use crate::session::{HardwareSession, LocomotionService, SessionBinding};
use crate::sim_session::SimSession;

/// Constructor of an input plugin.
pub type InputConstructor = fn(PluginSpec, &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError>;

/// Constructor of an action plugin.
pub type ActionConstructor = fn(PluginSpec, &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError>;

// ─────────────────────────────────────────────────────────────────────────────
// Construction context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a constructor may need besides its own [`PluginSpec`].
#[derive(Clone)]
pub struct PluginContext {
    /// The shared hardware session.
    pub session: Arc<dyn HardwareSession>,
    /// Let actions walk the robot into their required mode.
    pub auto_switch_mode: bool,
    /// Default locomotion service for movement plugins.
    pub locomotion: LocomotionService,
}

impl PluginContext {
    pub fn new(session: Arc<dyn HardwareSession>) -> Self {
        Self {
            session,
            auto_switch_mode: true,
            locomotion: LocomotionService::default(),
        }
    }

    /// The session a plugin built from `spec` should use: the shared one, or
    /// a private simulated one when `mock_mode` is set.
    pub fn binding(&self, spec: &PluginSpec) -> SessionBinding {
        if spec.mock_mode {
            debug!(plugin = %spec.name, "binding plugin to a private simulated session");
            SessionBinding::private(Arc::new(
                SimSession::builder()
                    .with_mode(RobotMode::MainOperationControl)
                    .build(),
            ))
        } else {
            SessionBinding::shared(Arc::clone(&self.session))
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Input kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Every built-in input plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Mock,
    RobotState,
    Vision,
    Microphone,
    Gps,
}

impl InputKind {
    pub const ALL: [InputKind; 5] = [
        InputKind::Mock,
        InputKind::RobotState,
        InputKind::Vision,
        InputKind::Microphone,
        InputKind::Gps,
    ];

    /// Resolve a configuration name to a kind.
    pub fn resolve(name: &str) -> Result<Self, CortexError> {
        match normalize(name).as_str() {
            "mock" | "mockinput" => Ok(InputKind::Mock),
            "robotstate" | "state" | "g1state" => Ok(InputKind::RobotState),
            "vision" | "camera" | "g1vision" => Ok(InputKind::Vision),
            "microphone" | "mic" | "voice" | "g1voice" => Ok(InputKind::Microphone),
            "gps" | "g1gps" => Ok(InputKind::Gps),
            _ => Err(CortexError::UnknownPlugin(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Mock => "mock",
            InputKind::RobotState => "robot_state",
            InputKind::Vision => "vision",
            InputKind::Microphone => "microphone",
            InputKind::Gps => "gps",
        }
    }

    pub fn constructor(self) -> InputConstructor {
        match self {
            InputKind::Mock => MockInput::build,
            InputKind::RobotState => RobotStateInput::build,
            InputKind::Vision => VisionInput::build,
            InputKind::Microphone => MicrophoneInput::build,
            InputKind::Gps => GpsInput::build,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Every built-in action plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Mock,
    Movement,
    Arms,
    Speech,
    Emotion,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Mock,
        ActionKind::Movement,
        ActionKind::Arms,
        ActionKind::Speech,
        ActionKind::Emotion,
    ];

    /// Resolve a configuration name to a kind.
    pub fn resolve(name: &str) -> Result<Self, CortexError> {
        match normalize(name).as_str() {
            "mock" | "recorder" | "mockaction" => Ok(ActionKind::Mock),
            "movement" | "locomotion" | "g1movement" => Ok(ActionKind::Movement),
            "arms" | "gesture" | "g1arms" => Ok(ActionKind::Arms),
            "speech" | "tts" | "g1speech" | "g1audio" => Ok(ActionKind::Speech),
            "emotion" | "led" | "leds" | "g1emotion" => Ok(ActionKind::Emotion),
            _ => Err(CortexError::UnknownPlugin(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Mock => "mock",
            ActionKind::Movement => "movement",
            ActionKind::Arms => "arms",
            ActionKind::Speech => "speech",
            ActionKind::Emotion => "emotion",
        }
    }

    pub fn constructor(self) -> ActionConstructor {
        match self {
            ActionKind::Mock => RecordingAction::build,
            ActionKind::Movement => MovementAction::build,
            ActionKind::Arms => ArmsAction::build,
            ActionKind::Speech => SpeechAction::build,
            ActionKind::Emotion => EmotionAction::build,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Construct one input plugin from its spec.
///
/// # Errors
///
/// [`CortexError::UnknownPlugin`] when the kind does not resolve, or the
/// constructor's own configuration error.
pub fn build_input(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn InputPlugin>, CortexError> {
    let kind = InputKind::resolve(spec.kind_name())?;
    debug!(plugin = %spec.name, %kind, "constructing input plugin");
    (kind.constructor())(spec, ctx)
}

/// Construct one action plugin from its spec.
pub fn build_action(spec: PluginSpec, ctx: &PluginContext) -> Result<Arc<dyn ActionPlugin>, CortexError> {
    let kind = ActionKind::resolve(spec.kind_name())?;
    debug!(plugin = %spec.name, %kind, "constructing action plugin");
    (kind.constructor())(spec, ctx)
}

/// Construct every enabled input plugin, preserving order.
pub fn build_inputs(
    specs: &[PluginSpec],
    ctx: &PluginContext,
) -> Result<Vec<Arc<dyn InputPlugin>>, CortexError> {
    specs
        .iter()
        .filter(|s| s.enabled)
        .map(|s| build_input(s.clone(), ctx))
        .collect()
}

/// Construct every enabled action plugin, preserving order.
pub fn build_actions(
    specs: &[PluginSpec],
    ctx: &PluginContext,
) -> Result<Vec<Arc<dyn ActionPlugin>>, CortexError> {
    specs
        .iter()
        .filter(|s| s.enabled)
        .map(|s| build_action(s.clone(), ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> PluginContext {
        PluginContext::new(Arc::new(SimSession::builder().connected().build()))
    }

    #[test]
    fn legacy_names_resolve() {
        assert_eq!(InputKind::resolve("G1State").unwrap(), InputKind::RobotState);
        assert_eq!(InputKind::resolve("G1Vision").unwrap(), InputKind::Vision);
        assert_eq!(InputKind::resolve("G1Voice").unwrap(), InputKind::Microphone);
        assert_eq!(InputKind::resolve("G1GPS").unwrap(), InputKind::Gps);
        assert_eq!(ActionKind::resolve("G1Movement").unwrap(), ActionKind::Movement);
        assert_eq!(ActionKind::resolve("G1Arms").unwrap(), ActionKind::Arms);
        assert_eq!(ActionKind::resolve("g1_emotion").unwrap(), ActionKind::Emotion);
    }

    #[test]
    fn canonical_names_roundtrip() {
        for kind in InputKind::ALL {
            assert_eq!(InputKind::resolve(kind.as_str()).unwrap(), kind);
        }
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::resolve(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_reported_by_name() {
        let err = InputKind::resolve("lidar").unwrap_err();
        assert_eq!(err, CortexError::UnknownPlugin("lidar".into()));
    }

    #[test]
    fn explicit_kind_wins_over_name() {
        let spec = PluginSpec::new("thermometer").with_kind("mock");
        let input = build_input(spec, &ctx()).expect("mock input");
        assert_eq!(input.name(), "thermometer");
    }

    #[test]
    fn disabled_specs_are_skipped_and_order_kept() {
        let mut disabled = PluginSpec::new("G1Vision");
        disabled.enabled = false;
        let specs = vec![
            PluginSpec::new("b").with_kind("mock"),
            disabled,
            PluginSpec::new("a").with_kind("mock"),
        ];
        let inputs = build_inputs(&specs, &ctx()).unwrap();
        let names: Vec<_> = inputs.iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn constructor_config_errors_propagate() {
        let spec = PluginSpec::new("arms").with_option("gestures", json!([1, 2]));
        assert!(matches!(build_action(spec, &ctx()), Err(CortexError::Config(_))));
    }
}
