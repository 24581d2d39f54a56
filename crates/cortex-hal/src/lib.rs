//! `cortex-hal` – Hardware Abstraction Layer for the Unitree G1.
//!
//! # Modules
//!
//! - [`session`] – [`HardwareSession`]: the one handle on the vendor SDK,
//!   constructed at startup and injected into every plugin.
//! - [`sim_session`] – [`SimSession`]: recording in-process session for
//!   tests, CI and development.
//! - [`mode`] – [`ModeController`]: FSM mode preconditions
//!   (`ensure_mode`) checked before every hardware action.
//! - [`plugin`] – [`InputPlugin`] / [`ActionPlugin`] traits and the
//!   [`PluginSpec`] configuration block.
//! - [`sensors`] – built-in input plugins (robot state, vision, microphone,
//!   GPS, mock).
//! - [`actuators`] – built-in action plugins (movement, arms, speech,
//!   emotion LEDs, recording mock).
//! - [`registry`] – [`InputKind`] / [`ActionKind`] → constructor mapping.

pub mod actuators;
pub mod mode;
pub mod plugin;
pub mod registry;
pub mod sensors;
pub mod session;
pub mod sim_session;

pub use actuators::RecordingAction;
pub use mode::ModeController;
pub use plugin::{ActionPlugin, InputPlugin, PluginSpec, PluginState};
pub use registry::{ActionKind, InputKind, PluginContext, build_action, build_actions, build_input, build_inputs};
pub use sensors::MockInput;
pub use session::{HardwareSession, LocomotionService};
pub use sim_session::SimSession;
